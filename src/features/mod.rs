//! Feature engineering for the equipment failure classifier.
//!
//! Derives the forward-looking `Verge_of_failing` label and the seven trained
//! features from the time-ordered raw records. Every record produces exactly
//! one feature vector; the last record has no successor, so its label is
//! undefined and it is left out of the trainable set.
//!
//! Derivation order:
//! 1. label = failure flag of the next row, forced to 1 when the row itself fails
//! 2. `Sum_of_variables` = row sum of the continuous columns
//! 3. first difference of the sum and its rolling sum (diagnostic)
//! 4. rolling mean and rolling sample std of the sum (sentinel-filled)
//! 5. deviation from the global median and from the per-preset median
//! 6. row max and row population std across continuous columns
//! 7. count of columns at or above their high percentile

pub mod rolling;
pub mod stats;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::FeatureConfig;
use crate::error::{Classify, FailureKind};
use crate::types::{FeatureId, FeatureVector, LabeledDataset, RawTable, FEATURE_SCHEMA};

#[derive(Debug, Error)]
pub enum FeatureComputationError {
    #[error("no continuous columns to derive features from")]
    NoContinuousColumns,

    #[error("dataset has no records")]
    Empty,

    #[error("non-finite value in feature '{feature}' at row {row}")]
    NonFinite { feature: &'static str, row: usize },
}

impl Classify for FeatureComputationError {
    fn kind(&self) -> FailureKind {
        FailureKind::FeatureComputation
    }
}

/// Intermediate columns kept for diagnostics; never part of the feature matrix.
#[derive(Debug, Clone, Default)]
pub struct FeatureIntermediates {
    /// First difference of `Sum_of_variables`
    pub diff: Vec<Option<f64>>,
    /// Rolling sum of the first difference
    pub diff_accumulated: Vec<Option<f64>>,
    pub global_median: f64,
    /// Median of `Sum_of_variables` per preset combination
    pub preset_medians: BTreeMap<Vec<String>, f64>,
    /// Row population std across continuous columns
    pub row_std: Vec<f64>,
    /// High-percentile threshold per continuous column
    pub thresholds: Vec<(String, f64)>,
}

/// Output of the feature stage, one entry per input record.
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    pub vectors: Vec<FeatureVector>,
    /// `None` for the last record and for unlabeled (scoring) tables
    pub labels: Vec<Option<u8>>,
    pub intermediates: FeatureIntermediates,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Rows with a defined label, in original order.
    pub fn labeled(&self) -> LabeledDataset {
        let (features, labels): (Vec<_>, Vec<_>) = self
            .vectors
            .iter()
            .zip(&self.labels)
            .filter_map(|(v, l)| l.map(|l| (*v, l)))
            .unzip();
        LabeledDataset { features, labels }
    }
}

/// Derives features from raw records with configured windows.
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// `Verge_of_failing` for every row: `Some(1)` when the row fails,
    /// otherwise the next row's flag. The last row has no successor.
    pub fn labels(flags: &[Option<u8>]) -> Vec<Option<u8>> {
        (0..flags.len())
            .map(|i| {
                let next = flags.get(i + 1).copied().flatten();
                match flags[i] {
                    _ if i + 1 == flags.len() => None,
                    Some(1) => Some(1),
                    _ => next,
                }
            })
            .collect()
    }

    pub fn compute(&self, table: &RawTable) -> Result<FeatureFrame, FeatureComputationError> {
        if table.schema.continuous.is_empty() {
            return Err(FeatureComputationError::NoContinuousColumns);
        }
        if table.is_empty() {
            return Err(FeatureComputationError::Empty);
        }
        let cfg = &self.config;
        let n = table.len();

        // Label
        let flags: Vec<Option<u8>> = table.records.iter().map(|r| r.failure).collect();
        let labels = Self::labels(&flags);

        // Sum and its trailing statistics
        let sums: Vec<f64> = table
            .records
            .iter()
            .map(|r| stats::nan_sum(&r.sensors))
            .collect();
        let sum_series: Vec<Option<f64>> = sums.iter().copied().map(Some).collect();

        let diff = rolling::diff(&sums);
        let diff_accumulated = rolling::rolling_sum(&diff, cfg.diff_window, cfg.diff_min_periods);
        let moving_avg = rolling::rolling_mean(&sum_series, cfg.mean_window, cfg.mean_min_periods);
        let moving_std = rolling::rolling_std(&sum_series, cfg.std_window, cfg.std_min_periods);

        // Medians
        let global_median = stats::median(&sums);
        let mut groups: BTreeMap<Vec<String>, Vec<f64>> = BTreeMap::new();
        for (record, &sum) in table.records.iter().zip(&sums) {
            groups.entry(record.preset.clone()).or_default().push(sum);
        }
        let preset_medians: BTreeMap<Vec<String>, f64> = groups
            .into_iter()
            .map(|(k, v)| (k, stats::median(&v)))
            .collect();

        // Per-column high thresholds over the whole raw table
        let thresholds: Vec<(String, f64)> = table
            .schema
            .continuous
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let column = table.sensor_column(idx);
                (name.clone(), stats::quantile_linear(&column, cfg.percentile))
            })
            .collect();

        let mut vectors = Vec::with_capacity(n);
        let mut row_std = Vec::with_capacity(n);
        for (i, record) in table.records.iter().enumerate() {
            let high_count = record
                .sensors
                .iter()
                .zip(&thresholds)
                .filter(|(v, (_, t))| **v >= *t)
                .count();
            let preset_median = preset_medians
                .get(&record.preset)
                .copied()
                .unwrap_or(f64::NAN);
            row_std.push(stats::row_population_std(&record.sensors));

            #[allow(clippy::cast_precision_loss)]
            let n_high = high_count as f64;
            let row_max = stats::row_max(&record.sensors);
            vectors.push(FeatureVector::from_schema(cfg.sentinel, |id| match id {
                FeatureId::SumOfVariables => Some(sums[i]),
                FeatureId::SumOfVariablesMa => moving_avg[i],
                FeatureId::NEquipFeatsAbv85Pct => Some(n_high),
                FeatureId::MaxValueAmongFeat => Some(row_max),
                FeatureId::SumOfVariablesStd => moving_std[i],
                FeatureId::DiffMedianSumOfVariablesPreset => Some(sums[i] - preset_median),
                FeatureId::DiffMedianSumOfVariables => Some(sums[i] - global_median),
            }));
        }

        for (row, v) in vectors.iter().enumerate() {
            if let Some(feature) = v.first_non_finite() {
                return Err(FeatureComputationError::NonFinite { feature, row });
            }
        }

        debug!(
            global_median,
            preset_groups = preset_medians.len(),
            ?thresholds,
            "Feature intermediates"
        );
        info!(
            rows = n,
            features = FEATURE_SCHEMA.len(),
            labeled = labels.iter().filter(|l| l.is_some()).count(),
            "Features engineered"
        );

        Ok(FeatureFrame {
            vectors,
            labels,
            intermediates: FeatureIntermediates {
                diff,
                diff_accumulated,
                global_median,
                preset_medians,
                row_std,
                thresholds,
            },
        })
    }
}
