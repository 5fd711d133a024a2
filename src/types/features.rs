//! Engineered feature vector and its declared schema.

use serde::{Deserialize, Serialize};

/// Number of features fed to the classifier.
pub const NUM_FEATURES: usize = 7;

/// One trained feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureId {
    SumOfVariables,
    SumOfVariablesMa,
    NEquipFeatsAbv85Pct,
    MaxValueAmongFeat,
    SumOfVariablesStd,
    DiffMedianSumOfVariablesPreset,
    DiffMedianSumOfVariables,
}

/// Declared definition of a trained feature.
#[derive(Debug, Clone, Copy)]
pub struct FeatureDefinition {
    pub id: FeatureId,
    /// Column name in the feature matrix and the model signature
    pub name: &'static str,
    /// Missing values are replaced by the configured sentinel
    pub sentinel_fill: bool,
}

impl FeatureDefinition {
    /// Final value of this feature: missing values take `sentinel` when the
    /// feature is sentinel-filled and stay NaN otherwise.
    pub fn resolve(&self, value: Option<f64>, sentinel: f64) -> f64 {
        match value {
            Some(v) => v,
            None if self.sentinel_fill => sentinel,
            None => f64::NAN,
        }
    }
}

/// The feature matrix layout, in column order.
pub const FEATURE_SCHEMA: [FeatureDefinition; NUM_FEATURES] = [
    FeatureDefinition {
        id: FeatureId::SumOfVariables,
        name: "Sum_of_variables",
        sentinel_fill: false,
    },
    FeatureDefinition {
        id: FeatureId::SumOfVariablesMa,
        name: "Sum_of_variables_MA",
        sentinel_fill: true,
    },
    FeatureDefinition {
        id: FeatureId::NEquipFeatsAbv85Pct,
        name: "N_equip_feats_abv_85_pct",
        sentinel_fill: false,
    },
    FeatureDefinition {
        id: FeatureId::MaxValueAmongFeat,
        name: "Max_value_among_feat",
        sentinel_fill: false,
    },
    FeatureDefinition {
        id: FeatureId::SumOfVariablesStd,
        name: "Sum_of_variables_std",
        sentinel_fill: true,
    },
    FeatureDefinition {
        id: FeatureId::DiffMedianSumOfVariablesPreset,
        name: "Diff_Median_Sum_of_variables_Preset",
        sentinel_fill: false,
    },
    FeatureDefinition {
        id: FeatureId::DiffMedianSumOfVariables,
        name: "Diff_Median_Sum_of_variables",
        sentinel_fill: false,
    },
];

/// Feature column names in matrix order.
pub fn feature_names() -> Vec<String> {
    FEATURE_SCHEMA.iter().map(|d| d.name.to_string()).collect()
}

/// The seven engineered features of one record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub sum_of_variables: f64,
    pub sum_of_variables_ma: f64,
    pub n_equip_feats_abv_85_pct: f64,
    pub max_value_among_feat: f64,
    pub sum_of_variables_std: f64,
    pub diff_median_preset: f64,
    pub diff_median: f64,
}

impl FeatureVector {
    /// Build a vector from the raw value of every schema feature, applying
    /// each definition's sentinel fill.
    pub fn from_schema(sentinel: f64, mut raw: impl FnMut(FeatureId) -> Option<f64>) -> Self {
        let mut v = Self {
            sum_of_variables: f64::NAN,
            sum_of_variables_ma: f64::NAN,
            n_equip_feats_abv_85_pct: f64::NAN,
            max_value_among_feat: f64::NAN,
            sum_of_variables_std: f64::NAN,
            diff_median_preset: f64::NAN,
            diff_median: f64::NAN,
        };
        for def in &FEATURE_SCHEMA {
            v.set(def.id, def.resolve(raw(def.id), sentinel));
        }
        v
    }

    pub fn set(&mut self, id: FeatureId, value: f64) {
        let slot = match id {
            FeatureId::SumOfVariables => &mut self.sum_of_variables,
            FeatureId::SumOfVariablesMa => &mut self.sum_of_variables_ma,
            FeatureId::NEquipFeatsAbv85Pct => &mut self.n_equip_feats_abv_85_pct,
            FeatureId::MaxValueAmongFeat => &mut self.max_value_among_feat,
            FeatureId::SumOfVariablesStd => &mut self.sum_of_variables_std,
            FeatureId::DiffMedianSumOfVariablesPreset => &mut self.diff_median_preset,
            FeatureId::DiffMedianSumOfVariables => &mut self.diff_median,
        };
        *slot = value;
    }

    pub const fn get(&self, id: FeatureId) -> f64 {
        match id {
            FeatureId::SumOfVariables => self.sum_of_variables,
            FeatureId::SumOfVariablesMa => self.sum_of_variables_ma,
            FeatureId::NEquipFeatsAbv85Pct => self.n_equip_feats_abv_85_pct,
            FeatureId::MaxValueAmongFeat => self.max_value_among_feat,
            FeatureId::SumOfVariablesStd => self.sum_of_variables_std,
            FeatureId::DiffMedianSumOfVariablesPreset => self.diff_median_preset,
            FeatureId::DiffMedianSumOfVariables => self.diff_median,
        }
    }

    /// Values in `FEATURE_SCHEMA` order.
    pub fn as_array(&self) -> [f64; NUM_FEATURES] {
        FEATURE_SCHEMA.map(|d| self.get(d.id))
    }

    /// First feature holding a non-finite value.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        FEATURE_SCHEMA
            .iter()
            .find(|d| !self.get(d.id).is_finite())
            .map(|d| d.name)
    }
}

/// Trainable rows: features with their `Verge_of_failing` label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledDataset {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<u8>,
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    /// Feature rows in schema order.
    pub fn rows(&self) -> Vec<[f64; NUM_FEATURES]> {
        self.features.iter().map(FeatureVector::as_array).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_order_matches_trained_layout() {
        assert_eq!(
            feature_names(),
            vec![
                "Sum_of_variables",
                "Sum_of_variables_MA",
                "N_equip_feats_abv_85_pct",
                "Max_value_among_feat",
                "Sum_of_variables_std",
                "Diff_Median_Sum_of_variables_Preset",
                "Diff_Median_Sum_of_variables",
            ]
        );
    }

    #[test]
    fn only_rolling_mean_and_std_take_the_sentinel() {
        let filled: Vec<_> = FEATURE_SCHEMA
            .iter()
            .filter(|d| d.sentinel_fill)
            .map(|d| d.id)
            .collect();
        assert_eq!(
            filled,
            vec![FeatureId::SumOfVariablesMa, FeatureId::SumOfVariablesStd]
        );
    }

    #[test]
    fn missing_values_fill_only_where_declared() {
        let v = FeatureVector::from_schema(-1.0, |id| match id {
            FeatureId::SumOfVariablesMa | FeatureId::SumOfVariablesStd | FeatureId::DiffMedianSumOfVariables => None,
            _ => Some(2.0),
        });
        assert_eq!(v.sum_of_variables_ma, -1.0);
        assert_eq!(v.sum_of_variables_std, -1.0);
        assert_eq!(v.sum_of_variables, 2.0);
        assert!(v.diff_median.is_nan());
        assert_eq!(v.first_non_finite(), Some("Diff_Median_Sum_of_variables"));
    }

    #[test]
    fn as_array_follows_schema() {
        let v = FeatureVector {
            sum_of_variables: 1.0,
            sum_of_variables_ma: 2.0,
            n_equip_feats_abv_85_pct: 3.0,
            max_value_among_feat: 4.0,
            sum_of_variables_std: 5.0,
            diff_median_preset: 6.0,
            diff_median: 7.0,
        };
        assert_eq!(v.as_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(v.first_non_finite().is_none());
    }
}
