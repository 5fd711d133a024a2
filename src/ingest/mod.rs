//! Data ingestion: delimited equipment logs into `RawTable`.
//!
//! The failure column and preset columns come from configuration. Continuous
//! sensor columns are either declared or inferred as the float-typed columns
//! that are neither presets nor the failure flag.

pub mod csv;
pub mod schema;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::DataConfig;
use crate::error::{Classify, FailureKind};
use crate::types::{ColumnType, RawRecord, RawTable, TableSchema};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("dataset unavailable at {path}: {reason}")]
    DataUnavailable { path: String, reason: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl Classify for IngestError {
    fn kind(&self) -> FailureKind {
        match self {
            Self::DataUnavailable { .. } => FailureKind::DataUnavailable,
            Self::SchemaMismatch(_) => FailureKind::SchemaMismatch,
        }
    }
}

/// Whether the failure column is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Failure column must exist and every row must carry a flag
    Training,
    /// Failure column is optional
    Scoring,
}

/// Loads a raw dataset according to the declared column layout.
#[derive(Debug, Clone)]
pub struct DataIngestor {
    config: DataConfig,
}

impl DataIngestor {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Load the configured training dataset.
    pub fn load(&self) -> Result<RawTable, IngestError> {
        self.load_path(&self.config.source, IngestMode::Training)
    }

    /// Load any dataset file with this ingestor's column layout.
    pub fn load_path(&self, path: &Path, mode: IngestMode) -> Result<RawTable, IngestError> {
        let text = std::fs::read_to_string(path).map_err(|e| IngestError::DataUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let table = self.parse(&text, mode).map_err(|e| match e {
            IngestError::DataUnavailable { reason, .. } => IngestError::DataUnavailable {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;

        info!(
            path = %path.display(),
            rows = table.len(),
            continuous = table.schema.continuous.len(),
            labeled = table.is_labeled(),
            "Dataset loaded"
        );
        Ok(table)
    }

    /// Parse dataset text already in memory.
    pub fn parse(&self, text: &str, mode: IngestMode) -> Result<RawTable, IngestError> {
        let doc = csv::parse_document(text, self.config.delimiter).ok_or_else(|| {
            IngestError::DataUnavailable {
                path: "<memory>".to_string(),
                reason: "no header row".to_string(),
            }
        })?;
        if doc.rows.is_empty() {
            return Err(IngestError::DataUnavailable {
                path: "<memory>".to_string(),
                reason: "dataset has a header but no records".to_string(),
            });
        }

        let width = doc.header.len();
        let mut seen = HashSet::new();
        for name in &doc.header {
            if !seen.insert(name.as_str()) {
                return Err(IngestError::SchemaMismatch(format!(
                    "duplicate column '{name}'"
                )));
            }
        }
        for (line, row) in &doc.rows {
            if row.len() != width {
                return Err(IngestError::SchemaMismatch(format!(
                    "line {line} has {} fields, header has {width}",
                    row.len()
                )));
            }
        }

        let index_of = |name: &str| doc.header.iter().position(|h| h == name);
        let column = |idx: usize| doc.rows.iter().map(move |(_, r)| r[idx].as_str());

        let columns: Vec<(String, ColumnType)> = doc
            .header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let ty = schema::infer_column_type(column(i)).unwrap_or(ColumnType::Text);
                (name.clone(), ty)
            })
            .collect();
        debug!(?columns, "Inferred column types");

        // Failure column
        let failure_idx = index_of(&self.config.failure_column);
        if failure_idx.is_none() && mode == IngestMode::Training {
            return Err(IngestError::SchemaMismatch(format!(
                "failure column '{}' not found",
                self.config.failure_column
            )));
        }

        // Preset columns
        let mut preset_idx = Vec::with_capacity(self.config.preset_columns.len());
        for name in &self.config.preset_columns {
            let idx = index_of(name).ok_or_else(|| {
                IngestError::SchemaMismatch(format!("preset column '{name}' not found"))
            })?;
            preset_idx.push(idx);
        }

        // Continuous columns
        let continuous: Vec<String> = if self.config.continuous_columns.is_empty() {
            columns
                .iter()
                .filter(|(name, ty)| {
                    *ty == ColumnType::Float
                        && *name != self.config.failure_column
                        && !self.config.preset_columns.contains(name)
                })
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            for name in &self.config.continuous_columns {
                match columns.iter().find(|(c, _)| c == name) {
                    None => {
                        return Err(IngestError::SchemaMismatch(format!(
                            "continuous column '{name}' not found"
                        )))
                    }
                    Some((_, ty)) if !ty.is_numeric() => {
                        return Err(IngestError::SchemaMismatch(format!(
                            "continuous column '{name}' is {ty}, expected numeric"
                        )))
                    }
                    Some(_) => {}
                }
            }
            self.config.continuous_columns.clone()
        };
        let continuous_idx: Vec<usize> = continuous
            .iter()
            .filter_map(|name| index_of(name))
            .collect();

        let mut records = Vec::with_capacity(doc.rows.len());
        for (line, row) in &doc.rows {
            let failure = match failure_idx {
                Some(idx) => Some(schema::parse_failure_flag(&row[idx]).ok_or_else(|| {
                    IngestError::SchemaMismatch(format!(
                        "line {line}: failure flag '{}' is not a boolean",
                        row[idx]
                    ))
                })?),
                None => None,
            };

            let mut sensors = Vec::with_capacity(continuous_idx.len());
            for &idx in &continuous_idx {
                let value = schema::parse_sensor(&row[idx]).ok_or_else(|| {
                    IngestError::SchemaMismatch(format!(
                        "line {line}: '{}' in column '{}' is not numeric",
                        row[idx], doc.header[idx]
                    ))
                })?;
                sensors.push(value);
            }

            let preset = preset_idx.iter().map(|&idx| row[idx].clone()).collect();
            records.push(RawRecord {
                sensors,
                preset,
                failure,
            });
        }

        Ok(RawTable {
            schema: TableSchema {
                columns,
                continuous,
                presets: self.config.preset_columns.clone(),
                failure: failure_idx.map(|_| self.config.failure_column.clone()),
            },
            records,
        })
    }

    pub fn source(&self) -> PathBuf {
        self.config.source.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Cycle,Preset_1,Preset_2,Temperature,Pressure,Fail
1,3,6,44.23,47.65,False
2,2,4,60.81,63.17,False
3,2,1,79.03,83.03,True
";

    fn ingestor() -> DataIngestor {
        DataIngestor::new(&DataConfig::default())
    }

    #[test]
    fn infers_continuous_columns_and_normalizes_failure() {
        let table = ingestor().parse(SAMPLE, IngestMode::Training).unwrap();
        assert_eq!(table.schema.continuous, vec!["Temperature", "Pressure"]);
        assert_eq!(table.schema.column_type("Cycle"), Some(ColumnType::Integer));
        assert_eq!(table.schema.column_type("Fail"), Some(ColumnType::Boolean));
        let flags: Vec<_> = table.records.iter().map(|r| r.failure).collect();
        assert_eq!(flags, vec![Some(0), Some(0), Some(1)]);
        assert_eq!(table.records[1].preset, vec!["2", "4"]);
        assert_eq!(table.records[2].sensors, vec![79.03, 83.03]);
    }

    #[test]
    fn missing_failure_column_is_schema_mismatch_for_training() {
        let text = "Preset_1,Preset_2,Temperature\n1,1,2.5\n";
        let err = ingestor().parse(text, IngestMode::Training).unwrap_err();
        assert_eq!(err.kind(), FailureKind::SchemaMismatch);

        let table = ingestor().parse(text, IngestMode::Scoring).unwrap();
        assert!(table.schema.failure.is_none());
        assert_eq!(table.records[0].failure, None);
        assert!(!table.is_labeled());
    }

    #[test]
    fn missing_preset_is_schema_mismatch() {
        let text = "Preset_1,Temperature,Fail\n1,2.5,False\n";
        let err = ingestor().parse(text, IngestMode::Training).unwrap_err();
        assert!(matches!(err, IngestError::SchemaMismatch(ref m) if m.contains("Preset_2")));
    }

    #[test]
    fn bad_failure_value_is_schema_mismatch() {
        let text = "Preset_1,Preset_2,Temperature,Fail\n1,1,2.5,maybe\n";
        let err = ingestor().parse(text, IngestMode::Training).unwrap_err();
        assert_eq!(err.kind(), FailureKind::SchemaMismatch);
    }

    #[test]
    fn ragged_row_is_schema_mismatch() {
        let text = "Preset_1,Preset_2,Temperature,Fail\n1,1,2.5\n";
        assert!(ingestor().parse(text, IngestMode::Training).is_err());
    }

    #[test]
    fn blank_sensor_becomes_nan() {
        let text = "Preset_1,Preset_2,Temperature,Fail\n1,1,2.5,0\n1,1,,1\n";
        let table = ingestor().parse(text, IngestMode::Training).unwrap();
        assert!(table.records[1].sensors[0].is_nan());
    }

    #[test]
    fn declared_continuous_columns_override_inference() {
        let config = DataConfig {
            continuous_columns: vec!["Cycle".to_string()],
            ..DataConfig::default()
        };
        let table = DataIngestor::new(&config)
            .parse(SAMPLE, IngestMode::Training)
            .unwrap();
        assert_eq!(table.schema.continuous, vec!["Cycle"]);
        assert_eq!(table.records[0].sensors, vec![1.0]);

        let config = DataConfig {
            continuous_columns: vec!["Fail".to_string()],
            ..DataConfig::default()
        };
        assert!(DataIngestor::new(&config)
            .parse(SAMPLE, IngestMode::Training)
            .is_err());
    }

    #[test]
    fn unreadable_path_is_data_unavailable() {
        let err = ingestor()
            .load_path(Path::new("/nonexistent/equipment.csv"), IngestMode::Training)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::DataUnavailable);
    }

    #[test]
    fn header_only_is_data_unavailable() {
        let err = ingestor()
            .parse("Preset_1,Preset_2,Fail\n", IngestMode::Training)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::DataUnavailable);
    }
}
