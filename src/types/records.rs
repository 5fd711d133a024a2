//! Raw equipment records and the column schema they were read with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type of a dataset column, inferred from every non-null cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnType {
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// Column layout of a loaded table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    /// Every header column with its inferred type, in file order
    pub columns: Vec<(String, ColumnType)>,
    /// Continuous sensor columns, in file order
    pub continuous: Vec<String>,
    /// Preset (grouping) columns, in declared order
    pub presets: Vec<String>,
    /// Failure indicator column, absent in scoring mode
    pub failure: Option<String>,
}

impl TableSchema {
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(c, _)| c == name)
            .map(|(_, t)| *t)
    }
}

/// One time-ordered observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Continuous sensor readings, one per `TableSchema::continuous` column.
    /// Blank cells are `NaN`.
    pub sensors: Vec<f64>,
    /// Preset values, one per `TableSchema::presets` column, kept verbatim
    pub preset: Vec<String>,
    /// Failure flag as 0/1; `None` when the table was loaded for scoring
    pub failure: Option<u8>,
}

/// In-memory dataset. Row order is the file order and is never changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTable {
    pub schema: TableSchema,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of one continuous column, by position in `schema.continuous`.
    pub fn sensor_column(&self, idx: usize) -> Vec<f64> {
        self.records
            .iter()
            .map(|r| r.sensors.get(idx).copied().unwrap_or(f64::NAN))
            .collect()
    }

    /// Whether every record carries a failure flag.
    pub fn is_labeled(&self) -> bool {
        self.schema.failure.is_some() && self.records.iter().all(|r| r.failure.is_some())
    }
}
