//! Registry and artifact metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        })
    }
}

/// A tracked run with everything logged into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment: String,
    pub run_name: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Column of a model signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub dtype: String,
}

/// Input/output description of a logged model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub inputs: Vec<ColumnSpec>,
    pub outputs: Vec<ColumnSpec>,
    /// Shape of the prediction output; `-1` marks the batch dimension
    pub output_shape: Vec<i64>,
}

/// A model logged into a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedModel {
    pub run_id: String,
    pub artifact_path: String,
    pub signature: ModelSignature,
    /// First rows of the scaled test matrix
    pub input_example: Vec<Vec<f64>>,
    pub size_bytes: u64,
    pub md5: String,
}

impl LoggedModel {
    /// `runs:/{run_id}/{artifact_path}`
    pub fn model_uri(&self) -> String {
        model_uri(&self.run_id, &self.artifact_path)
    }
}

pub fn model_uri(run_id: &str, artifact_path: &str) -> String {
    format!("runs:/{run_id}/{artifact_path}")
}

/// Parse `runs:/{run_id}/{artifact_path}` into its parts.
pub fn parse_model_uri(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix("runs:/")?
        .split_once('/')
        .filter(|(run, path)| !run.is_empty() && !path.is_empty())
}

/// A registry-assigned version of a named model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModelVersion {
    pub name: String,
    pub version: u64,
    /// `runs:/...` URI of the logged model this version is bound to
    pub source: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Bytes written to an artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBlob {
    /// Filesystem path or URL the bytes were written to
    pub location: String,
    pub size_bytes: u64,
    pub md5: String,
}

impl ArtifactBlob {
    pub fn describe(location: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            location: location.into(),
            size_bytes: bytes.len() as u64,
            md5: format!("{:x}", md5::compute(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_uri_round_trip() {
        let uri = model_uri("abc123", "model");
        assert_eq!(uri, "runs:/abc123/model");
        assert_eq!(parse_model_uri(&uri), Some(("abc123", "model")));
        assert_eq!(parse_model_uri("models:/x/1"), None);
        assert_eq!(parse_model_uri("runs://model"), None);
    }

    #[test]
    fn blob_digest_is_hex_md5() {
        let blob = ArtifactBlob::describe("/tmp/x", b"hello");
        assert_eq!(blob.size_bytes, 5);
        assert_eq!(blob.md5, "5d41402abc4b2a76b9719d911017c592");
    }
}
