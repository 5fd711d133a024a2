//! Model artifact persistence, independent of the registry.
//!
//! Encoding: JSON document of the `TrainedModel`, zstd level 3.

pub mod http;
pub mod local;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use http::HttpArtifactStore;
pub use local::LocalArtifactStore;

use crate::config::{defaults, ArtifactBackend, ArtifactConfig};
use crate::error::{Classify, FailureKind};
use crate::training::{TrainedModel, MODEL_FORMAT_VERSION};
use crate::types::ArtifactBlob;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compression(io::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object storage returned status {0}")]
    ServerError(reqwest::StatusCode),

    #[error("no artifact at '{0}'")]
    NotFound(String),

    #[error("unsupported model format version {0}")]
    UnsupportedFormat(u32),

    #[error("artifact path '{0}' escapes the store root")]
    InvalidPath(String),

    #[error("http artifact backend needs a base_url")]
    MissingBaseUrl,
}

/// Store errors surface while persisting a trained model. Loading paths
/// wrap them so they classify as `ModelUnavailable` instead.
impl Classify for ArtifactError {
    fn kind(&self) -> FailureKind {
        FailureKind::ArtifactWrite
    }
}

/// A path-addressable blob store.
pub trait ArtifactStore: Send + Sync {
    /// Where `path` resolves to, for logs and blob descriptions.
    fn location(&self, path: &str) -> String;

    fn write(&self, path: &str, bytes: &[u8]) -> Result<ArtifactBlob, ArtifactError>;

    fn read(&self, path: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Open the configured backend.
pub fn open(config: &ArtifactConfig) -> Result<Box<dyn ArtifactStore>, ArtifactError> {
    Ok(match config.backend {
        ArtifactBackend::Local => Box::new(LocalArtifactStore::new(&config.root)),
        ArtifactBackend::Http => Box::new(HttpArtifactStore::from_config(config)?),
    })
}

pub fn encode_model(model: &TrainedModel) -> Result<Vec<u8>, ArtifactError> {
    let json = serde_json::to_vec(model)?;
    zstd::encode_all(json.as_slice(), defaults::ZSTD_LEVEL).map_err(ArtifactError::Compression)
}

pub fn decode_model(bytes: &[u8]) -> Result<TrainedModel, ArtifactError> {
    let json = zstd::decode_all(bytes).map_err(ArtifactError::Compression)?;
    let model: TrainedModel = serde_json::from_slice(&json)?;
    if model.format_version != MODEL_FORMAT_VERSION {
        return Err(ArtifactError::UnsupportedFormat(model.format_version));
    }
    Ok(model)
}

/// Write through a sibling temp file and rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let io_err = |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{LogisticModel, Matrix, StandardScaler};
    use crate::types::{feature_names, ClassWeight, FeatureVector, Hyperparameters, Penalty, Solver};

    fn sample_model() -> TrainedModel {
        let x = Matrix::from_rows(&[
            [1.0, 2.0, 0.0, 3.0, 0.5, -1.0, 1.0],
            [2.0, 1.0, 1.0, 4.0, 0.7, 1.0, -1.0],
            [3.0, 0.0, 2.0, 1.0, 0.2, 0.0, 2.0],
        ]);
        TrainedModel {
            format_version: MODEL_FORMAT_VERSION,
            classifier: LogisticModel {
                coef: vec![0.3, -1.2, 0.05, 2.0, -0.7, 0.1, 1.0 / 3.0],
                intercept: -0.25,
            },
            scaler: StandardScaler::fit(&x),
            hyperparameters: Hyperparameters {
                solver: Solver::Liblinear,
                penalty: Penalty::L1,
                c_path_size: 10,
                class_weight: ClassWeight::from_negative(0.6),
            },
            c: 0.359_381_366_380_462_4,
            feature_names: feature_names(),
        }
    }

    #[test]
    fn round_trip_predicts_identically() {
        let model = sample_model();
        let decoded = decode_model(&encode_model(&model).unwrap()).unwrap();
        assert_eq!(decoded, model);

        let rows: Vec<FeatureVector> = (0..5)
            .map(|i| {
                let t = f64::from(i);
                FeatureVector {
                    sum_of_variables: t,
                    sum_of_variables_ma: -1.0,
                    n_equip_feats_abv_85_pct: t % 2.0,
                    max_value_among_feat: t * 1.5,
                    sum_of_variables_std: 0.1 * t,
                    diff_median_preset: t - 2.0,
                    diff_median: 2.0 - t,
                }
            })
            .collect();
        assert_eq!(decoded.predict_proba(&rows), model.predict_proba(&rows));
        assert_eq!(decoded.predict(&rows), model.predict(&rows));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode_model(b"not zstd").unwrap_err(),
            ArtifactError::Compression(_)
        ));
    }

    #[test]
    fn future_format_is_rejected() {
        let mut model = sample_model();
        model.format_version = MODEL_FORMAT_VERSION + 1;
        let bytes = zstd::encode_all(serde_json::to_vec(&model).unwrap().as_slice(), 3).unwrap();
        assert!(matches!(
            decode_model(&bytes).unwrap_err(),
            ArtifactError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");
        write_atomic(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!dir.path().join("nested/out.bin.tmp").exists());
    }
}
