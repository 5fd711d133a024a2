//! Pipeline Configuration - all stage parameters as operator-tunable TOML values
//!
//! Each struct implements `Default` with the values the training job was
//! originally written with, so running without a config file reproduces it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::{Penalty, Solver};

// ============================================================================
// Config Provenance: tracks which keys the user explicitly set
// ============================================================================

/// Dotted key paths explicitly present in the user's TOML file.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvenance {
    pub explicit_keys: HashSet<String>,
}

impl ConfigProvenance {
    /// Example: `provenance.is_user_set("training.search.penalties")`
    pub fn is_user_set(&self, dotted_key: &str) -> bool {
        self.explicit_keys.contains(dotted_key)
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one training deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Raw dataset location and declared schema
    #[serde(default)]
    pub data: DataConfig,

    /// Feature window sizes and fill values
    #[serde(default)]
    pub features: FeatureConfig,

    /// Split, CV and search parameters
    #[serde(default)]
    pub training: TrainingConfig,

    /// Model registry connection and naming
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Artifact store destination
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// Scoring entry point defaults
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PREDMAINT_CONFIG` environment variable
    /// 2. `./pipeline_config.toml`
    /// 3. Built-in defaults
    ///
    /// Environment overrides are applied to whichever source wins.
    pub fn load() -> Self {
        let (config, _provenance) = Self::load_with_provenance();
        config
    }

    /// Same search order as `load()`, also returning which keys the user set.
    pub fn load_with_provenance() -> (Self, ConfigProvenance) {
        if let Ok(path) = std::env::var("PREDMAINT_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file_with_provenance(&p) {
                    Ok((mut config, provenance)) => {
                        info!(path = %p.display(), model = %config.registry.model_name, "Loaded pipeline config from PREDMAINT_CONFIG");
                        config.apply_env_overrides();
                        return (config, provenance);
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from PREDMAINT_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "PREDMAINT_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("pipeline_config.toml");
        if local.exists() {
            match Self::load_from_file_with_provenance(&local) {
                Ok((mut config, provenance)) => {
                    info!(model = %config.registry.model_name, "Loaded pipeline config from ./pipeline_config.toml");
                    config.apply_env_overrides();
                    return (config, provenance);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./pipeline_config.toml, using defaults");
                }
            }
        }

        info!("No pipeline_config.toml found, using built-in defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        (config, ConfigProvenance::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let (config, _provenance) = Self::load_from_file_with_provenance(path)?;
        Ok(config)
    }

    /// Load from a specific TOML file path, also returning provenance.
    pub fn load_from_file_with_provenance(
        path: &Path,
    ) -> Result<(Self, ConfigProvenance), ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str_with_provenance(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
                other => other,
            })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys only warn; parse and validation errors are returned.
    pub fn from_toml_str_with_provenance(
        contents: &str,
    ) -> Result<(Self, ConfigProvenance), ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in &super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let provenance = ConfigProvenance {
            explicit_keys: super::validation::walk_toml_keys(
                &contents
                    .parse::<toml::Value>()
                    .unwrap_or(toml::Value::Table(toml::map::Map::default())),
                "",
            )
            .into_iter()
            .collect(),
        };

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok((config, provenance))
    }

    /// Apply `PREDMAINT_*` environment overrides.
    ///
    /// These are populated by the secrets loader / deployment environment
    /// before the pipeline starts.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(source) = std::env::var("PREDMAINT_DATA_SOURCE") {
            info!(source = %source, "Data source overridden by PREDMAINT_DATA_SOURCE");
            self.data.source = PathBuf::from(source);
        }
        if let Ok(uri) = std::env::var("PREDMAINT_REGISTRY_URI") {
            info!(uri = %uri, "Registry URI overridden by PREDMAINT_REGISTRY_URI");
            self.registry.tracking_uri = uri;
        }
        if let Ok(root) = std::env::var("PREDMAINT_ARTIFACT_ROOT") {
            info!(root = %root, "Artifact root overridden by PREDMAINT_ARTIFACT_ROOT");
            self.artifact.root = PathBuf::from(root);
        }
        if let Ok(workers) = std::env::var("PREDMAINT_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) => self.training.workers = n,
                Err(_) => warn!(value = %workers, "Ignoring non-numeric PREDMAINT_WORKERS"),
            }
        }
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Pipeline config saved");
        Ok(())
    }

    /// Validate all parameters for internal consistency.
    ///
    /// Every violation is collected so the operator sees them all at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // Data schema
        let d = &self.data;
        if d.failure_column.trim().is_empty() {
            errors.push("data.failure_column must not be empty".to_string());
        }
        if d.preset_columns.is_empty() {
            errors.push("data.preset_columns must name at least one column".to_string());
        }
        if d.preset_columns.contains(&d.failure_column) {
            errors.push(format!(
                "data.failure_column '{}' cannot also be a preset column",
                d.failure_column
            ));
        }
        for c in &d.continuous_columns {
            if d.preset_columns.contains(c) || *c == d.failure_column {
                errors.push(format!(
                    "data.continuous_columns: '{c}' is already declared as preset or failure column"
                ));
            }
        }

        // Rolling windows
        let f = &self.features;
        Self::check_window(f.diff_window, f.diff_min_periods, "features.diff", &mut errors);
        Self::check_window(f.mean_window, f.mean_min_periods, "features.mean", &mut errors);
        Self::check_window(f.std_window, f.std_min_periods, "features.std", &mut errors);
        if f.std_min_periods < 2 {
            errors.push("features.std_min_periods must be >= 2 (sample std needs two points)".to_string());
        }
        if !(f.percentile > 0.0 && f.percentile < 1.0) {
            errors.push(format!(
                "features.percentile must be in (0, 1), got {}",
                f.percentile
            ));
        }
        if !f.sentinel.is_finite() {
            errors.push("features.sentinel must be a finite number".to_string());
        }

        // Training
        let t = &self.training;
        if !(t.test_ratio > 0.0 && t.test_ratio < 1.0) {
            errors.push(format!(
                "training.test_ratio must be in (0, 1), got {}",
                t.test_ratio
            ));
        }
        if t.cv_folds < 2 {
            errors.push("training.cv_folds must be >= 2".to_string());
        }
        if t.max_iter == 0 {
            errors.push("training.max_iter must be > 0".to_string());
        }
        if !(t.tol.is_finite() && t.tol > 0.0) {
            errors.push("training.tol must be a positive finite number".to_string());
        }
        if t.baseline_c_path == 0 {
            errors.push("training.baseline_c_path must be > 0".to_string());
        }

        let s = &t.search;
        if s.solvers.is_empty() {
            errors.push("training.search.solvers must not be empty".to_string());
        }
        if s.penalties.is_empty() {
            errors.push("training.search.penalties must not be empty".to_string());
        }
        if s.c_path_sizes.is_empty() || s.c_path_sizes.contains(&0) {
            errors.push("training.search.c_path_sizes must be non-empty and all > 0".to_string());
        }
        if s.class_weight_steps == 0 {
            errors.push("training.search.class_weight_steps must be > 0".to_string());
        }
        let (lo, hi) = (s.class_weight_min, s.class_weight_max);
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || hi >= 1.0 || lo > hi {
            errors.push(format!(
                "training.search class weight range must satisfy 0 < min <= max < 1 (got {lo}..{hi})"
            ));
        }

        // Registry
        let r = &self.registry;
        if r.model_name.trim().is_empty() {
            errors.push("registry.model_name must not be empty".to_string());
        }
        if r.alias.trim().is_empty() {
            errors.push("registry.alias must not be empty".to_string());
        }
        if r.backend == RegistryBackend::Mlflow && r.tracking_uri.trim().is_empty() {
            errors.push("registry.tracking_uri is required for the mlflow backend".to_string());
        }

        // Artifact
        let a = &self.artifact;
        if a.path.trim().is_empty() {
            errors.push("artifact.path must not be empty".to_string());
        }
        if a.backend == ArtifactBackend::Http && a.base_url.trim().is_empty() {
            errors.push("artifact.base_url is required for the http backend".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_window(window: usize, min_periods: usize, name: &str, errors: &mut Vec<String>) {
        if window == 0 || min_periods == 0 {
            errors.push(format!("{name}: window and min_periods must be > 0"));
            return;
        }
        if min_periods > window {
            errors.push(format!(
                "{name}: min_periods ({min_periods}) must be <= window ({window})"
            ));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            Self::Parse(path, e) => write!(f, "Config parse error ({}): {}", path.display(), e),
            Self::Serialize(e) => write!(f, "Config serialization error: {e}"),
            Self::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Data
// ============================================================================

/// Where the raw equipment log lives and how its columns are declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path to the delimited dataset
    #[serde(default = "default_data_source")]
    pub source: PathBuf,

    /// Field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Boolean failure indicator column
    #[serde(default = "default_failure_column")]
    pub failure_column: String,

    /// Categorical preset columns (grouping key for per-preset medians)
    #[serde(default = "default_preset_columns")]
    pub preset_columns: Vec<String>,

    /// Explicit continuous sensor columns. Empty = infer float-typed columns.
    #[serde(default)]
    pub continuous_columns: Vec<String>,
}

fn default_data_source() -> PathBuf {
    PathBuf::from(defaults::DATA_SOURCE)
}
const fn default_delimiter() -> char {
    ','
}
fn default_failure_column() -> String {
    defaults::FAILURE_COLUMN.to_string()
}
fn default_preset_columns() -> Vec<String> {
    defaults::PRESET_COLUMNS.iter().map(|s| (*s).to_string()).collect()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: default_data_source(),
            delimiter: default_delimiter(),
            failure_column: default_failure_column(),
            preset_columns: default_preset_columns(),
            continuous_columns: Vec::new(),
        }
    }
}

// ============================================================================
// Features
// ============================================================================

/// Rolling windows, percentile and fill value used by the feature stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_diff_window")]
    pub diff_window: usize,
    #[serde(default = "default_min_periods")]
    pub diff_min_periods: usize,

    #[serde(default = "default_mean_window")]
    pub mean_window: usize,
    #[serde(default = "default_min_periods")]
    pub mean_min_periods: usize,

    #[serde(default = "default_std_window")]
    pub std_window: usize,
    #[serde(default = "default_min_periods")]
    pub std_min_periods: usize,

    /// Per-column percentile for the "high reading" flags
    #[serde(default = "default_percentile")]
    pub percentile: f64,

    /// Fill for the rolling mean/std when history is insufficient
    #[serde(default = "default_sentinel")]
    pub sentinel: f64,
}

const fn default_diff_window() -> usize {
    defaults::DIFF_WINDOW
}
const fn default_mean_window() -> usize {
    defaults::MEAN_WINDOW
}
const fn default_std_window() -> usize {
    defaults::STD_WINDOW
}
const fn default_min_periods() -> usize {
    defaults::ROLLING_MIN_PERIODS
}
const fn default_percentile() -> f64 {
    defaults::HIGH_PERCENTILE
}
const fn default_sentinel() -> f64 {
    defaults::INSUFFICIENT_HISTORY_SENTINEL
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            diff_window: default_diff_window(),
            diff_min_periods: default_min_periods(),
            mean_window: default_mean_window(),
            mean_min_periods: default_min_periods(),
            std_window: default_std_window(),
            std_min_periods: default_min_periods(),
            percentile: default_percentile(),
            sentinel: default_sentinel(),
        }
    }
}

// ============================================================================
// Training
// ============================================================================

/// Split, cross-validation and solver parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Folds for the C-path CV and for the search
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,

    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    #[serde(default = "default_tol")]
    pub tol: f64,

    /// Search worker pool size. 0 = one per available core.
    #[serde(default)]
    pub workers: usize,

    /// Length of the baseline estimator's C path
    #[serde(default = "default_baseline_c_path")]
    pub baseline_c_path: usize,

    #[serde(default)]
    pub search: SearchConfig,
}

const fn default_test_ratio() -> f64 {
    defaults::TEST_RATIO
}
const fn default_seed() -> u64 {
    defaults::SPLIT_SEED
}
const fn default_cv_folds() -> usize {
    defaults::CV_FOLDS
}
const fn default_max_iter() -> usize {
    defaults::MAX_ITER
}
const fn default_tol() -> f64 {
    defaults::TOLERANCE
}
const fn default_baseline_c_path() -> usize {
    defaults::BASELINE_C_PATH
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_ratio: default_test_ratio(),
            seed: default_seed(),
            cv_folds: default_cv_folds(),
            max_iter: default_max_iter(),
            tol: default_tol(),
            workers: 0,
            baseline_c_path: default_baseline_c_path(),
            search: SearchConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Effective worker count for the search pool.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Exhaustive hyperparameter grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_solvers")]
    pub solvers: Vec<Solver>,

    /// Sizes of the log-spaced C path scanned by each candidate
    #[serde(default = "default_c_path_sizes")]
    pub c_path_sizes: Vec<usize>,

    /// Negative-class weight range (positive class gets `1 - w`)
    #[serde(default = "default_class_weight_min")]
    pub class_weight_min: f64,
    #[serde(default = "default_class_weight_max")]
    pub class_weight_max: f64,
    #[serde(default = "default_class_weight_steps")]
    pub class_weight_steps: usize,

    #[serde(default = "default_penalties")]
    pub penalties: Vec<Penalty>,
}

fn default_solvers() -> Vec<Solver> {
    vec![Solver::Liblinear, Solver::Lbfgs]
}
fn default_c_path_sizes() -> Vec<usize> {
    defaults::SEARCH_C_PATH_SIZES.to_vec()
}
const fn default_class_weight_min() -> f64 {
    defaults::CLASS_WEIGHT_RANGE.0
}
const fn default_class_weight_max() -> f64 {
    defaults::CLASS_WEIGHT_RANGE.1
}
const fn default_class_weight_steps() -> usize {
    defaults::CLASS_WEIGHT_STEPS
}
fn default_penalties() -> Vec<Penalty> {
    vec![Penalty::L1, Penalty::L2]
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            solvers: default_solvers(),
            c_path_sizes: default_c_path_sizes(),
            class_weight_min: default_class_weight_min(),
            class_weight_max: default_class_weight_max(),
            class_weight_steps: default_class_weight_steps(),
            penalties: default_penalties(),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// Embedded sled database under `registry.path`
    Local,
    /// MLflow tracking server at `registry.tracking_uri`
    Mlflow,
}

/// Model registry connection, naming and version metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_backend")]
    pub backend: RegistryBackend,

    /// Local backend database directory
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// MLflow tracking server URL
    #[serde(default = "default_tracking_uri")]
    pub tracking_uri: String,

    /// Environment variable holding the tracking server bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_experiment")]
    pub experiment: String,

    #[serde(default = "default_run_name")]
    pub run_name: String,

    /// Path of the logged model inside the run's artifacts
    #[serde(default = "default_run_artifact_path")]
    pub artifact_path: String,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Alias repointed to every new version
    #[serde(default = "default_alias")]
    pub alias: String,

    /// Tags attached to every new version
    #[serde(default = "default_tags")]
    pub tags: BTreeMap<String, String>,

    #[serde(default = "default_input_example_rows")]
    pub input_example_rows: usize,
}

const fn default_registry_backend() -> RegistryBackend {
    RegistryBackend::Local
}
fn default_registry_path() -> PathBuf {
    PathBuf::from("./data/registry")
}
fn default_tracking_uri() -> String {
    "http://localhost:5000".to_string()
}
fn default_token_env() -> String {
    "MLFLOW_TRACKING_TOKEN".to_string()
}
fn default_experiment() -> String {
    defaults::EXPERIMENT_NAME.to_string()
}
fn default_run_name() -> String {
    defaults::RUN_NAME.to_string()
}
fn default_run_artifact_path() -> String {
    defaults::RUN_ARTIFACT_PATH.to_string()
}
fn default_model_name() -> String {
    defaults::MODEL_NAME.to_string()
}
fn default_alias() -> String {
    defaults::MODEL_ALIAS.to_string()
}
fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("author".to_string(), "JP".to_string()),
        ("stage".to_string(), "Dev".to_string()),
    ])
}
const fn default_input_example_rows() -> usize {
    defaults::INPUT_EXAMPLE_ROWS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: default_registry_backend(),
            path: default_registry_path(),
            tracking_uri: default_tracking_uri(),
            token_env: default_token_env(),
            experiment: default_experiment(),
            run_name: default_run_name(),
            artifact_path: default_run_artifact_path(),
            model_name: default_model_name(),
            alias: default_alias(),
            tags: default_tags(),
            input_example_rows: default_input_example_rows(),
        }
    }
}

// ============================================================================
// Artifact Store
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactBackend {
    /// Files under `artifact.root`
    Local,
    /// HTTP PUT/GET against `artifact.base_url`
    Http,
}

/// Where the serialized model is persisted independently of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_backend")]
    pub backend: ArtifactBackend,

    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,

    /// Destination path relative to the root / base URL
    #[serde(default = "default_artifact_path")]
    pub path: String,

    #[serde(default)]
    pub base_url: String,

    /// Environment variable holding the object storage bearer token
    #[serde(default = "default_artifact_token_env")]
    pub token_env: String,

    /// Write the artifact before registering the version
    #[serde(default)]
    pub persist_before_register: bool,
}

const fn default_artifact_backend() -> ArtifactBackend {
    ArtifactBackend::Local
}
fn default_artifact_root() -> PathBuf {
    PathBuf::from(defaults::ARTIFACT_ROOT)
}
fn default_artifact_path() -> String {
    defaults::ARTIFACT_PATH.to_string()
}
fn default_artifact_token_env() -> String {
    "PREDMAINT_ARTIFACT_TOKEN".to_string()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            backend: default_artifact_backend(),
            root: default_artifact_root(),
            path: default_artifact_path(),
            base_url: String::new(),
            token_env: default_artifact_token_env(),
            persist_before_register: false,
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

/// Defaults for the `predict` entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_input")]
    pub input: PathBuf,

    #[serde(default = "default_inference_output")]
    pub output: PathBuf,
}

fn default_inference_input() -> PathBuf {
    PathBuf::from("data/new_equipment_data.csv")
}
fn default_inference_output() -> PathBuf {
    PathBuf::from("data/predictions.csv")
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            input: default_inference_input(),
            output: default_inference_output(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.cv_folds, 6);
        assert_eq!(config.registry.alias, "dev");
        assert_eq!(config.registry.tags.get("author").map(String::as_str), Some("JP"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
[training]
seed = 7

[registry]
model_name = "pump_failure"
"#;
        let (config, provenance) =
            PipelineConfig::from_toml_str_with_provenance(toml_str).expect("parse");
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.test_ratio, 0.2);
        assert_eq!(config.registry.model_name, "pump_failure");
        assert!(provenance.is_user_set("training.seed"));
        assert!(!provenance.is_user_set("training.test_ratio"));
    }

    #[test]
    fn enums_parse_from_snake_case() {
        let toml_str = r#"
[training.search]
solvers = ["lbfgs"]
penalties = ["l2"]

[registry]
backend = "mlflow"
"#;
        let (config, _) = PipelineConfig::from_toml_str_with_provenance(toml_str).expect("parse");
        assert_eq!(config.training.search.solvers, vec![Solver::Lbfgs]);
        assert_eq!(config.training.search.penalties, vec![Penalty::L2]);
        assert_eq!(config.registry.backend, RegistryBackend::Mlflow);
    }

    #[test]
    fn validation_collects_every_error() {
        let mut config = PipelineConfig::default();
        config.training.test_ratio = 1.5;
        config.training.cv_folds = 1;
        config.features.mean_min_periods = 9;
        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn class_weight_range_must_stay_inside_unit_interval() {
        let mut config = PipelineConfig::default();
        config.training.search.class_weight_max = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = PipelineConfig::default();
        let text = config.to_toml().expect("serialize");
        let (parsed, _) = PipelineConfig::from_toml_str_with_provenance(&text).expect("parse");
        assert_eq!(parsed.registry.model_name, config.registry.model_name);
        assert_eq!(parsed.training.search.c_path_sizes, vec![1, 10, 100]);
    }
}
