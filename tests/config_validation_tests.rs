//! Config Validation Tests
//!
//! Typo detection, range validation and file loading for `PipelineConfig`,
//! exercised independently from the rest of the pipeline.

use std::io::Write;

use predmaint::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use predmaint::config::{ArtifactBackend, ConfigError, PipelineConfig, RegistryBackend};
use predmaint::types::{Penalty, Solver};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_search_section_warns_with_suggestion() {
    let toml_str = r#"
[training.search]
class_weight_setps = 3
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].field, "training.search.class_weight_setps");
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("training.search.class_weight_steps")
    );
}

#[test]
fn far_off_key_warns_without_suggestion() {
    let warnings = validate_unknown_keys("[registry]\ncompletely_unrelated = 1\n");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].suggestion.is_none());
}

#[test]
fn version_tags_are_free_form() {
    let toml_str = r#"
[registry.tags]
author = "JP"
stage = "Dev"
team = "reliability"
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
}

#[test]
fn every_default_key_is_known() {
    let toml_str = PipelineConfig::default().to_toml().unwrap();
    let warnings = validate_unknown_keys(&toml_str);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
}

#[test]
fn suggestion_needs_close_match() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("data.delimeter", &known).as_deref(),
        Some("data.delimiter")
    );
    assert_eq!(suggest_correction("xyz", &known), None);
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn full_config_parses() {
    let toml_str = r#"
[data]
source = "data/pump_station.csv"
delimiter = ";"
failure_column = "Failed"
preset_columns = ["Mode", "Speed"]

[features]
diff_window = 6
diff_min_periods = 3
mean_window = 5
mean_min_periods = 2
std_window = 4
std_min_periods = 2
percentile = 0.9
sentinel = -999.0

[training]
test_ratio = 0.25
seed = 7
cv_folds = 5
max_iter = 500
tol = 1e-5
workers = 4
baseline_c_path = 20

[training.search]
solvers = ["liblinear"]
penalties = ["l1", "l2"]
c_path_sizes = [5, 50]
class_weight_min = 0.3
class_weight_max = 0.7
class_weight_steps = 3

[registry]
backend = "mlflow"
tracking_uri = "http://mlflow.internal:5000"
experiment = "pump_failure"
model_name = "logistic_pump_fail"
alias = "staging"

[registry.tags]
author = "ops"

[artifact]
backend = "http"
base_url = "http://minio.internal:9000/refined"
path = "pumps/model.bin.zst"
persist_before_register = true
"#;
    let (config, provenance) = PipelineConfig::from_toml_str_with_provenance(toml_str).unwrap();
    assert_eq!(config.data.delimiter, ';');
    assert_eq!(config.data.preset_columns, vec!["Mode", "Speed"]);
    assert_eq!(config.features.diff_window, 6);
    assert!((config.features.sentinel - -999.0).abs() < f64::EPSILON);
    assert_eq!(config.training.cv_folds, 5);
    assert_eq!(config.training.effective_workers(), 4);
    assert_eq!(config.training.search.solvers, vec![Solver::Liblinear]);
    assert_eq!(config.training.search.penalties, vec![Penalty::L1, Penalty::L2]);
    assert_eq!(config.registry.backend, RegistryBackend::Mlflow);
    assert_eq!(config.registry.tags.len(), 1);
    assert_eq!(config.artifact.backend, ArtifactBackend::Http);
    assert!(config.artifact.persist_before_register);

    assert!(provenance.is_user_set("training.seed"));
    assert!(!provenance.is_user_set("registry.run_name"));
    // Unset keys keep their defaults
    assert_eq!(config.registry.run_name, "testing");
}

#[test]
fn bad_ranges_are_all_reported() {
    let toml_str = r#"
[features]
mean_window = 2
mean_min_periods = 3
percentile = 1.5

[training]
test_ratio = 0.0
cv_folds = 1

[training.search]
class_weight_min = 0.9
class_weight_max = 0.1
"#;
    match PipelineConfig::from_toml_str_with_provenance(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 5, "errors: {errors:#?}");
            assert!(errors.iter().any(|e| e.contains("features.mean")));
            assert!(errors.iter().any(|e| e.contains("percentile")));
            assert!(errors.iter().any(|e| e.contains("test_ratio")));
            assert!(errors.iter().any(|e| e.contains("cv_folds")));
            assert!(errors.iter().any(|e| e.contains("class weight")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn remote_backends_need_endpoints() {
    let toml_str = r#"
[registry]
backend = "mlflow"
tracking_uri = ""

[artifact]
backend = "http"
"#;
    let Err(ConfigError::Validation(errors)) =
        PipelineConfig::from_toml_str_with_provenance(toml_str)
    else {
        panic!("expected validation error");
    };
    assert!(errors.iter().any(|e| e.contains("tracking_uri")));
    assert!(errors.iter().any(|e| e.contains("base_url")));
}

#[test]
fn unknown_solver_is_a_parse_error() {
    let toml_str = "[training.search]\nsolvers = [\"saga\"]\n";
    assert!(matches!(
        PipelineConfig::from_toml_str_with_provenance(toml_str),
        Err(ConfigError::Parse(..))
    ));
}

// ============================================================================
// File Loading
// ============================================================================

#[test]
fn load_from_file_reports_path_on_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[training\ncv_folds = 3").unwrap();
    match PipelineConfig::load_from_file(file.path()) {
        Err(ConfigError::Parse(path, _)) => assert_eq!(path, file.path()),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        PipelineConfig::load_from_file(&path),
        Err(ConfigError::Io(..))
    ));
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline_config.toml");
    let mut config = PipelineConfig::default();
    config.training.seed = 1234;
    config.registry.alias = "prod".to_string();
    config.save_to_file(&path).unwrap();

    let loaded = PipelineConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.training.seed, 1234);
    assert_eq!(loaded.registry.alias, "prod");
    assert_eq!(loaded.data.source, config.data.source);
}
