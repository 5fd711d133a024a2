//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// Maximum edit distance for a "did you mean?" suggestion.
const MAX_SUGGESTION_DISTANCE: usize = 2;

/// Tables whose children are free-form (user-chosen keys).
const OPEN_TABLES: &[&str] = &["registry.tags"];

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `PipelineConfig`.
///
/// Maintained by hand to match the struct hierarchy in pipeline_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [data]
        "data",
        "data.source",
        "data.delimiter",
        "data.failure_column",
        "data.preset_columns",
        "data.continuous_columns",
        // [features]
        "features",
        "features.diff_window",
        "features.diff_min_periods",
        "features.mean_window",
        "features.mean_min_periods",
        "features.std_window",
        "features.std_min_periods",
        "features.percentile",
        "features.sentinel",
        // [training]
        "training",
        "training.test_ratio",
        "training.seed",
        "training.cv_folds",
        "training.max_iter",
        "training.tol",
        "training.workers",
        "training.baseline_c_path",
        // [training.search]
        "training.search",
        "training.search.solvers",
        "training.search.c_path_sizes",
        "training.search.class_weight_min",
        "training.search.class_weight_max",
        "training.search.class_weight_steps",
        "training.search.penalties",
        // [registry]
        "registry",
        "registry.backend",
        "registry.path",
        "registry.tracking_uri",
        "registry.token_env",
        "registry.experiment",
        "registry.run_name",
        "registry.artifact_path",
        "registry.model_name",
        "registry.alias",
        "registry.tags",
        "registry.input_example_rows",
        // [artifact]
        "artifact",
        "artifact.backend",
        "artifact.root",
        "artifact.path",
        "artifact.base_url",
        "artifact.token_env",
        "artifact.persist_before_register",
        // [inference]
        "inference",
        "inference.input",
        "inference.output",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

fn is_open_table_child(key: &str) -> bool {
    OPEN_TABLES.iter().any(|t| {
        key.strip_prefix(t)
            .is_some_and(|rest| rest.starts_with('.'))
    })
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 2.
///
/// Ties resolve to the lexicographically smallest key so output is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= MAX_SUGGESTION_DISTANCE)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Never fails: a document that does not parse yields no warnings and the
/// parse error is reported by serde afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()) && !is_open_table_child(key))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("seed", "seed"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("percentle", "percentile"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [training]
            [training.search]
            penalties = ["l2"]
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"training".to_string()));
        assert!(keys.contains(&"training.search".to_string()));
        assert!(keys.contains(&"training.search.penalties".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[features]
percentil = 0.9
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "features.percentil");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("features.percentile")
        );
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[data]
source = "data/x.csv"

[training.search]
solvers = ["liblinear"]

[registry]
model_name = "pump"

[registry.tags]
author = "ops"
team = "reliability"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let warnings = validate_unknown_keys("[serving]\nport = 8080\n");
        assert!(warnings.iter().any(|w| w.field == "serving"));
        assert!(warnings.iter().any(|w| w.field == "serving.port"));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_unparseable_toml_yields_no_warnings() {
        assert!(validate_unknown_keys("[training\nseed = ").is_empty());
    }
}
