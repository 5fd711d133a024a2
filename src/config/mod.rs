//! Pipeline Configuration Module
//!
//! Provides per-deployment configuration loaded from TOML files, replacing the
//! hardcoded dataset paths, feature windows, search grid and registry names
//! with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `PREDMAINT_CONFIG` environment variable (path to TOML file)
//! 2. `pipeline_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Environment overrides (`PREDMAINT_DATA_SOURCE`, `PREDMAINT_REGISTRY_URI`,
//! `PREDMAINT_ARTIFACT_ROOT`, `PREDMAINT_WORKERS`) are applied on top.
//!
//! ## Usage
//!
//! The CLI calls `config::init()` once at startup. Library entry points
//! (`predmaint::train`, `predmaint::predict`) take a `&PipelineConfig`
//! explicitly so tests can run several configurations side by side.
//!
//! ```ignore
//! config::init(PipelineConfig::load());
//! let model_name = &config::get().registry.model_name;
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;

use std::sync::OnceLock;

/// Global pipeline configuration, initialized once at startup.
static PIPELINE_CONFIG: OnceLock<PipelineConfig> = OnceLock::new();

/// Initialize the global pipeline configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: PipelineConfig) {
    if PIPELINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global pipeline configuration.
///
/// Panics if `init()` has not been called. A missing config is a startup bug.
#[allow(clippy::expect_used)]
pub fn get() -> &'static PipelineConfig {
    PIPELINE_CONFIG
        .get()
        .expect("config::get() called before config::init()")
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    PIPELINE_CONFIG.get().is_some()
}
