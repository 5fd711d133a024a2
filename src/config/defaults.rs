//! Pipeline default constants.
//!
//! Centralises the numbers the training job was originally written with.
//! Grouped by stage for easy discovery.

// ============================================================================
// Data
// ============================================================================

/// Name of the boolean failure indicator column.
pub const FAILURE_COLUMN: &str = "Fail";

/// Preset (categorical) columns used for per-group medians.
pub const PRESET_COLUMNS: [&str; 2] = ["Preset_1", "Preset_2"];

/// Default dataset location.
pub const DATA_SOURCE: &str = "data/O_G_Equipment_Data.csv";

// ============================================================================
// Feature Engineering
// ============================================================================

/// Rolling window (rows) for the cumulative first difference of the sum.
pub const DIFF_WINDOW: usize = 4;

/// Rolling window (rows) for the moving average of the sum.
pub const MEAN_WINDOW: usize = 4;

/// Rolling window (rows) for the moving standard deviation of the sum.
pub const STD_WINDOW: usize = 3;

/// Minimum observations before any rolling statistic is produced.
pub const ROLLING_MIN_PERIODS: usize = 2;

/// Per-column percentile above which a sensor reading is flagged high.
pub const HIGH_PERCENTILE: f64 = 0.85;

/// Fill value for rolling features with insufficient history.
///
/// Out of range for both features: "no history, assume non-failing context".
pub const INSUFFICIENT_HISTORY_SENTINEL: f64 = -1.0;

// ============================================================================
// Training
// ============================================================================

/// Fraction of labeled rows held out for evaluation.
pub const TEST_RATIO: f64 = 0.2;

/// Seed for the train/test permutation.
pub const SPLIT_SEED: u64 = 42;

/// Folds for both the C-path CV and the hyperparameter search.
pub const CV_FOLDS: usize = 6;

/// Length of the baseline estimator's log-spaced C path.
pub const BASELINE_C_PATH: usize = 10;

/// Lower/upper bound of the C path exponent: `C in logspace(-4, 4)`.
pub const C_PATH_LOG10_RANGE: (f64, f64) = (-4.0, 4.0);

/// Solver iteration cap.
pub const MAX_ITER: usize = 1000;

/// Solver convergence tolerance.
pub const TOLERANCE: f64 = 1e-4;

/// C path sizes searched by the grid.
pub const SEARCH_C_PATH_SIZES: [usize; 3] = [1, 10, 100];

/// Negative-class weight range; the positive class gets `1 - w`.
pub const CLASS_WEIGHT_RANGE: (f64, f64) = (0.2, 0.8);

/// Number of linearly spaced class-weight configurations.
pub const CLASS_WEIGHT_STEPS: usize = 4;

// ============================================================================
// Registry
// ============================================================================

pub const EXPERIMENT_NAME: &str = "equip_failure";
pub const RUN_NAME: &str = "testing";
pub const RUN_ARTIFACT_PATH: &str = "model";
pub const MODEL_NAME: &str = "logistic_equip_fail";
pub const MODEL_ALIAS: &str = "dev";

/// Rows of the test matrix attached to the logged model as an input example.
pub const INPUT_EXAMPLE_ROWS: usize = 5;

// ============================================================================
// Artifact Store
// ============================================================================

pub const ARTIFACT_ROOT: &str = "./data/refined";
pub const ARTIFACT_PATH: &str = "project1/models/model.bin.zst";

/// Zstd compression level for serialized models (matches fleet convention).
pub const ZSTD_LEVEL: i32 = 3;
