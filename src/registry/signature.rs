//! Model signature and input example for logged models.

use crate::training::Matrix;
use crate::types::{ColumnSpec, ModelSignature};

/// Inputs are the named feature columns as doubles; the output is one
/// integer class per row.
pub fn infer_signature(feature_names: &[String]) -> ModelSignature {
    ModelSignature {
        inputs: feature_names
            .iter()
            .map(|name| ColumnSpec {
                name: Some(name.clone()),
                dtype: "double".to_string(),
            })
            .collect(),
        outputs: vec![ColumnSpec {
            name: None,
            dtype: "long".to_string(),
        }],
        output_shape: vec![-1],
    }
}

/// First `rows` rows of the scaled test matrix.
pub fn input_example(x: &Matrix, rows: usize) -> Vec<Vec<f64>> {
    x.head(rows)
}
