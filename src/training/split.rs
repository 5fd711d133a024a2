//! Seeded train/test partition.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::types::LabeledDataset;

/// Disjoint train/test subsets of a labeled dataset.
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train: LabeledDataset,
    pub test: LabeledDataset,
    /// Positions of the train rows in the source dataset
    pub train_index: Vec<usize>,
    pub test_index: Vec<usize>,
}

/// Number of held-out rows: `ceil(ratio * n)`.
pub fn test_size(n: usize, ratio: f64) -> usize {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let size = (ratio * n as f64).ceil() as usize;
    size.min(n)
}

/// Shuffle row positions with `seed`, take the first `test_size` as test and
/// the rest as train. Each subset keeps the source's relative order.
pub fn train_test_split(data: &LabeledDataset, ratio: f64, seed: u64) -> TrainTestSplit {
    let n = data.len();
    let n_test = test_size(n, ratio);

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut test_index = order[..n_test].to_vec();
    let mut train_index = order[n_test..].to_vec();
    test_index.sort_unstable();
    train_index.sort_unstable();

    let subset = |idx: &[usize]| LabeledDataset {
        features: idx.iter().map(|&i| data.features[i]).collect(),
        labels: idx.iter().map(|&i| data.labels[i]).collect(),
    };

    TrainTestSplit {
        train: subset(&train_index),
        test: subset(&test_index),
        train_index,
        test_index,
    }
}
