use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("pretrained generator weights not found at {path}")]
    MissingPretrainedWeights { path: PathBuf },

    #[error("failed to load weights from {path}: {source}")]
    WeightsLoad {
        path: PathBuf,
        source: burn::record::RecorderError,
    },

    #[error("data source produced no batches")]
    EmptyDataSource,
}

impl TrainError {
    pub fn shape_mismatch(
        context: &'static str,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        TrainError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
