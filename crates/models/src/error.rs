use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] data_contracts::ConfigError),
    #[error("backbone strides {0:?} must start at 2 or more and double level by level")]
    Strides(Vec<usize>),
    #[error("{images} images given with {metas} image metas")]
    BatchMismatch { images: usize, metas: usize },
    #[error("images are {got:?}, the model expects {expected:?}")]
    ImageShape {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("weights at {path}: {message}")]
    Record { path: PathBuf, message: String },
}
