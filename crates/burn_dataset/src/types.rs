//! Error definitions for burn_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, BurnDatasetError>;

#[derive(Debug, Error)]
pub enum BurnDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unknown image id {0}")]
    UnknownImage(u64),
    #[error("image {image_id}: mask is {got:?}, image is {expected:?}")]
    MaskShape {
        image_id: u64,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error(transparent)]
    Config(#[from] data_contracts::ConfigError),
    #[error("{0}")]
    Other(String),
}
