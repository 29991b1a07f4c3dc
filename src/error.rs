//! Error types for the analytics pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} archive not found at {}; run `{producer}` first", path.display())]
    ArchiveNotFound {
        kind: &'static str,
        path: PathBuf,
        producer: &'static str,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
