// ============================================================
// Layer 3 — Data Errors
// ============================================================
// One error type for everything between "open a dump file"
// and "hand a padded batch to the trainer".
//
// Clean end of a tensor stream is NOT an error: the reader
// returns Ok(None) for it. Everything below is a real failure.
//
// Reference: Rust Book §9 (Error Handling)

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record #{record} in '{path}': {reason}")]
    Malformed {
        path:   PathBuf,
        record: usize,
        reason: String,
    },

    #[error("Unsupported dtype '{descr}' in '{path}'")]
    UnsupportedDtype { path: PathBuf, descr: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Misaligned parallel streams at batch {batch}: {reason}")]
    MisalignedStreams { batch: usize, reason: String },

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Array shape error: {0}")]
    ArrayShape(#[from] ndarray::ShapeError),

    #[error("Invalid sample index: {index} >= {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Cache error in '{path}': {source}")]
    Cache {
        path:   PathBuf,
        #[source]
        source: bincode::Error,
    },
}
