//! Engine error types
//!
//! Configuration and I/O failures surface as [`EngineError`]; contract
//! violations (killing the sole survivor, double allocation, writing an
//! out-of-range instruction) are engine bugs and panic instead.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ancestor file {file:?} line {line_no}: unknown mnemonic {line:?}")]
    UnknownMnemonic {
        file: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error("snapshot format error: {0}")]
    SnapshotFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
