//! # Error Types Module
//!
//! Questo modulo definisce gli errori a livello di batch.
//!
//! ## Responsabilità:
//! - Definisce `CompressError` per le condizioni che interrompono un'intera esecuzione
//! - Integra con `thiserror` per la conversione automatica degli errori standard
//!
//! Gli errori per singolo file non passano da qui: restano confinati al file
//! (`transcoder::FailureReason`) e diventano uno stato terminale del task.
//! Le ragioni di incompatibilità encoder vivono in `encoders::CompatibilityError`.
//!
//! ## Esempio:
//! ```rust,ignore
//! if selection.is_empty() {
//!     return Err(CompressError::EmptySelection);
//! }
//! ```

use std::path::PathBuf;

/// Batch-level errors surfaced to the caller of a run
#[derive(thiserror::Error, Debug)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot prepare target root {path}: {source}")]
    TargetRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("The engine reports no usable video encoders")]
    NoEncoders,

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Nothing to compress: the selection is empty")]
    EmptySelection,

    #[error("Index {index} is out of range for a catalog of {len} files")]
    InvalidIndex { index: usize, len: usize },

    #[error("Not enough space on target volume: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("Run task failed: {0}")]
    TaskFailed(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
