//! # Media Compressor Library
//!
//! Motore di compressione batch per immagini e video, con pausa/ripresa,
//! catena di fallback degli encoder e checkpoint resistenti ai crash.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi principali tramite re-exports per `main.rs` e altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Configurazione tipizzata, default e validazione
//! - `error`: Errori a livello di batch
//! - `model`: `MediaFile`, classificazione e stati per file
//! - `file_manager`: Discovery, copia verbatim con staging, spazio su disco
//! - `catalog`: Catalogo dei file scansionati, esclusioni e totali
//! - `estimator`: Stima della dimensione dopo la compressione
//! - `probe`: Metadati via `ffprobe` e header delle immagini
//! - `encoders`: Tabelle encoder/container e risoluzione con fallback hardware
//! - `transcoder`: Singola compressione tramite il motore esterno
//! - `checkpoint`: Persistenza dello stato di un'esecuzione
//! - `orchestrator`: Scheduler, worker, pausa/ripresa/stop
//! - `platform`: Individuazione dei binari del motore
//! - `progress`: Barra di avanzamento
//! - `json_output`: Eventi in formato JSON lines
//!
//! ## Utilizzo:
//! ```rust,no_run
//! use media_compressor::{CompressionOrchestrator, Config, FileCatalog, SizeEstimator};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), media_compressor::CompressError> {
//! let config = Config::default();
//! let estimator = SizeEstimator::new("ffprobe");
//! let catalog = FileCatalog::scan(Path::new("/photos"), &config, Some(&estimator)).await?;
//! let orchestrator = CompressionOrchestrator::new(config, Arc::new(catalog), "/photos-small")?;
//! let summary = orchestrator.start(None).await?.wait().await?;
//! println!("{}", summary.format_summary());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod encoders;
pub mod error;
pub mod estimator;
pub mod file_manager;
pub mod json_output;
pub mod model;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod progress;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{CatalogTotals, FileCatalog};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::Config;
pub use encoders::{EncoderCatalog, HardwareClass, Resolution};
pub use error::CompressError;
pub use estimator::SizeEstimator;
pub use json_output::RunEvent;
pub use model::{MediaFile, MediaKind, MediaStatus};
pub use orchestrator::control::Command;
pub use orchestrator::run_stats::{ProgressSnapshot, RunSummary};
pub use orchestrator::{CompressionOrchestrator, RunController, RunHandle};
pub use transcoder::{MediaTranscoder, TranscodeOutcome};
