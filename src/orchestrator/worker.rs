//! # Worker Module
//!
//! Ciclo di un worker: prende un file dalla coda, lo comprime, registra
//! lo stato terminale.
//!
//! ## Per ogni file:
//! 1. Attesa al confine tra file (pausa/stop)
//! 2. Con stop richiesto: il file diventa `Stopped` senza essere toccato
//! 3. `Waiting → Running`
//! 4. Target già esistente: `Skipped` (completato da un'esecuzione precedente)
//! 5. Altrimenti compressione (o copia per i file non-media) e stato terminale

use super::control::PauseGate;
use super::path_resolver::PathResolver;
use super::RunState;
use crate::file_manager::FileManager;
use crate::json_output::RunEvent;
use crate::model::{MediaFile, MediaStatus};
use crate::transcoder::{MediaTranscoder, TranscodeOutcome};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal result of one file
#[derive(Debug, Clone, PartialEq)]
pub struct FileResult {
    pub status: MediaStatus,
    pub actual_size: u64,
    pub encoder: Option<&'static str>,
    pub error: Option<String>,
}

impl FileResult {
    fn with_status(status: MediaStatus, actual_size: u64) -> Self {
        Self {
            status,
            actual_size,
            encoder: None,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::with_status(MediaStatus::Failed, 0)
        }
    }
}

impl From<&TranscodeOutcome> for FileResult {
    fn from(outcome: &TranscodeOutcome) -> Self {
        let encoder = match outcome {
            TranscodeOutcome::Success { encoder, .. } => *encoder,
            _ => None,
        };
        Self {
            status: outcome.status(),
            actual_size: outcome.output_size(),
            encoder,
            error: outcome.error_message(),
        }
    }
}

pub(crate) async fn run_worker(id: usize, state: Arc<RunState>, mut gate: PauseGate) {
    debug!("Worker {} started", id);

    loop {
        let proceed = gate.wait_turn().await;
        let Some(index) = state.next_task() else {
            break;
        };

        if !proceed {
            state.finish(index, FileResult::with_status(MediaStatus::Stopped, 0));
            continue;
        }

        if !state.catalog.mark_running(index) {
            warn!("File #{} was not waiting, leaving it alone", index);
            state.count_done();
            continue;
        }

        let result = process(&state, index).await;
        state.finish(index, result);
    }

    debug!("Worker {} finished", id);
}

async fn process(state: &RunState, index: usize) -> FileResult {
    let file = match state.catalog.file(index) {
        Ok(file) => file.clone(),
        Err(e) => return FileResult::failed(e.to_string()),
    };
    let config = &state.context.config;
    let source = file.source_path();
    let target = match state.target_of(index) {
        Some(target) => target.to_path_buf(),
        None => PathResolver::target_path(&file, &state.context.target_root, config),
    };

    state.emit(RunEvent::FileStarted {
        index,
        path: file.relative_path(),
    });

    if let Some(size) = existing_target(&target).await {
        info!("⏭️ Skipping {}, target already exists", file.relative_path().display());
        return FileResult::with_status(MediaStatus::Skipped, size);
    }

    match MediaTranscoder::for_kind(file.kind, state.context.clone()) {
        Some(transcoder) => {
            let outcome = transcoder.compress(&source, &target).await;
            FileResult::from(&outcome)
        }
        None => passthrough(state, &file, &source, &target).await,
    }
}

/// Non-media files selected into a run are copied as they are
async fn passthrough(state: &RunState, file: &MediaFile, source: &Path, target: &Path) -> FileResult {
    let (source, target) = match state.context.confine(source, target) {
        Ok(paths) => paths,
        Err(failure) => return FileResult::failed(failure.reason.to_string()),
    };

    match FileManager::copy_verbatim(&source, &target).await {
        Ok(size) => {
            debug!("📄 Copied {} as-is", file.relative_path().display());
            FileResult::with_status(MediaStatus::Completed, size)
        }
        Err(e) => FileResult::failed(e.to_string()),
    }
}

async fn existing_target(target: &Path) -> Option<u64> {
    match tokio::fs::metadata(target).await {
        Ok(metadata) if metadata.is_file() => Some(metadata.len()),
        _ => None,
    }
}
