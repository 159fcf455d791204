//! # Image Processing Module
//!
//! Ricodifica di una singola immagine tramite il motore esterno.
//!
//! ## Pipeline:
//! 1. Confinamento dei path nelle radici sorgente/destinazione
//! 2. Lettura dimensioni dall'header per un ridimensionamento esatto
//!    (nessun upscaling, aspect ratio preservato)
//! 3. Ricodifica con qualità dipendente dal formato
//! 4. In caso di fallimento: una sola copia verbatim della sorgente

use super::args::image_args;
use super::{copy_fallback, run_engine, AttemptStep, FailedAttempt, FailureReason, TranscodeContext, TranscodeOutcome};
use crate::file_manager::FileManager;
use crate::probe;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Handles image compression
pub struct ImageTranscoder {
    context: Arc<TranscodeContext>,
}

impl ImageTranscoder {
    pub fn new(context: Arc<TranscodeContext>) -> Self {
        Self { context }
    }

    pub async fn compress(&self, source: &Path, target: &Path) -> TranscodeOutcome {
        let (source, target) = match self.context.confine(source, target) {
            Ok(paths) => paths,
            Err(failure) => {
                return TranscodeOutcome::HardFailure {
                    failures: vec![failure],
                }
            }
        };

        match self.encode(&source, &target).await {
            Ok(size) => {
                debug!(
                    "🖼️ {} -> {} ({})",
                    source.display(),
                    target.display(),
                    FileManager::format_size(size)
                );
                TranscodeOutcome::Success {
                    size,
                    encoder: None,
                    failures: Vec::new(),
                }
            }
            Err(reason) => {
                debug!("Image compression failed for {}: {}", source.display(), reason);
                let failures = vec![FailedAttempt {
                    step: AttemptStep::Image,
                    reason,
                }];
                copy_fallback(&source, &target, failures).await
            }
        }
    }

    async fn encode(&self, source: &Path, target: &Path) -> Result<u64, FailureReason> {
        FileManager::ensure_parent_dirs(target)
            .await
            .map_err(|e| FailureReason::Io(e.to_string()))?;

        let dimensions = probe::image_dimensions(source).await.ok();
        let extension = target
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        let staging = FileManager::staging_path(target);
        let args = image_args(source, &staging, &extension, dimensions, &self.context.config);

        run_engine(&self.context, &args, &staging, target).await
    }
}
