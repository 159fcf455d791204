//! # Video Processing Module
//!
//! Ricodifica di un singolo video con l'encoder risolto per il container
//! di destinazione.
//!
//! ## Catena di fallback:
//! - encoder GPU → encoder CPU per lo stesso container → copia verbatim
//! - encoder CPU → copia verbatim
//! - un timeout salta il secondo tentativo e va direttamente alla copia
//! - container sconosciuto o nessun encoder compatibile: fallimento senza copia

use super::args::video_args;
use super::{copy_fallback, run_engine, AttemptStep, FailedAttempt, FailureReason, TranscodeContext, TranscodeOutcome};
use crate::encoders::{HardwareClass, Resolution};
use crate::file_manager::FileManager;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct VideoTranscoder {
    context: Arc<TranscodeContext>,
}

impl VideoTranscoder {
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

        let container_ext = target
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let config = &self.context.config;
        self.context
            .encoders
            .probe_available(&self.context.tools.ffmpeg)
            .await;

        let resolution = match self
            .context
            .encoders
            .resolve(&container_ext, config.hardware_mode, config)
        {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("❌ {}: {}", source.display(), e);
                return TranscodeOutcome::HardFailure {
                    failures: vec![FailedAttempt {
                        step: AttemptStep::Setup,
                        reason: FailureReason::EncoderUnavailable(e.to_string()),
                    }],
                };
            }
        };

        if resolution.downgraded() {
            info!(
                "🔄 {} not usable for {}, encoding with {}",
                resolution.requested, container_ext, resolution.encoder.name
            );
        }

        if let Err(e) = FileManager::ensure_parent_dirs(&target).await {
            let failures = vec![FailedAttempt {
                step: AttemptStep::Setup,
                reason: FailureReason::Io(e.to_string()),
            }];
            return copy_fallback(&source, &target, failures).await;
        }

        let mut failures = Vec::new();
        match self.attempt(&source, &target, &resolution).await {
            Ok(size) => {
                return TranscodeOutcome::Success {
                    size,
                    encoder: Some(resolution.encoder.name),
                    failures,
                }
            }
            Err(failure) => failures.push(failure),
        }

        let timed_out = failures
            .iter()
            .any(|f| matches!(f.reason, FailureReason::TimedOut(_)));

        if resolution.hardware.is_gpu() && !timed_out {
            match self
                .context
                .encoders
                .resolve(&container_ext, HardwareClass::Cpu, config)
            {
                Ok(cpu) => {
                    info!(
                        "🔄 {} failed for {}, retrying with {}",
                        resolution.encoder.name,
                        source.display(),
                        cpu.encoder.name
                    );
                    match self.attempt(&source, &target, &cpu).await {
                        Ok(size) => {
                            return TranscodeOutcome::Success {
                                size,
                                encoder: Some(cpu.encoder.name),
                                failures,
                            }
                        }
                        Err(failure) => failures.push(failure),
                    }
                }
                Err(e) => debug!("No CPU retry for {}: {}", source.display(), e),
            }
        }

        copy_fallback(&source, &target, failures).await
    }

    async fn attempt(
        &self,
        source: &Path,
        target: &Path,
        resolution: &Resolution,
    ) -> Result<u64, FailedAttempt> {
        let staging = FileManager::staging_path(target);
        let args = video_args(source, &staging, resolution, &self.context.config);

        debug!("🎬 {} with {}", source.display(), resolution.encoder.name);
        run_engine(&self.context, &args, &staging, target)
            .await
            .map_err(|reason| {
                debug!("{} failed: {}", resolution.encoder.name, reason);
                FailedAttempt {
                    step: AttemptStep::Encoder(resolution.encoder.name),
                    reason,
                }
            })
    }
}
