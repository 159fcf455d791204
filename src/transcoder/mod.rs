//! # Media Transcoder Module
//!
//! Esegue una singola operazione di compressione tramite il motore esterno.
//!
//! ## Responsabilità:
//! - `MediaTranscoder`: varianti `Image` e `Video`, con `compress(source, target)`
//! - Ogni tentativo produce un `Result` con un `FailureReason` enumerato
//! - La catena di fallback è esplicita:
//!   - immagine: motore → copia verbatim
//!   - video GPU: encoder GPU → encoder CPU per lo stesso container → copia verbatim
//!   - video CPU: encoder CPU → copia verbatim
//! - Successo = exit code zero **e** file di output non vuoto
//!
//! ## Esiti (mutuamente esclusivi):
//! - `Success`: il target esiste ed è il risultato del motore
//! - `CopiedFallback`: il target è una copia byte-per-byte della sorgente
//! - `HardFailure`: nessun target (anche la copia è fallita, o il path è stato rifiutato)
//!
//! ## Timeout:
//! Ogni invocazione è limitata da `transcode_timeout_secs`. Allo scadere il
//! processo viene terminato e si passa direttamente alla copia, senza il
//! secondo tentativo su CPU.

pub mod args;
pub mod image_processor;
pub mod video_processor;

use crate::config::Config;
use crate::encoders::EncoderCatalog;
use crate::file_manager::FileManager;
use crate::model::{MediaKind, MediaStatus};
use crate::orchestrator::path_resolver::PathResolver;
use crate::platform::EngineTools;
use args::EngineArgs;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

pub use image_processor::ImageTranscoder;
pub use video_processor::VideoTranscoder;

const STDERR_TAIL: usize = 1500;

/// Why a single transcode attempt did not produce an output
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FailureReason {
    #[error("path rejected: {0}")]
    PathRejected(String),

    #[error("no usable encoder: {0}")]
    EncoderUnavailable(String),

    #[error("engine could not be started: {0}")]
    Spawn(String),

    #[error("engine exited with {code:?}: {stderr}")]
    EngineExit { code: Option<i32>, stderr: String },

    #[error("engine reported success but wrote no output")]
    MissingOutput,

    #[error("engine wrote an empty output")]
    EmptyOutput,

    #[error("engine timed out after {0:?}")]
    TimedOut(Duration),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Which step of the fallback chain failed
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptStep {
    Image,
    Encoder(&'static str),
    Copy,
    Setup,
}

impl fmt::Display for AttemptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Encoder(name) => f.write_str(name),
            Self::Copy => f.write_str("copy"),
            Self::Setup => f.write_str("setup"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub step: AttemptStep,
    pub reason: FailureReason,
}

/// Result of `MediaTranscoder::compress`
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOutcome {
    Success {
        size: u64,
        encoder: Option<&'static str>,
        /// Failed attempts that preceded the successful one (e.g. a GPU encoder)
        failures: Vec<FailedAttempt>,
    },
    CopiedFallback {
        size: u64,
        failures: Vec<FailedAttempt>,
    },
    HardFailure {
        failures: Vec<FailedAttempt>,
    },
}

impl TranscodeOutcome {
    /// Terminal task state for this outcome
    pub fn status(&self) -> MediaStatus {
        match self {
            Self::Success { .. } => MediaStatus::Completed,
            Self::CopiedFallback { .. } => MediaStatus::CopiedFallback,
            Self::HardFailure { .. } => MediaStatus::Failed,
        }
    }

    pub fn output_size(&self) -> u64 {
        match self {
            Self::Success { size, .. } | Self::CopiedFallback { size, .. } => *size,
            Self::HardFailure { .. } => 0,
        }
    }

    pub fn failures(&self) -> &[FailedAttempt] {
        match self {
            Self::Success { failures, .. }
            | Self::CopiedFallback { failures, .. }
            | Self::HardFailure { failures } => failures,
        }
    }

    /// Human-readable summary of the failed attempts, if any
    pub fn error_message(&self) -> Option<String> {
        let failures = self.failures();
        if failures.is_empty() {
            return None;
        }
        Some(
            failures
                .iter()
                .map(|f| format!("{}: {}", f.step, f.reason))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Everything a transcoder needs, shared by all workers of a run
#[derive(Debug)]
pub struct TranscodeContext {
    pub config: Config,
    pub tools: EngineTools,
    pub encoders: Arc<EncoderCatalog>,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
}

impl TranscodeContext {
    /// Confine both ends of an operation to their roots
    pub(crate) fn confine(&self, source: &Path, target: &Path) -> Result<(PathBuf, PathBuf), FailedAttempt> {
        let reject = |reason: String| FailedAttempt {
            step: AttemptStep::Setup,
            reason: FailureReason::PathRejected(reason),
        };
        let source = PathResolver::confine(&self.source_root, source).map_err(reject)?;
        let target = PathResolver::confine(&self.target_root, target).map_err(reject)?;
        Ok((source, target))
    }
}

/// One compression operation, specialised by media kind
pub enum MediaTranscoder {
    Image(ImageTranscoder),
    Video(VideoTranscoder),
}

impl MediaTranscoder {
    /// Transcoder for a media kind; `Other` files have none and are copied as-is
    pub fn for_kind(kind: MediaKind, context: Arc<TranscodeContext>) -> Option<Self> {
        match kind {
            MediaKind::Image => Some(Self::Image(ImageTranscoder::new(context))),
            MediaKind::Video => Some(Self::Video(VideoTranscoder::new(context))),
            MediaKind::Other => None,
        }
    }

    pub async fn compress(&self, source: &Path, target: &Path) -> TranscodeOutcome {
        match self {
            Self::Image(transcoder) => transcoder.compress(source, target).await,
            Self::Video(transcoder) => transcoder.compress(source, target).await,
        }
    }
}

/// Run the engine into the staging file for `target`, then move it into place
pub(crate) async fn run_engine(
    context: &TranscodeContext,
    args: &EngineArgs,
    staging: &Path,
    target: &Path,
) -> Result<u64, FailureReason> {
    let mut cmd = Command::new(&context.tools.ffmpeg);
    cmd.args(args.as_slice())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start_time = Instant::now();
    let output = match context.config.transcode_timeout() {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("⏱️ Engine timed out after {:?}: {}", limit, target.display());
                discard(staging).await;
                return Err(FailureReason::TimedOut(limit));
            }
        },
        None => cmd.output().await,
    }
    .map_err(|e| FailureReason::Spawn(format!("{}: {}", context.tools.ffmpeg.display(), e)))?;

    debug!(
        "Engine finished in {:.1}s with {} for {}",
        start_time.elapsed().as_secs_f64(),
        output.status,
        target.display()
    );

    if !output.status.success() {
        discard(staging).await;
        return Err(FailureReason::EngineExit {
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    match tokio::fs::metadata(staging).await {
        Ok(metadata) if metadata.len() > 0 => {}
        Ok(_) => {
            discard(staging).await;
            return Err(FailureReason::EmptyOutput);
        }
        Err(_) => return Err(FailureReason::MissingOutput),
    }

    FileManager::promote(staging, target)
        .await
        .map_err(|e| FailureReason::Io(e.to_string()))
}

/// Last step of every chain: verbatim copy, or hard failure if even that fails
pub(crate) async fn copy_fallback(
    source: &Path,
    target: &Path,
    mut failures: Vec<FailedAttempt>,
) -> TranscodeOutcome {
    match FileManager::copy_verbatim(source, target).await {
        Ok(size) => {
            warn!(
                "📋 Kept original for {} after failed compression",
                source.display()
            );
            TranscodeOutcome::CopiedFallback { size, failures }
        }
        Err(e) => {
            failures.push(FailedAttempt {
                step: AttemptStep::Copy,
                reason: FailureReason::Io(e.to_string()),
            });
            TranscodeOutcome::HardFailure { failures }
        }
    }
}

async fn discard(staging: &Path) {
    let _ = tokio::fs::remove_file(staging).await;
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((index, _)) => format!("...{}", &text[index..]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEngine;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_outcome_mapping() {
        let failure = FailedAttempt {
            step: AttemptStep::Encoder("h264_nvenc"),
            reason: FailureReason::EngineExit {
                code: Some(1),
                stderr: "no device".to_string(),
            },
        };
        let success = TranscodeOutcome::Success {
            size: 10,
            encoder: Some("libx264"),
            failures: vec![],
        };
        let copied = TranscodeOutcome::CopiedFallback {
            size: 20,
            failures: vec![failure.clone()],
        };
        let failed = TranscodeOutcome::HardFailure {
            failures: vec![failure],
        };

        assert_eq!(success.status(), MediaStatus::Completed);
        assert_eq!(copied.status(), MediaStatus::CopiedFallback);
        assert_eq!(failed.status(), MediaStatus::Failed);
        assert_eq!(failed.output_size(), 0);
        assert_eq!(success.error_message(), None);
        assert!(copied.error_message().unwrap().starts_with("h264_nvenc: engine exited"));
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = "x".repeat(STDERR_TAIL * 2);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with("..."));
        assert!(tail.len() <= STDERR_TAIL + 4);
        assert_eq!(stderr_tail(b"  short \n"), "short");
    }

    #[tokio::test]
    async fn test_copy_fallback_hard_failure_leaves_no_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.jpg");
        let outcome = copy_fallback(&dir.path().join("missing.jpg"), &target, vec![]).await;
        assert_eq!(outcome.status(), MediaStatus::Failed);
        assert_eq!(outcome.failures().len(), 1);
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_run_engine_rejects_empty_output() {
        let dir = TempDir::new().unwrap();
        let engine = FakeEngine::new(dir.path()).empty_output().install();
        let context = engine.context(dir.path(), dir.path(), Config::default());

        let target = dir.path().join("out.jpg");
        let staging = FileManager::staging_path(&target);
        let mut args = EngineArgs::default();
        args.push(&staging);

        let result = run_engine(&context, &args, &staging, &target).await;
        assert_eq!(result, Err(FailureReason::EmptyOutput));
        assert!(!target.exists());
        assert!(!staging.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_run_engine_times_out() {
        let dir = TempDir::new().unwrap();
        let engine = FakeEngine::new(dir.path()).sleep_secs(5).install();
        let config = Config {
            transcode_timeout_secs: 1,
            ..Default::default()
        };
        let context = engine.context(dir.path(), dir.path(), config);

        let target = dir.path().join("out.mp4");
        let staging = FileManager::staging_path(&target);
        let mut args = EngineArgs::default();
        args.push(&staging);

        let result = run_engine(&context, &args, &staging, &target).await;
        assert_eq!(result, Err(FailureReason::TimedOut(Duration::from_secs(1))));
        assert!(!target.exists());
    }
}
