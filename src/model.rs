//! # Data Model Module
//!
//! Tipi valore condivisi tra catalogo, orchestratore e checkpoint.
//!
//! ## Responsabilità:
//! - `MediaFile`: un'unica rappresentazione tipizzata di un file scansionato
//! - `MediaKind`: classificazione per estensione (immagine, video, altro)
//! - `MediaStatus`: macchina a stati per file (`Waiting → Running → terminale`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "m4v", "webm"];

/// Coarse classification of a scanned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify by extension (without the dot, any case)
    pub fn from_extension(extension: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Video
        } else {
            Self::Other
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .map(|ext| Self::from_extension(&ext.to_string_lossy()))
            .unwrap_or(Self::Other)
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Per-file state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Waiting,
    Running,
    Completed,
    CopiedFallback,
    Failed,
    Stopped,
    Skipped,
}

impl MediaStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting | Self::Running)
    }

    /// Whether this status contributes to the final compression totals
    pub fn counts_towards_totals(&self) -> bool {
        matches!(self, Self::Completed | Self::CopiedFallback)
    }

    /// Legal edges of the state machine
    pub fn can_transition_to(&self, next: MediaStatus) -> bool {
        match (self, next) {
            (Self::Waiting, Self::Running) | (Self::Waiting, Self::Stopped) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CopiedFallback => "copied",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Skipped => "skipped",
        }
    }
}

/// A scanned file together with its sizes and current status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub source_root: PathBuf,
    /// Directory of the file relative to `source_root` (empty for top-level files)
    pub relative_dir: PathBuf,
    pub file_name: String,
    /// Lowercase extension without the dot
    pub extension: String,
    pub kind: MediaKind,
    pub original_size: u64,
    pub estimated_size: u64,
    pub actual_size: u64,
    pub status: MediaStatus,
}

impl MediaFile {
    /// Build an entry for `path`, which must live under `source_root`
    pub fn new(source_root: &Path, path: &Path, original_size: u64) -> Self {
        let relative_dir = path
            .parent()
            .and_then(|parent| parent.strip_prefix(source_root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let kind = MediaKind::from_extension(&extension);

        Self {
            source_root: source_root.to_path_buf(),
            relative_dir,
            file_name,
            extension,
            kind,
            original_size,
            estimated_size: original_size,
            actual_size: 0,
            status: MediaStatus::Waiting,
        }
    }

    pub fn relative_path(&self) -> PathBuf {
        self.relative_dir.join(&self.file_name)
    }

    pub fn source_path(&self) -> PathBuf {
        self.source_root.join(self.relative_path())
    }
}
