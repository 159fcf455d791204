//! # Platform-specific utilities
//!
//! Individua i binari del motore esterno (`ffmpeg`, `ffprobe`).
//!
//! ## Strategia:
//! 1. Path esplicito da configurazione, se esiste
//! 2. `ffprobe` accanto a un `ffmpeg` configurato (stessa directory)
//! 3. Ricerca nel `PATH` con `which`
//! 4. Nome nudo del comando: l'errore emergerà all'invocazione e verrà
//!    trattato come fallimento per singolo file

use crate::config::Config;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolved locations of the engine binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl EngineTools {
    /// Locate the engine binaries for a configuration
    pub fn locate(config: &Config) -> Self {
        let ffmpeg = resolve_tool("ffmpeg", config.ffmpeg_path.as_deref(), None);
        let sibling = config
            .ffmpeg_path
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.join(executable_name("ffprobe")));
        let ffprobe = resolve_tool("ffprobe", config.ffprobe_path.as_deref(), sibling.as_deref());

        Self { ffmpeg, ffprobe }
    }

    /// Whether the main engine binary can be found at all
    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_file() || which::which(&self.ffmpeg).is_ok()
    }
}

fn resolve_tool(name: &str, configured: Option<&Path>, sibling: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        if path.exists() {
            return path.to_path_buf();
        }
        warn!("Configured {} path does not exist: {}", name, path.display());
    }

    if let Some(path) = sibling {
        if path.exists() {
            return path.to_path_buf();
        }
    }

    match which::which(name) {
        Ok(path) => {
            debug!("Found {} at {}", name, path.display());
            path
        }
        Err(_) => {
            debug!("{} not found in PATH", name);
            PathBuf::from(executable_name(name))
        }
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}
