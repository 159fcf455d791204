//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione del motore di compressione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di compressione
//! - Ogni chiave mancante nel file assume il proprio default (`#[serde(default)]`)
//! - Fornisce validazione dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//!
//! ## Parametri principali:
//! - `photo_quality`: Qualità immagini (1-100, default: 85)
//! - `max_photo_width` / `max_photo_height`: Limiti di risoluzione (default: 2000)
//! - `video_crf`: CRF video per encoder CPU (0-51, default: 23)
//! - `video_preset`: Preset encoder CPU (default: "medium")
//! - `hardware_mode`: cpu | nvidia | amd (default: cpu)
//! - `*_encoder`, `*_video_bitrate`: Scelte per classe hardware
//! - `transcode_timeout_secs`: Timeout per invocazione del motore (0 = nessuno)
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     photo_quality: 70,
//!     hardware_mode: HardwareClass::Nvidia,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use crate::encoders::{self, HardwareClass, CONTAINERS, ENCODERS};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a compression run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Target image quality (1-100)
    pub photo_quality: u8,
    /// Images wider than this are downscaled
    pub max_photo_width: u32,
    /// Images taller than this are downscaled
    pub max_photo_height: u32,
    /// CRF for CPU encoders (0-51, lower = better quality)
    pub video_crf: u8,
    /// Preset for CPU encoders that accept x264-style presets
    pub video_preset: String,
    /// Requested hardware acceleration class
    pub hardware_mode: HardwareClass,
    pub cpu_encoder: String,
    pub nvidia_encoder: String,
    pub amd_encoder: String,
    pub nvidia_preset: String,
    pub nvidia_rate_control: String,
    pub nvidia_video_bitrate: String,
    pub amd_video_bitrate: String,
    /// Preferred audio codec, replaced by the container default when incompatible
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Re-container every video to this extension (e.g. ".mkv")
    pub video_container: Option<String>,
    /// Exclude non-media files right after a scan
    pub auto_exclude_non_media: bool,
    /// Annotate scanned files with size estimates
    pub estimate_sizes: bool,
    /// Worker pool size (None = half the available CPUs, at least one)
    pub workers: Option<usize>,
    /// Upper bound for one engine invocation (0 = unbounded)
    pub transcode_timeout_secs: u64,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            photo_quality: 85,
            max_photo_width: 2000,
            max_photo_height: 2000,
            video_crf: 23,
            video_preset: "medium".to_string(),
            hardware_mode: HardwareClass::Cpu,
            cpu_encoder: "libx264".to_string(),
            nvidia_encoder: "h264_nvenc".to_string(),
            amd_encoder: "h264_amf".to_string(),
            nvidia_preset: "p4".to_string(),
            nvidia_rate_control: "cbr".to_string(),
            nvidia_video_bitrate: "5000k".to_string(),
            amd_video_bitrate: "5000k".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            video_container: None,
            auto_exclude_non_media: true,
            estimate_sizes: true,
            workers: None,
            transcode_timeout_secs: 3600,
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.photo_quality == 0 || self.photo_quality > 100 {
            return Err(anyhow::anyhow!("Photo quality must be between 1 and 100"));
        }

        if self.video_crf > 51 {
            return Err(anyhow::anyhow!("Video CRF must be between 0 and 51"));
        }

        if self.max_photo_width == 0 || self.max_photo_height == 0 {
            return Err(anyhow::anyhow!("Maximum photo dimensions must be greater than 0"));
        }

        if self.workers == Some(0) {
            return Err(anyhow::anyhow!("Number of workers must be greater than 0"));
        }

        for (key, value) in [
            ("nvidia_video_bitrate", &self.nvidia_video_bitrate),
            ("amd_video_bitrate", &self.amd_video_bitrate),
            ("audio_bitrate", &self.audio_bitrate),
        ] {
            if parse_bitrate(value).is_none() {
                return Err(anyhow::anyhow!("Invalid bitrate for {}: {}", key, value));
            }
        }

        for (class, name) in [
            (HardwareClass::Cpu, &self.cpu_encoder),
            (HardwareClass::Nvidia, &self.nvidia_encoder),
            (HardwareClass::Amd, &self.amd_encoder),
        ] {
            match ENCODERS.iter().find(|e| e.name == name.as_str()) {
                Some(encoder) if encoder.hardware == class => {}
                Some(_) => {
                    return Err(anyhow::anyhow!("Encoder {} is not a {} encoder", name, class));
                }
                None => return Err(anyhow::anyhow!("Unknown encoder: {}", name)),
            }
        }

        if let Some(ref container) = self.video_container {
            if !container.starts_with('.') {
                return Err(anyhow::anyhow!(
                    "Video container must be an extension like \".mp4\", got {}",
                    container
                ));
            }
            if encoders::container(container).is_none() {
                let known: Vec<&str> = CONTAINERS.iter().map(|c| c.extension).collect();
                return Err(anyhow::anyhow!(
                    "Unsupported video container {} (expected one of {})",
                    container,
                    known.join(", ")
                ));
            }
        }

        Ok(())
    }

    /// Encoder the user picked for a hardware class
    pub fn encoder_for(&self, class: HardwareClass) -> &str {
        match class {
            HardwareClass::Cpu => &self.cpu_encoder,
            HardwareClass::Nvidia => &self.nvidia_encoder,
            HardwareClass::Amd => &self.amd_encoder,
        }
    }

    /// Target video bitrate in bit/s for bitrate-driven classes
    pub fn video_bitrate_for(&self, class: HardwareClass) -> Option<u64> {
        match class {
            HardwareClass::Cpu => None,
            HardwareClass::Nvidia => parse_bitrate(&self.nvidia_video_bitrate),
            HardwareClass::Amd => parse_bitrate(&self.amd_video_bitrate),
        }
    }

    pub fn audio_bitrate_bps(&self) -> u64 {
        parse_bitrate(&self.audio_bitrate).unwrap_or(128_000)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| (num_cpus::get() / 2).max(1))
    }

    pub fn transcode_timeout(&self) -> Option<Duration> {
        match self.transcode_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Parse an engine-style bitrate ("5000k", "2.5M", "800000") into bit/s
pub fn parse_bitrate(value: &str) -> Option<u64> {
    let value = value.trim();
    let (number, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1_000.0),
        'm' | 'M' => (&value[..value.len() - 1], 1_000_000.0),
        _ => (value, 1.0),
    };
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number <= 0.0 {
        return None;
    }
    Some((number * multiplier).round() as u64)
}
