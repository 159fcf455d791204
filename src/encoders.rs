//! # Encoder Catalog Module
//!
//! Registro statico delle capacità di encoder e container, più la risoluzione
//! dell'encoder da usare per ogni video in base all'hardware disponibile.
//!
//! ## Responsabilità:
//! - Tabelle immutabili `ENCODERS` e `CONTAINERS`
//! - `EncoderCatalog::probe_available()`: interroga il motore una sola volta
//!   (`ffmpeg -hide_banner -encoders`) e mette in cache gli encoder presenti
//! - `EncoderCatalog::resolve()`: sceglie l'encoder per (container, hardware)
//! - `EncoderCatalog::validate()`: verifica una scelta con un motivo preciso
//!
//! ## Ordine di risoluzione:
//! 1. Container `cpu_only` → la modalità hardware diventa `cpu`
//! 2. Encoder configurato dall'utente per quella modalità
//! 3. Encoder di default del container
//! 4. Primo encoder compatibile e disponibile della stessa classe hardware
//! 5. Se la modalità era GPU e nulla è stato trovato, si ripete con `cpu`
//!
//! La risoluzione dipende solo da (container, modalità, insieme disponibile,
//! preferenze): stessi input, stesso encoder.

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Hardware acceleration class of an encoder (and of a requested mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareClass {
    #[default]
    Cpu,
    Nvidia,
    Amd,
}

impl HardwareClass {
    pub fn is_gpu(&self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
        };
        f.write_str(name)
    }
}

impl FromStr for HardwareClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "nvidia" | "nvenc" | "cuda" => Ok(Self::Nvidia),
            "amd" | "amf" => Ok(Self::Amd),
            other => Err(format!("unknown hardware mode: {}", other)),
        }
    }
}

/// How an encoder is steered towards a target quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityMode {
    Crf,
    Bitrate,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EncoderDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub hardware: HardwareClass,
    /// Container extensions, with the leading dot
    pub containers: &'static [&'static str],
    pub audio_codecs: &'static [&'static str],
    pub quality_mode: QualityMode,
    pub presets: &'static [&'static str],
    pub rate_controls: &'static [&'static str],
}

#[derive(Debug, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub extension: &'static str,
    pub name: &'static str,
    pub video_codecs: &'static [&'static str],
    pub audio_codecs: &'static [&'static str],
    pub default_video: &'static str,
    pub default_audio: &'static str,
    pub cpu_only: bool,
}

impl ContainerDescriptor {
    pub fn allows_video(&self, encoder: &str) -> bool {
        self.video_codecs.contains(&encoder)
    }

    pub fn allows_audio(&self, codec: &str) -> bool {
        self.audio_codecs.contains(&codec)
    }
}

pub const X264_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];
pub const NVENC_PRESETS: &[&str] = &["p1", "p2", "p3", "p4", "p5", "p6", "p7"];
pub const NVENC_RATE_CONTROLS: &[&str] = &["cbr", "vbr", "constqp", "vbr_minqp"];

const AV1_CONTAINERS: &[&str] = &[".webm", ".mkv", ".mp4"];
const GPU_CONTAINERS: &[&str] = &[".mp4", ".mkv", ".mov"];

pub static ENCODERS: &[EncoderDescriptor] = &[
    EncoderDescriptor {
        name: "libx264",
        description: "H.264 / AVC (x264)",
        hardware: HardwareClass::Cpu,
        containers: &[".mp4", ".mkv", ".mov", ".avi"],
        audio_codecs: &["aac", "mp3", "opus"],
        quality_mode: QualityMode::Crf,
        presets: X264_PRESETS,
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "libx265",
        description: "H.265 / HEVC (x265)",
        hardware: HardwareClass::Cpu,
        containers: GPU_CONTAINERS,
        audio_codecs: &["aac", "mp3", "opus"],
        quality_mode: QualityMode::Crf,
        presets: X264_PRESETS,
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "libvpx",
        description: "VP8 (libvpx)",
        hardware: HardwareClass::Cpu,
        containers: &[".webm", ".mkv"],
        audio_codecs: &["opus", "vorbis"],
        quality_mode: QualityMode::Crf,
        presets: &[],
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "libvpx-vp9",
        description: "VP9 (libvpx)",
        hardware: HardwareClass::Cpu,
        containers: &[".webm", ".mkv"],
        audio_codecs: &["opus", "vorbis"],
        quality_mode: QualityMode::Crf,
        presets: &[],
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "libaom-av1",
        description: "AV1 (libaom)",
        hardware: HardwareClass::Cpu,
        containers: AV1_CONTAINERS,
        audio_codecs: &["opus", "aac"],
        quality_mode: QualityMode::Crf,
        presets: &[],
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "libsvtav1",
        description: "AV1 (SVT-AV1)",
        hardware: HardwareClass::Cpu,
        containers: AV1_CONTAINERS,
        audio_codecs: &["opus", "aac"],
        quality_mode: QualityMode::Crf,
        presets: &[],
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "h264_nvenc",
        description: "NVIDIA NVENC H.264",
        hardware: HardwareClass::Nvidia,
        containers: GPU_CONTAINERS,
        audio_codecs: &["aac", "mp3"],
        quality_mode: QualityMode::Bitrate,
        presets: NVENC_PRESETS,
        rate_controls: NVENC_RATE_CONTROLS,
    },
    EncoderDescriptor {
        name: "hevc_nvenc",
        description: "NVIDIA NVENC HEVC",
        hardware: HardwareClass::Nvidia,
        containers: GPU_CONTAINERS,
        audio_codecs: &["aac", "mp3"],
        quality_mode: QualityMode::Bitrate,
        presets: NVENC_PRESETS,
        rate_controls: NVENC_RATE_CONTROLS,
    },
    EncoderDescriptor {
        name: "h264_amf",
        description: "AMD AMF H.264",
        hardware: HardwareClass::Amd,
        containers: GPU_CONTAINERS,
        audio_codecs: &["aac", "mp3"],
        quality_mode: QualityMode::Bitrate,
        presets: &[],
        rate_controls: &[],
    },
    EncoderDescriptor {
        name: "hevc_amf",
        description: "AMD AMF HEVC",
        hardware: HardwareClass::Amd,
        containers: GPU_CONTAINERS,
        audio_codecs: &["aac", "mp3"],
        quality_mode: QualityMode::Bitrate,
        presets: &[],
        rate_controls: &[],
    },
];

pub static CONTAINERS: &[ContainerDescriptor] = &[
    ContainerDescriptor {
        extension: ".mp4",
        name: "MPEG-4",
        video_codecs: &[
            "libx264", "libx265", "h264_nvenc", "hevc_nvenc", "h264_amf", "hevc_amf", "libaom-av1",
            "libsvtav1",
        ],
        audio_codecs: &["aac", "mp3", "opus"],
        default_video: "libx264",
        default_audio: "aac",
        cpu_only: false,
    },
    ContainerDescriptor {
        extension: ".webm",
        name: "WebM",
        video_codecs: &["libvpx", "libvpx-vp9", "libaom-av1", "libsvtav1"],
        audio_codecs: &["opus", "vorbis"],
        default_video: "libvpx-vp9",
        default_audio: "opus",
        cpu_only: true,
    },
    ContainerDescriptor {
        extension: ".mkv",
        name: "Matroska",
        video_codecs: &[
            "libx264", "libx265", "libvpx", "libvpx-vp9", "libaom-av1", "libsvtav1", "h264_nvenc",
            "hevc_nvenc", "h264_amf", "hevc_amf",
        ],
        audio_codecs: &["aac", "mp3", "opus", "vorbis"],
        default_video: "libx264",
        default_audio: "aac",
        cpu_only: false,
    },
    ContainerDescriptor {
        extension: ".mov",
        name: "QuickTime",
        video_codecs: &["libx264", "libx265", "h264_nvenc", "hevc_nvenc", "h264_amf", "hevc_amf"],
        audio_codecs: &["aac", "mp3"],
        default_video: "libx264",
        default_audio: "aac",
        cpu_only: false,
    },
    ContainerDescriptor {
        extension: ".avi",
        name: "AVI",
        video_codecs: &["libx264"],
        audio_codecs: &["aac", "mp3"],
        default_video: "libx264",
        default_audio: "aac",
        cpu_only: false,
    },
];

/// Look up an encoder descriptor by name
pub fn encoder(name: &str) -> Option<&'static EncoderDescriptor> {
    ENCODERS.iter().find(|e| e.name == name)
}

/// Look up a container by extension ("mp4", ".MP4" and ".mp4" all match)
pub fn container(extension: &str) -> Option<&'static ContainerDescriptor> {
    let normalized = format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase());
    CONTAINERS.iter().find(|c| c.extension == normalized)
}

/// Container for videos whose own extension has no descriptor (wmv, flv, m4v)
pub const FALLBACK_CONTAINER: &str = ".mp4";

/// Extension (with dot) a video is written with: the configured override,
/// else the source's own container, else `FALLBACK_CONTAINER`
pub fn output_container(source_extension: &str, config: &Config) -> &'static str {
    config
        .video_container
        .as_deref()
        .and_then(container)
        .or_else(|| container(source_extension))
        .map(|c| c.extension)
        .unwrap_or(FALLBACK_CONTAINER)
}

/// Why an (encoder, container, mode) combination was rejected
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityError {
    #[error("unknown encoder: {0}")]
    UnknownEncoder(String),

    #[error("encoder {0} is not available in this engine build")]
    UnavailableEncoder(String),

    #[error("unknown container: {0}")]
    UnknownContainer(String),

    #[error("encoder {encoder} cannot be muxed into {container}")]
    UnsupportedContainer { encoder: String, container: String },

    #[error("encoder {encoder} is a {actual} encoder, but {requested} was requested")]
    HardwareMismatch {
        encoder: String,
        requested: HardwareClass,
        actual: HardwareClass,
    },

    #[error("container {container} only supports CPU encoding; {requested} must downgrade to cpu")]
    CpuOnlyContainer {
        container: String,
        requested: HardwareClass,
    },
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub encoder: &'static EncoderDescriptor,
    pub container: &'static ContainerDescriptor,
    /// Mode the caller asked for
    pub requested: HardwareClass,
    /// Mode the chosen encoder belongs to
    pub hardware: HardwareClass,
}

impl Resolution {
    /// True when the requested GPU mode could not be honored
    pub fn downgraded(&self) -> bool {
        self.requested != self.hardware
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown container: {0}")]
    UnknownContainer(String),

    #[error("no available encoder can produce {container} (requested {requested})")]
    NoCompatibleEncoder {
        container: String,
        requested: HardwareClass,
    },
}

/// Runtime view of the static tables: which encoders this engine build has
#[derive(Debug, Default)]
pub struct EncoderCatalog {
    available: OnceCell<BTreeSet<String>>,
}

impl EncoderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with a fixed available set, bypassing the engine probe
    pub fn with_available<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        Self {
            available: OnceCell::new_with(Some(set)),
        }
    }

    /// Ask the engine which encoders it supports. Runs once; later calls hit the cache.
    ///
    /// A failed probe caches an empty set, which makes every video task fail
    /// resolution and lets the orchestrator refuse a video run up front.
    pub async fn probe_available(&self, ffmpeg: &Path) -> &BTreeSet<String> {
        self.available
            .get_or_init(|| async {
                match run_encoder_listing(ffmpeg).await {
                    Ok(listing) => {
                        let known: BTreeSet<String> = parse_encoder_listing(&listing)
                            .into_iter()
                            .filter(|name| encoder(name).is_some())
                            .collect();
                        info!("🎛️ Available video encoders: {:?}", known);
                        known
                    }
                    Err(e) => {
                        warn!("Encoder probe failed, assuming none available: {}", e);
                        BTreeSet::new()
                    }
                }
            })
            .await
    }

    /// Probed set, or `None` when no probe ran yet
    pub fn available(&self) -> Option<&BTreeSet<String>> {
        self.available.get()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.available
            .get()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }

    /// Known encoders of one class that the engine can actually run
    pub fn available_for(&self, hardware: HardwareClass) -> Vec<&'static EncoderDescriptor> {
        ENCODERS
            .iter()
            .filter(|e| e.hardware == hardware && self.is_available(e.name))
            .collect()
    }

    /// Check one encoder choice against a container and a hardware mode
    pub fn validate(
        &self,
        encoder_name: &str,
        container_ext: &str,
        mode: HardwareClass,
    ) -> Result<(), CompatibilityError> {
        let descriptor = encoder(encoder_name)
            .ok_or_else(|| CompatibilityError::UnknownEncoder(encoder_name.to_string()))?;
        let target = container(container_ext)
            .ok_or_else(|| CompatibilityError::UnknownContainer(container_ext.to_string()))?;

        if !self.is_available(encoder_name) {
            return Err(CompatibilityError::UnavailableEncoder(encoder_name.to_string()));
        }

        if target.cpu_only && (mode.is_gpu() || descriptor.hardware.is_gpu()) {
            return Err(CompatibilityError::CpuOnlyContainer {
                container: target.extension.to_string(),
                requested: if mode.is_gpu() { mode } else { descriptor.hardware },
            });
        }

        if !target.allows_video(encoder_name) || !descriptor.containers.contains(&target.extension) {
            return Err(CompatibilityError::UnsupportedContainer {
                encoder: encoder_name.to_string(),
                container: target.extension.to_string(),
            });
        }

        if descriptor.hardware != mode {
            return Err(CompatibilityError::HardwareMismatch {
                encoder: encoder_name.to_string(),
                requested: mode,
                actual: descriptor.hardware,
            });
        }

        Ok(())
    }

    /// Pick the encoder for a container under a requested hardware mode
    pub fn resolve(
        &self,
        container_ext: &str,
        requested: HardwareClass,
        config: &Config,
    ) -> Result<Resolution, ResolveError> {
        let target = container(container_ext)
            .ok_or_else(|| ResolveError::UnknownContainer(container_ext.to_string()))?;

        let mode = if target.cpu_only {
            HardwareClass::Cpu
        } else {
            requested
        };

        let resolved = self
            .resolve_for_mode(target, mode, config)
            .or_else(|| {
                if mode.is_gpu() {
                    debug!(
                        "No {} encoder usable for {}, falling back to cpu",
                        mode, target.extension
                    );
                    self.resolve_for_mode(target, HardwareClass::Cpu, config)
                } else {
                    None
                }
            })
            .ok_or_else(|| ResolveError::NoCompatibleEncoder {
                container: target.extension.to_string(),
                requested,
            })?;

        Ok(Resolution {
            encoder: resolved,
            container: target,
            requested,
            hardware: resolved.hardware,
        })
    }

    fn resolve_for_mode(
        &self,
        target: &'static ContainerDescriptor,
        mode: HardwareClass,
        config: &Config,
    ) -> Option<&'static EncoderDescriptor> {
        let accepts = |name: &str| self.validate(name, target.extension, mode).is_ok();

        let preferred = config.encoder_for(mode);
        if accepts(preferred) {
            return encoder(preferred);
        }

        if accepts(target.default_video) {
            return encoder(target.default_video);
        }

        ENCODERS.iter().find(|e| e.hardware == mode && accepts(e.name))
    }
}

async fn run_encoder_listing(ffmpeg: &Path) -> anyhow::Result<String> {
    let output = tokio::process::Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", ffmpeg.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -encoders exited with {}",
            ffmpeg.display(),
            output.status
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Extract encoder names from `ffmpeg -encoders` output.
///
/// Rows look like ` V....D libx264   libx264 H.264 / AVC ...`: a six-character
/// capability column followed by the name. Legend rows (` V..... = Video`) are ignored.
pub fn parse_encoder_listing(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let flags = tokens.next()?;
            let name = tokens.next()?;
            let is_flags = flags.len() == 6
                && matches!(flags.chars().next(), Some('V' | 'A' | 'S'))
                && flags.chars().all(|c| "VASFXBD.".contains(c));
            (is_flags && name != "=").then(|| name.to_string())
        })
        .collect()
}
