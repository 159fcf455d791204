//! # Size Estimation Module
//!
//! Stima della dimensione post-compressione senza invocare il motore di
//! transcodifica. Usata per l'anteprima del catalogo e per il controllo dello
//! spazio libero prima di un'esecuzione.
//!
//! ## Responsabilità:
//! - `estimate_image()` / `estimate_video()`: euristiche pure e monotone
//! - `SizeEstimator`: legge i metadati (header immagine, ffprobe) e delega
//!   alle euristiche; qualsiasi errore di lettura degrada alla tabella statica
//!
//! ## Limiti:
//! - Immagini: [10%, 90%] della dimensione originale
//! - Video: [20%, 95%] della dimensione originale
//!
//! ## Monotonicità:
//! Abbassare la qualità immagine o alzare il CRF non aumenta mai la stima.
//! Tutte le tabelle sono non decrescenti in qualità e non crescenti in CRF,
//! e i clamp preservano l'ordine.

use crate::config::Config;
use crate::encoders::{self, HardwareClass};
use crate::model::{MediaFile, MediaKind};
use crate::probe::{self, VideoInfo};
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_MIN_RATIO: f64 = 0.10;
const IMAGE_MAX_RATIO: f64 = 0.90;
const VIDEO_MIN_RATIO: f64 = 0.20;
const VIDEO_MAX_RATIO: f64 = 0.95;
const CONTAINER_OVERHEAD: f64 = 1.02;

/// (quality, ratio) control points for lossy JPEG re-encoding
const JPEG_CURVE: &[(f64, f64)] = &[
    (1.0, 0.25),
    (60.0, 0.45),
    (75.0, 0.55),
    (90.0, 0.65),
    (100.0, 0.80),
];

/// Predicted size of an image after downscaling and re-encoding
pub fn estimate_image(
    original_size: u64,
    extension: &str,
    dimensions: Option<(u32, u32)>,
    config: &Config,
) -> u64 {
    let quality = config.photo_quality.clamp(1, 100);

    let ratio = match dimensions {
        Some((width, height)) if width > 0 && height > 0 => {
            pixel_ratio(width, height, config) * format_ratio(extension, quality)
        }
        _ => conservative_image_ratio(quality),
    };

    clamp_to(original_size, ratio, IMAGE_MIN_RATIO, IMAGE_MAX_RATIO)
}

/// Predicted size of a video re-encoded under the configured hardware mode
pub fn estimate_video(
    original_size: u64,
    target_extension: &str,
    info: Option<&VideoInfo>,
    config: &Config,
) -> u64 {
    let cpu_only = encoders::container(target_extension)
        .map(|c| c.cpu_only)
        .unwrap_or(false);
    let mode = if cpu_only {
        HardwareClass::Cpu
    } else {
        config.hardware_mode
    };

    let crf_ratio = crf_ratio(config.video_crf, &config.video_preset);
    let audio_bps = config.audio_bitrate_bps() as f64;

    let target_bps = match mode {
        HardwareClass::Cpu => info
            .filter(|i| i.bitrate > 0)
            .map(|i| i.bitrate as f64 * crf_ratio),
        gpu => config.video_bitrate_for(gpu).map(|b| b as f64),
    };

    let estimated = match (info, target_bps) {
        (Some(info), Some(target_bps)) if info.duration > 0.0 => {
            (target_bps + audio_bps) * info.duration / 8.0 * CONTAINER_OVERHEAD
        }
        (Some(info), Some(target_bps)) if mode.is_gpu() && info.bitrate > 0 => {
            original_size as f64 * target_bps / info.bitrate as f64
        }
        _ => original_size as f64 * static_video_ratio(mode, crf_ratio, config),
    };

    let ratio = if original_size == 0 {
        0.0
    } else {
        estimated / original_size as f64
    };
    clamp_to(original_size, ratio, VIDEO_MIN_RATIO, VIDEO_MAX_RATIO)
}

/// Reads whatever metadata is cheap to get and feeds the heuristics
#[derive(Debug, Clone)]
pub struct SizeEstimator {
    ffprobe: PathBuf,
}

impl SizeEstimator {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    /// Estimate one catalog entry. Never fails: unreadable metadata falls back to tables.
    pub async fn estimate(&self, file: &MediaFile, config: &Config) -> u64 {
        let path = file.source_path();
        match file.kind {
            MediaKind::Image => {
                let dimensions = match probe::image_dimensions(&path).await {
                    Ok(dims) => Some(dims),
                    Err(e) => {
                        debug!("Image estimate degraded to table: {}", e);
                        None
                    }
                };
                estimate_image(file.original_size, &file.extension, dimensions, config)
            }
            MediaKind::Video => {
                let info = match probe::video_info(&self.ffprobe, &path).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        debug!("Video estimate degraded to table: {}", e);
                        None
                    }
                };
                let extension = encoders::output_container(&file.extension, config);
                estimate_video(file.original_size, extension, info.as_ref(), config)
            }
            MediaKind::Other => file.original_size,
        }
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }
}

fn pixel_ratio(width: u32, height: u32, config: &Config) -> f64 {
    if width > config.max_photo_width || height > config.max_photo_height {
        let scale = (config.max_photo_width as f64 / width as f64)
            .min(config.max_photo_height as f64 / height as f64);
        scale * scale
    } else {
        1.0
    }
}

fn format_ratio(extension: &str, quality: u8) -> f64 {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => interpolate(JPEG_CURVE, quality as f64),
        "webp" => interpolate(JPEG_CURVE, quality as f64) * 0.8,
        "png" => match quality {
            85.. => 0.35,
            75..=84 => 0.30,
            _ => 0.25,
        },
        _ => 0.40,
    }
}

fn conservative_image_ratio(quality: u8) -> f64 {
    match quality {
        85.. => 0.65,
        75..=84 => 0.55,
        60..=74 => 0.45,
        _ => 0.35,
    }
}

/// CRF 18 keeps ~85% of the size, each CRF step removes ~5 points
fn crf_ratio(crf: u8, preset: &str) -> f64 {
    let base = 0.85 - (crf as f64 - 18.0) * 0.05;
    let adjustment = match preset {
        "ultrafast" => -0.05,
        "superfast" => -0.03,
        "veryfast" => -0.02,
        "faster" => -0.01,
        "slow" => 0.02,
        "slower" => 0.03,
        "veryslow" => 0.05,
        _ => 0.0,
    };
    (base + adjustment).clamp(0.2, 0.9)
}

fn static_video_ratio(mode: HardwareClass, crf_ratio: f64, config: &Config) -> f64 {
    match mode {
        HardwareClass::Cpu => crf_ratio,
        HardwareClass::Nvidia => match config.nvidia_preset.as_str() {
            "p1" => 0.55,
            "p2" => 0.60,
            "p3" => 0.65,
            "p5" => 0.75,
            "p6" => 0.80,
            "p7" => 0.85,
            _ => 0.70,
        },
        HardwareClass::Amd => 0.60,
    }
}

fn interpolate(curve: &[(f64, f64)], x: f64) -> f64 {
    let (first_x, first_y) = curve[0];
    if x <= first_x {
        return first_y;
    }
    for pair in curve.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if x <= x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    curve[curve.len() - 1].1
}

fn clamp_to(original_size: u64, ratio: f64, min: f64, max: f64) -> u64 {
    let ratio = if ratio.is_finite() { ratio } else { max };
    (original_size as f64 * ratio.clamp(min, max)).round() as u64
}
