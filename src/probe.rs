//! # Media Probe Module
//!
//! Lettura dei metadati media senza transcodifica.
//!
//! ## Responsabilità:
//! - Analisi proprietà video con `ffprobe` (durata, bitrate, risoluzione, codec)
//! - Lettura dimensioni immagine dall'header tramite il crate `image`
//!
//! Entrambe le funzioni restituiscono errori `anyhow`: chi le usa (lo stimatore)
//! li degrada a euristiche statiche invece di propagarli.

use anyhow::Result;
use std::path::Path;
use tokio::process::Command;

/// Video file information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Seconds (0.0 when unknown)
    pub duration: f64,
    /// Container bitrate in bit/s (0 when unknown)
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
}

impl VideoInfo {
    /// Parse `ffprobe -print_format json -show_format -show_streams` output
    pub fn from_ffprobe_json(json: &str) -> Result<Self> {
        let info: serde_json::Value = serde_json::from_str(json)?;

        let format = &info["format"];
        let duration = format["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0);
        let bitrate = format["bit_rate"]
            .as_str()
            .and_then(|b| b.parse::<u64>().ok())
            .unwrap_or(0);

        let video_stream = info["streams"]
            .as_array()
            .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
            .unwrap_or(&serde_json::Value::Null);

        Ok(Self {
            duration,
            bitrate,
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            codec: video_stream["codec_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        })
    }
}

/// Get video information using ffprobe
pub async fn video_info(ffprobe: &Path, video_path: &Path) -> Result<VideoInfo> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(video_path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", ffprobe.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "ffprobe failed for {}: {}",
            video_path.display(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    VideoInfo::from_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Image width and height, read from the file header only.
///
/// The header read is blocking I/O, so it runs on the blocking pool.
pub async fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&owned))
        .await?
        .map_err(|e| anyhow::anyhow!("Cannot read dimensions of {}: {}", path.display(), e))
}
