//! # Engine Arguments Module
//!
//! Costruzione dei vettori di argomenti per `ffmpeg`.
//!
//! ## Responsabilità:
//! - `EngineArgs`: builder con il prefisso comune (`-hide_banner -nostdin -y`)
//! - `image_args()`: ridimensionamento esatto + parametri qualità per formato
//! - `video_args()`: parametri per classe hardware, audio e flag del container

use crate::config::Config;
use crate::encoders::{HardwareClass, Resolution, NVENC_PRESETS, NVENC_RATE_CONTROLS};
use std::ffi::OsString;
use std::path::Path;

/// Argument vector for one engine invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineArgs {
    args: Vec<OsString>,
}

impl EngineArgs {
    pub fn new() -> Self {
        let mut args = Self::default();
        args.push_all(["-hide_banner", "-nostdin", "-y"]);
        if !tracing::enabled!(tracing::Level::DEBUG) {
            args.push_all(["-loglevel", "error"]);
        }
        args
    }

    pub fn push(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn push_all<I, S>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn opt(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.push(key).push(value.to_string())
    }

    pub fn input(&mut self, path: &Path) -> &mut Self {
        self.push("-i").push(path)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    /// Value following `key`, if present
    pub fn value_of(&self, key: &str) -> Option<String> {
        self.args
            .windows(2)
            .find(|pair| pair[0] == key)
            .map(|pair| pair[1].to_string_lossy().to_string())
    }

    pub fn as_slice(&self) -> &[OsString] {
        &self.args
    }
}

/// JPEG `-q:v` scale runs 2 (best) to 31 (worst)
pub fn jpeg_qscale(quality: u8) -> u8 {
    let quality = quality.clamp(1, 100) as f64;
    (2.0 + (100.0 - quality) * 29.0 / 99.0).round() as u8
}

/// Downscaled size fitting within the configured bounds, or `None` when already small enough
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    if width <= max_width && height <= max_height {
        return None;
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let new_width = ((width as f64 * scale).floor() as u32).max(1);
    let new_height = ((height as f64 * scale).floor() as u32).max(1);
    Some((new_width, new_height))
}

/// Arguments for re-encoding one image into `output`
pub fn image_args(
    source: &Path,
    output: &Path,
    extension: &str,
    dimensions: Option<(u32, u32)>,
    config: &Config,
) -> EngineArgs {
    let mut args = EngineArgs::new();
    args.input(source);

    match dimensions {
        Some((width, height)) => {
            if let Some((w, h)) =
                fit_within(width, height, config.max_photo_width, config.max_photo_height)
            {
                args.opt("-vf", format!("scale={}:{}", w, h));
            }
        }
        None => {
            args.opt(
                "-vf",
                format!(
                    "scale=w=min(iw\\,{}):h=min(ih\\,{}):force_original_aspect_ratio=decrease",
                    config.max_photo_width, config.max_photo_height
                ),
            );
        }
    }

    args.opt("-frames:v", 1).opt("-update", 1);

    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => {
            args.opt("-q:v", jpeg_qscale(config.photo_quality));
        }
        "webp" => {
            args.opt("-quality", config.photo_quality);
        }
        "png" => {
            args.opt("-compression_level", 9);
        }
        _ => {}
    }

    args.push(output);
    args
}

/// Engine name for an audio codec from the descriptor tables
pub fn audio_encoder_name(codec: &str) -> &str {
    match codec {
        "mp3" => "libmp3lame",
        "opus" => "libopus",
        "vorbis" => "libvorbis",
        other => other,
    }
}

/// Audio codec allowed by both the encoder and the container, preferring the configured one
pub fn select_audio_codec(resolution: &Resolution, preferred: &str) -> &'static str {
    let encoder = resolution.encoder;
    let container = resolution.container;
    let compatible = |codec: &str| encoder.audio_codecs.contains(&codec) && container.allows_audio(codec);

    if let Some(codec) = container
        .audio_codecs
        .iter()
        .copied()
        .find(|c| *c == preferred && compatible(*c))
    {
        return codec;
    }
    if compatible(container.default_audio) {
        return container.default_audio;
    }
    encoder
        .audio_codecs
        .iter()
        .copied()
        .find(|c| container.allows_audio(c))
        .unwrap_or(container.default_audio)
}

/// Arguments for transcoding one video with a resolved encoder
pub fn video_args(source: &Path, output: &Path, resolution: &Resolution, config: &Config) -> EngineArgs {
    let encoder = resolution.encoder;
    let mut args = EngineArgs::new();

    match resolution.hardware {
        HardwareClass::Nvidia => {
            args.opt("-hwaccel", "cuda");
        }
        HardwareClass::Amd => {
            args.opt("-hwaccel", "auto");
        }
        HardwareClass::Cpu => {}
    }

    args.input(source).opt("-c:v", encoder.name);

    match resolution.hardware {
        HardwareClass::Cpu => {
            args.opt("-crf", config.video_crf);
            if encoder.presets.contains(&config.video_preset.as_str()) {
                args.opt("-preset", &config.video_preset);
            }
            if matches!(encoder.name, "libvpx" | "libvpx-vp9" | "libaom-av1") {
                // constant-quality mode for these encoders needs a zero bitrate cap
                args.opt("-b:v", 0);
            }
            args.opt("-pix_fmt", "yuv420p");
        }
        HardwareClass::Nvidia => {
            let preset = if NVENC_PRESETS.contains(&config.nvidia_preset.as_str()) {
                config.nvidia_preset.as_str()
            } else {
                "p4"
            };
            let rate_control = if NVENC_RATE_CONTROLS.contains(&config.nvidia_rate_control.as_str()) {
                config.nvidia_rate_control.as_str()
            } else {
                "cbr"
            };
            args.opt("-preset", preset)
                .opt("-rc", rate_control)
                .opt("-b:v", &config.nvidia_video_bitrate);
        }
        HardwareClass::Amd => {
            args.opt("-b:v", &config.amd_video_bitrate)
                .opt("-usage", "transcoding");
            if encoder.name == "hevc_amf" {
                args.opt("-profile:v", "main");
            }
            args.opt("-pix_fmt", "yuv420p");
        }
    }

    let audio = select_audio_codec(resolution, &config.audio_codec);
    args.opt("-c:a", audio_encoder_name(audio))
        .opt("-b:a", &config.audio_bitrate);

    if matches!(resolution.container.extension, ".mp4" | ".mov") {
        args.opt("-movflags", "+faststart");
    }

    args.push(output);
    args
}
