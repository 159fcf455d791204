//! Fake engine used by the tests: a shell script standing in for `ffmpeg`.
//!
//! Every invocation is appended to `engine.log`. `-encoders` prints a fixed
//! listing; any other call writes [`FakeEngine::OUTPUT`] to its last argument,
//! unless one of the configured failure modes applies.

use crate::config::Config;
use crate::encoders::EncoderCatalog;
use crate::platform::EngineTools;
use crate::transcoder::TranscodeContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LISTING: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC
 V....D libx265              libx265 H.265 / HEVC
 V....D libvpx-vp9           libvpx VP9
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus
";

pub struct FakeEngine {
    dir: PathBuf,
    fail_on: Option<String>,
    empty_output: bool,
    sleep_secs: u64,
}

pub struct InstalledEngine {
    script: PathBuf,
    log: PathBuf,
}

impl FakeEngine {
    pub const OUTPUT: &'static [u8] = b"compressed";

    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            fail_on: None,
            empty_output: false,
            sleep_secs: 0,
        }
    }

    /// Exit 1 when any argument equals `arg`
    pub fn fail_on(mut self, arg: &str) -> Self {
        self.fail_on = Some(arg.to_string());
        self
    }

    pub fn empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    pub fn sleep_secs(mut self, secs: u64) -> Self {
        self.sleep_secs = secs;
        self
    }

    #[cfg(unix)]
    pub fn install(self) -> InstalledEngine {
        use std::os::unix::fs::PermissionsExt;

        let script = self.dir.join("fake-ffmpeg.sh");
        let log = self.dir.join("engine.log");
        let payload = if self.empty_output {
            String::new()
        } else {
            String::from_utf8_lossy(Self::OUTPUT).to_string()
        };

        let body = format!(
            r#"#!/bin/sh
echo "$*" >> '{log}'
for a in "$@"; do
  if [ "$a" = "-encoders" ]; then
    cat <<'EOF'
{listing}EOF
    exit 0
  fi
done
for a in "$@"; do
  if [ -n '{fail}' ] && [ "$a" = '{fail}' ]; then
    echo "simulated failure on {fail}" >&2
    exit 1
  fi
done
if [ {sleep} -gt 0 ]; then sleep {sleep}; fi
for last in "$@"; do :; done
printf '%s' '{payload}' > "$last"
"#,
            log = log.display(),
            listing = LISTING,
            fail = self.fail_on.as_deref().unwrap_or(""),
            sleep = self.sleep_secs,
            payload = payload,
        );

        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        InstalledEngine { script, log }
    }
}

impl InstalledEngine {
    pub fn tools(&self) -> EngineTools {
        EngineTools {
            ffmpeg: self.script.clone(),
            ffprobe: self.dir().join("missing-ffprobe"),
        }
    }

    /// Config pointing at the fake engine, for code paths that locate tools themselves
    pub fn config(&self, base: Config) -> Config {
        Config {
            ffmpeg_path: Some(self.script.clone()),
            ffprobe_path: Some(self.dir().join("missing-ffprobe")),
            ..base
        }
    }

    pub fn context(&self, source_root: &Path, target_root: &Path, config: Config) -> TranscodeContext {
        TranscodeContext {
            config,
            tools: self.tools(),
            encoders: Arc::new(EncoderCatalog::new()),
            source_root: source_root.to_path_buf(),
            target_root: target_root.to_path_buf(),
        }
    }

    /// Every recorded invocation, one line of space-joined arguments each
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Invocations other than the encoder probe
    pub fn transcode_invocations(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| !line.ends_with("-encoders"))
            .collect()
    }

    fn dir(&self) -> &Path {
        self.log.parent().unwrap_or(Path::new("."))
    }
}
