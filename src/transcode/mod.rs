//! Conversion of acquired audio to the canonical MP3 profile.

use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::Config;
use crate::Result;

/// Output encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeProfile {
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            bitrate_kbps: 192,
            sample_rate_hz: 44_100,
        }
    }
}

impl TranscodeProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bitrate_kbps: config.transcode.bitrate_kbps,
            sample_rate_hz: config.transcode.sample_rate_hz,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` into `output` using `profile`, overwriting `output`
    async fn transcode(&self, input: &Path, output: &Path, profile: &TranscodeProfile) -> Result<()>;
}

/// Transcoder backed by an ffmpeg subprocess
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ffmpeg_path())
    }

    fn args(input: &Path, output: &Path, profile: &TranscodeProfile) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-ab".to_string(),
            format!("{}k", profile.bitrate_kbps),
            "-ar".to_string(),
            profile.sample_rate_hz.to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, profile: &TranscodeProfile) -> Result<()> {
        tracing::debug!(
            "Transcoding {} -> {} at {}k/{}Hz",
            input.display(),
            output.display(),
            profile.bitrate_kbps,
            profile.sample_rate_hz
        );

        let result = Command::new(&self.ffmpeg_path)
            .args(Self::args(input, output, profile))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg_path))?;

        if !result.status.success() {
            let error = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!("ffmpeg failed: {}", error.trim());
        }

        let size = fs_err::metadata(output).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            anyhow::bail!("ffmpeg produced no output");
        }
        Ok(())
    }
}
