use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::direct::SOURCE_STEM;
use super::{find_downloaded, AcquisitionStrategy, MediaMetadata, RawAudio, Target, DESKTOP_UA};
use crate::jobs::ProgressSink;
use crate::Result;

/// yt-dlp stderr fragments that mean the platform is refusing us rather than yt-dlp breaking
const BOT_CHECK_MARKERS: &[&str] = &[
    "Sign in to confirm",
    "Precondition check failed",
    "HTTP Error 429",
    "HTTP Error 403",
];

/// How yt-dlp presents itself to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YtDlpProfile {
    /// yt-dlp's own client selection
    Default,
    /// Desktop browser user agent and the web player client
    DesktopWeb,
}

/// Audio acquisition through a yt-dlp subprocess
pub struct YtDlpStrategy {
    yt_dlp_path: String,
    profile: YtDlpProfile,
    cookie_file: Option<PathBuf>,
}

impl YtDlpStrategy {
    pub fn new(yt_dlp_path: impl Into<String>, profile: YtDlpProfile) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            profile,
            cookie_file: None,
        }
    }

    /// Pass a Netscape cookie file to yt-dlp
    pub fn with_cookies(mut self, cookie_file: Option<PathBuf>) -> Self {
        self.cookie_file = cookie_file;
        self
    }

    /// Arguments shared by the metadata and download invocations
    fn profile_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string(), "--no-warnings".to_string()];

        if self.profile == YtDlpProfile::DesktopWeb {
            args.extend([
                "--user-agent".to_string(),
                DESKTOP_UA.to_string(),
                "--extractor-args".to_string(),
                "youtube:player_client=web".to_string(),
            ]);
        }

        if let Some(cookies) = &self.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args
    }

    fn download_args(&self, url: &str, work_dir: &Path) -> Vec<String> {
        let template = work_dir.join(format!("{}.%(ext)s", SOURCE_STEM));
        let mut args = self.profile_args();
        args.extend([
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            "--newline".to_string(),
            url.to_string(),
        ]);
        args
    }

    /// Get video information using yt-dlp
    async fn get_video_info(&self, url: &str) -> Result<Value> {
        tracing::debug!("Extracting video info with {} for: {}", self.name(), url);

        let output = Command::new(&self.yt_dlp_path)
            .args(self.profile_args())
            .arg("--dump-json")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            self.report_bot_check(&error);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        let json_str = String::from_utf8(output.stdout)?;
        let info: Value = serde_json::from_str(&json_str).context("yt-dlp returned invalid JSON")?;

        Ok(info)
    }

    fn report_bot_check(&self, stderr: &str) {
        if is_bot_check(stderr) {
            tracing::warn!("{} was rate-limited or asked for a sign-in", self.name());
        }
    }
}

#[async_trait]
impl AcquisitionStrategy for YtDlpStrategy {
    fn name(&self) -> &str {
        match self.profile {
            YtDlpProfile::Default => "yt-dlp",
            YtDlpProfile::DesktopWeb => "yt-dlp:web",
        }
    }

    async fn fetch_metadata(&self, target: &Target) -> Result<MediaMetadata> {
        let info = self.get_video_info(&target.url).await?;
        Ok(metadata_from_info(&info))
    }

    async fn fetch_audio(
        &self,
        target: &Target,
        _metadata: &MediaMetadata,
        work_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<RawAudio> {
        tracing::debug!("Downloading audio with {} into {}", self.name(), work_dir.display());

        let mut child = Command::new(&self.yt_dlp_path)
            .args(self.download_args(&target.url, work_dir))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path))?;

        // Drain stderr concurrently so a chatty yt-dlp cannot block on a full pipe
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(percent) = parse_progress_line(&line) {
                    progress.download(percent);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            self.report_bot_check(&stderr);
            anyhow::bail!("Failed to download audio: {}", stderr.trim());
        }

        let raw = find_downloaded(work_dir, SOURCE_STEM)?;
        if raw.size == 0 {
            anyhow::bail!("yt-dlp produced an empty file");
        }
        progress.download(100.0);
        Ok(raw)
    }
}

fn metadata_from_info(info: &Value) -> MediaMetadata {
    let title = info["title"]
        .as_str()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("audio")
        .to_string();
    let uploader = info["uploader"]
        .as_str()
        .or_else(|| info["channel"].as_str())
        .map(|s| s.to_string());

    MediaMetadata {
        title,
        uploader,
        duration: info["duration"].as_f64().filter(|d| *d >= 0.0).map(|d| d as u64),
        thumbnail: info["thumbnail"].as_str().map(|s| s.to_string()),
        view_count: info["view_count"].as_u64(),
    }
}

/// Percentage from a `[download]  42.3% of ...` line
pub fn parse_progress_line(line: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid regex")
    });
    pattern
        .captures(line.trim_start())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether yt-dlp's stderr shows a bot check or rate limit
pub fn is_bot_check(stderr: &str) -> bool {
    BOT_CHECK_MARKERS.iter().any(|marker| stderr.contains(marker))
}
