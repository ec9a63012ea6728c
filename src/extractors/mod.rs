use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod chain;
pub mod converter;
pub mod direct;
pub mod piped;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{Acquisition, StrategyChain};

use crate::jobs::ProgressSink;
use crate::resolver::ContentId;
use crate::Result;

/// Desktop browser user agent for profiles that should look like a regular visitor
pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

/// What a strategy is asked to acquire
#[derive(Debug, Clone)]
pub struct Target {
    pub content_id: ContentId,

    /// Canonical watch URL for the content
    pub url: String,
}

impl Target {
    pub fn new(content_id: ContentId) -> Self {
        let url = content_id.watch_url();
        Self { content_id, url }
    }
}

/// Descriptive information about a piece of content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,

    pub uploader: Option<String>,

    /// Duration in seconds
    pub duration: Option<u64>,

    pub thumbnail: Option<String>,

    pub view_count: Option<u64>,
}

/// Audio fetched by a strategy, before transcoding
#[derive(Debug, Clone)]
pub struct RawAudio {
    pub path: PathBuf,

    pub format: AudioFormat,

    /// File size in bytes
    pub size: u64,
}

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Wav,
    Flac,
    Ogg,
    Opus,
    Webm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Opus => "opus",
            AudioFormat::Webm => "webm",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "aac" | "mp4" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "ogg" => Some(AudioFormat::Ogg),
            "opus" => Some(AudioFormat::Opus),
            "webm" | "weba" => Some(AudioFormat::Webm),
            _ => None,
        }
    }

    /// Get MIME type for the format
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Opus => "audio/opus",
            AudioFormat::Webm => "audio/webm",
        }
    }
}

/// One way of acquiring audio, wrapping a single external capability.
///
/// Both phases may fail for any reason; the chain treats every failure as
/// "try the next strategy".
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Name used in logs and status messages
    fn name(&self) -> &str;

    /// Fetch descriptive metadata without downloading anything
    async fn fetch_metadata(&self, target: &Target) -> Result<MediaMetadata>;

    /// Download raw audio into `work_dir`
    async fn fetch_audio(
        &self,
        target: &Target,
        metadata: &MediaMetadata,
        work_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<RawAudio>;
}

/// Locate the file a download wrote as `{stem}.<ext>` inside `dir`
pub fn find_downloaded(dir: &Path, stem: &str) -> Result<RawAudio> {
    let prefix = format!("{}.", stem);
    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || !entry.file_type()?.is_file() {
            continue;
        }

        let Some(ext) = crate::utils::extension_of(&path) else {
            continue;
        };
        if crate::storage::TEMP_EXTENSIONS.contains(&ext.as_str())
            && AudioFormat::from_extension(&ext).is_none()
        {
            continue;
        }

        let size = fs_err::metadata(&path)?.len();
        let format = AudioFormat::from_extension(&ext).unwrap_or(AudioFormat::Webm);
        return Ok(RawAudio { path, format, size });
    }

    anyhow::bail!("Download finished but no audio file was written")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_from_extension() {
        assert_eq!(AudioFormat::from_extension("M4A"), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::from_extension("weba"), Some(AudioFormat::Webm));
        assert_eq!(AudioFormat::from_extension("part"), None);
        assert_eq!(AudioFormat::Mp3.mime_type(), "audio/mpeg");
    }

    #[test]
    fn test_find_downloaded_skips_partials() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("source.webm.part"), b"partial").unwrap();
        fs_err::write(dir.path().join("other.m4a"), b"unrelated").unwrap();
        assert!(find_downloaded(dir.path(), "source").is_err());

        fs_err::write(dir.path().join("source.m4a"), b"audio").unwrap();
        let raw = find_downloaded(dir.path(), "source").unwrap();
        assert_eq!(raw.format, AudioFormat::M4a);
        assert_eq!(raw.size, 5);
    }

    #[test]
    fn test_target_uses_watch_url() {
        let target = Target::new(ContentId::parse("abc12345678").unwrap());
        assert_eq!(target.url, "https://www.youtube.com/watch?v=abc12345678");
    }
}
