//! Plain HTTP downloads of a resolved audio stream, shared by the API-backed strategies.

use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{AudioFormat, RawAudio};
use crate::jobs::ProgressSink;
use crate::Result;

/// Stem of every raw download inside a work directory
pub const SOURCE_STEM: &str = "source";

/// Determine audio format from URL or content type
pub fn determine_format(url: &str, content_type: Option<&str>) -> AudioFormat {
    if let Some(format) = content_type.and_then(format_from_content_type) {
        return format;
    }

    // Stream URLs rarely carry an extension, but some CDNs do
    if let Ok(parsed_url) = Url::parse(url) {
        if let Some(filename) = parsed_url.path_segments().and_then(|mut s| s.next_back()) {
            if let Some(extension) = Path::new(filename).extension() {
                if let Some(format) = AudioFormat::from_extension(&extension.to_string_lossy()) {
                    return format;
                }
            }
        }
    }

    // ffmpeg probes the real container anyway
    AudioFormat::Webm
}

/// Map a MIME type such as `audio/mp4; codecs="mp4a.40.2"` to a format
pub fn format_from_content_type(content_type: &str) -> Option<AudioFormat> {
    let ct = content_type.to_lowercase();
    match ct.as_str() {
        ct if ct.contains("mpeg") || ct.contains("mp3") => Some(AudioFormat::Mp3),
        ct if ct.contains("mp4") || ct.contains("m4a") || ct.contains("aac") => Some(AudioFormat::M4a),
        ct if ct.contains("webm") => Some(AudioFormat::Webm),
        ct if ct.contains("opus") => Some(AudioFormat::Opus),
        ct if ct.contains("ogg") => Some(AudioFormat::Ogg),
        ct if ct.contains("wav") => Some(AudioFormat::Wav),
        ct if ct.contains("flac") => Some(AudioFormat::Flac),
        _ => None,
    }
}

/// Stream `url` into `work_dir/source.<ext>`, reporting download progress
pub async fn download_to_dir(
    client: &Client,
    url: &str,
    work_dir: &Path,
    progress: &ProgressSink,
) -> Result<RawAudio> {
    tracing::debug!("Downloading audio stream into {}", work_dir.display());

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download audio: HTTP {}", response.status());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .map(|s| s.to_string());
    let format = determine_format(url, content_type.as_deref());
    let total_size = response.content_length().filter(|&len| len > 0);

    let path = work_dir.join(format!("{}.{}", SOURCE_STEM, format.as_str()));
    let mut file = tokio::fs::File::create(&path).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if let Some(total) = total_size {
            progress.download(downloaded as f64 / total as f64 * 100.0);
        }
    }
    file.flush().await?;

    if downloaded == 0 {
        anyhow::bail!("Audio stream was empty");
    }
    progress.download(100.0);

    tracing::debug!("Downloaded {} bytes as {}", downloaded, format.as_str());
    Ok(RawAudio {
        path,
        format,
        size: downloaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_wins_over_extension() {
        let format = determine_format("https://cdn.example/a.mp3", Some("audio/webm; codecs=opus"));
        assert_eq!(format, AudioFormat::Webm);
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(determine_format("https://cdn.example/a/track.m4a?x=1", None), AudioFormat::M4a);
        assert_eq!(
            determine_format("https://cdn.example/videoplayback", Some("application/octet-stream")),
            AudioFormat::Webm
        );
    }

    #[test]
    fn test_codec_parameters_are_ignored() {
        assert_eq!(
            format_from_content_type("audio/mp4; codecs=\"mp4a.40.2\""),
            Some(AudioFormat::M4a)
        );
        assert_eq!(format_from_content_type("text/html"), None);
    }
}
