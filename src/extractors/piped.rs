use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

use super::direct::{download_to_dir, format_from_content_type};
use super::{AcquisitionStrategy, AudioFormat, MediaMetadata, RawAudio, Target};
use crate::jobs::ProgressSink;
use crate::Result;

/// Response of `GET /streams/{id}` on a Piped API instance
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamsResponse {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<i64>,
    thumbnail_url: Option<String>,
    views: Option<i64>,
    #[serde(default)]
    audio_streams: Vec<AudioStream>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    pub url: String,
    #[serde(default)]
    pub bitrate: u64,
    pub mime_type: Option<String>,
    pub format: Option<String>,
}

impl AudioStream {
    fn format(&self) -> Option<AudioFormat> {
        self.mime_type
            .as_deref()
            .and_then(format_from_content_type)
            .or_else(|| self.format.as_deref().and_then(format_from_content_type))
    }

    // Higher is better on equal bitrate
    fn container_rank(&self) -> u8 {
        match self.format() {
            Some(AudioFormat::M4a) => 2,
            Some(AudioFormat::Webm) => 1,
            _ => 0,
        }
    }
}

/// Audio acquisition through a Piped API instance
pub struct PipedStrategy {
    client: Client,
    instance: String,
}

impl PipedStrategy {
    pub fn new(client: Client, instance: impl Into<String>) -> Self {
        Self {
            client,
            instance: instance.into().trim_end_matches('/').to_string(),
        }
    }

    async fn streams(&self, target: &Target) -> Result<StreamsResponse> {
        let url = format!("{}/streams/{}", self.instance, target.content_id);
        tracing::debug!("Querying Piped instance: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Piped instance returned HTTP {}", response.status());
        }

        let streams: StreamsResponse = response
            .json()
            .await
            .context("Piped instance returned invalid JSON")?;
        if let Some(error) = streams.error.as_deref().or(streams.message.as_deref()) {
            anyhow::bail!("Piped instance error: {}", error);
        }
        Ok(streams)
    }
}

#[async_trait]
impl AcquisitionStrategy for PipedStrategy {
    fn name(&self) -> &str {
        "piped"
    }

    async fn fetch_metadata(&self, target: &Target) -> Result<MediaMetadata> {
        let streams = self.streams(target).await?;
        let title = streams
            .title
            .filter(|t| !t.trim().is_empty())
            .context("Piped instance returned no title")?;

        Ok(MediaMetadata {
            title,
            uploader: streams.uploader,
            duration: streams.duration.and_then(|d| u64::try_from(d).ok()),
            thumbnail: streams.thumbnail_url,
            view_count: streams.views.and_then(|v| u64::try_from(v).ok()),
        })
    }

    async fn fetch_audio(
        &self,
        target: &Target,
        _metadata: &MediaMetadata,
        work_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<RawAudio> {
        // Stream URLs expire quickly, so they are fetched right before downloading
        let streams = self.streams(target).await?;
        let best = select_best_audio(&streams.audio_streams)
            .context("Piped instance offered no audio streams")?;

        tracing::debug!(
            "Selected Piped audio stream at {} bps ({})",
            best.bitrate,
            best.mime_type.as_deref().unwrap_or("unknown type")
        );
        download_to_dir(&self.client, &best.url, work_dir, progress).await
    }
}

/// Highest bitrate wins; on a tie m4a beats webm beats anything else
pub fn select_best_audio(streams: &[AudioStream]) -> Option<&AudioStream> {
    streams
        .iter()
        .filter(|s| !s.url.is_empty())
        .max_by_key(|s| (s.bitrate, s.container_rank()))
}
