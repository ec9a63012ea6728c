use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

use super::direct::download_to_dir;
use super::{AcquisitionStrategy, MediaMetadata, RawAudio, Target};
use crate::jobs::ProgressSink;
use crate::Result;

/// Reply of a "URL to MP3 link" conversion service
#[derive(Debug, Deserialize)]
struct ConversionReply {
    status: Option<String>,
    title: Option<String>,
    link: Option<String>,
    duration: Option<f64>,
    msg: Option<String>,
}

struct Conversion {
    title: Option<String>,
    link: String,
    duration: Option<f64>,
}

impl ConversionReply {
    fn into_conversion(self) -> Result<Conversion> {
        if self.status.as_deref() != Some("ok") {
            anyhow::bail!(
                "Converter refused the request: {}",
                self.msg
                    .or(self.status)
                    .unwrap_or_else(|| "no status".to_string())
            );
        }
        let link = self
            .link
            .filter(|l| !l.is_empty())
            .context("Converter reply had no download link")?;
        Ok(Conversion {
            title: self.title,
            link,
            duration: self.duration,
        })
    }
}

/// Audio acquisition through an external conversion service
pub struct ConverterStrategy {
    client: Client,
    endpoint: String,
}

impl ConverterStrategy {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn request_url(&self, target: &Target) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}url={}",
            self.endpoint,
            separator,
            urlencoding::encode(&target.url)
        )
    }

    async fn convert(&self, target: &Target) -> Result<Conversion> {
        let url = self.request_url(target);
        tracing::debug!("Requesting conversion: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Converter returned HTTP {}", response.status());
        }

        let reply: ConversionReply = response
            .json()
            .await
            .context("Converter returned invalid JSON")?;
        reply.into_conversion()
    }
}

#[async_trait]
impl AcquisitionStrategy for ConverterStrategy {
    fn name(&self) -> &str {
        "converter"
    }

    async fn fetch_metadata(&self, target: &Target) -> Result<MediaMetadata> {
        let conversion = self.convert(target).await?;
        Ok(MediaMetadata {
            title: conversion
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| target.content_id.to_string()),
            duration: conversion.duration.filter(|d| *d >= 0.0).map(|d| d as u64),
            ..Default::default()
        })
    }

    async fn fetch_audio(
        &self,
        target: &Target,
        _metadata: &MediaMetadata,
        work_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<RawAudio> {
        let conversion = self.convert(target).await?;
        download_to_dir(&self.client, &conversion.link, work_dir, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ContentId;

    fn target() -> Target {
        Target::new(ContentId::parse("abc12345678").unwrap())
    }

    #[test]
    fn test_request_url_encodes_target() {
        let strategy = ConverterStrategy::new(Client::new(), "https://convert.example/api");
        assert_eq!(
            strategy.request_url(&target()),
            "https://convert.example/api?url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabc12345678"
        );

        let with_query = ConverterStrategy::new(Client::new(), "https://convert.example/api?key=k");
        assert!(with_query.request_url(&target()).starts_with("https://convert.example/api?key=k&url="));
    }

    #[test]
    fn test_reply_must_be_ok_with_link() {
        let ok: ConversionReply =
            serde_json::from_str(r#"{"status":"ok","title":"Song","link":"https://cdn/x.mp3","duration":61.0}"#)
                .unwrap();
        let conversion = ok.into_conversion().unwrap();
        assert_eq!(conversion.link, "https://cdn/x.mp3");

        let failed: ConversionReply =
            serde_json::from_str(r#"{"status":"fail","msg":"Video too long"}"#).unwrap();
        let err = failed.into_conversion().err().unwrap();
        assert!(err.to_string().contains("Video too long"));

        let no_link: ConversionReply = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(no_link.into_conversion().is_err());
    }
}
