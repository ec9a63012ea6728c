use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::converter::ConverterStrategy;
use super::piped::PipedStrategy;
use super::ytdlp::{YtDlpProfile, YtDlpStrategy};
use super::{AcquisitionStrategy, MediaMetadata, RawAudio, Target};
use crate::config::Config;
use crate::jobs::ProgressSink;
use crate::ProxyError;

/// Connect timeout of the client shared by the API-backed strategies
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// What a successful chain run produced
#[derive(Debug)]
pub struct Acquisition {
    /// Name of the strategy that succeeded
    pub strategy: String,
    pub metadata: MediaMetadata,
    pub audio: RawAudio,
}

/// Ordered fallback list of acquisition strategies.
///
/// Strategies run strictly one after another and the first success wins. Every
/// attempt has its own deadline; failures are logged and the chain moves on.
pub struct StrategyChain {
    strategies: Vec<Box<dyn AcquisitionStrategy>>,
    attempt_timeout: Duration,
}

impl StrategyChain {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            attempt_timeout,
        }
    }

    /// Append a strategy to the end of the chain
    pub fn push(&mut self, strategy: Box<dyn AcquisitionStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn with_strategy(mut self, strategy: Box<dyn AcquisitionStrategy>) -> Self {
        self.push(strategy);
        self
    }

    /// Build the chain enabled in the configuration
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let mut chain = Self::new(config.attempt_timeout());
        let cookies = config.cookie_file();
        if let Some(path) = &cookies {
            tracing::info!("Using cookie file {}", path.display());
        }

        if config.strategies.ytdlp_default {
            chain.push(Box::new(
                YtDlpStrategy::new(&config.tools.yt_dlp_path, YtDlpProfile::Default)
                    .with_cookies(cookies.clone()),
            ));
        }
        if config.strategies.ytdlp_web {
            chain.push(Box::new(
                YtDlpStrategy::new(&config.tools.yt_dlp_path, YtDlpProfile::DesktopWeb)
                    .with_cookies(cookies),
            ));
        }

        let needs_http = config.strategies.piped_instance.is_some()
            || config.strategies.converter_endpoint.is_some();
        if needs_http {
            let client = Client::builder()
                .user_agent(super::DESKTOP_UA)
                .connect_timeout(HTTP_CONNECT_TIMEOUT)
                .build()?;

            if let Some(instance) = &config.strategies.piped_instance {
                chain.push(Box::new(PipedStrategy::new(client.clone(), instance)));
            }
            if let Some(endpoint) = &config.strategies.converter_endpoint {
                chain.push(Box::new(ConverterStrategy::new(client, endpoint)));
            }
        }

        if chain.is_empty() {
            tracing::warn!("No acquisition strategies are enabled; every download will fail");
        }
        Ok(chain)
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Metadata from the first strategy that can provide it
    pub async fn fetch_metadata(&self, target: &Target) -> Result<MediaMetadata, ProxyError> {
        let mut last_error = None;

        for strategy in &self.strategies {
            match tokio::time::timeout(self.attempt_timeout, strategy.fetch_metadata(target)).await {
                Ok(Ok(metadata)) => return Ok(metadata),
                Ok(Err(e)) => {
                    tracing::warn!("{} could not fetch metadata for {}: {:#}", strategy.name(), target.content_id, e);
                    last_error = Some(format!("{:#}", e));
                }
                Err(_) => {
                    tracing::warn!("{} timed out fetching metadata for {}", strategy.name(), target.content_id);
                    last_error = Some(timeout_message(self.attempt_timeout));
                }
            }
        }

        Err(ProxyError::MetadataFetchFailed(
            last_error.unwrap_or_else(|| "No acquisition strategies configured".to_string()),
        ))
    }

    /// Run the strategies in order until one yields a non-empty audio file
    pub async fn acquire(
        &self,
        target: &Target,
        work_dir: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Acquisition, ProxyError> {
        let mut attempts = 0;
        let mut last_error = None;

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                return Err(ProxyError::Cancelled);
            }
            attempts += 1;
            tracing::info!("Trying {} for {}", strategy.name(), target.content_id);
            progress.status("Fetching video info");

            let run = attempt(strategy.as_ref(), target, work_dir, progress);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
                outcome = tokio::time::timeout(self.attempt_timeout, run) => outcome,
            };

            let error = match outcome {
                Ok(Ok((metadata, audio))) => {
                    tracing::info!("{} acquired {} ({} bytes)", strategy.name(), target.content_id, audio.size);
                    return Ok(Acquisition {
                        strategy: strategy.name().to_string(),
                        metadata,
                        audio,
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => timeout_message(self.attempt_timeout),
            };

            tracing::warn!("{} failed for {}: {}", strategy.name(), target.content_id, error);
            last_error = Some(error);
            clear_dir(work_dir);
        }

        Err(ProxyError::AllStrategiesFailed {
            attempts,
            last_error: last_error.unwrap_or_else(|| "No acquisition strategies configured".to_string()),
        })
    }
}

async fn attempt(
    strategy: &dyn AcquisitionStrategy,
    target: &Target,
    work_dir: &Path,
    progress: &ProgressSink,
) -> Result<(MediaMetadata, RawAudio), ProxyError> {
    let metadata = strategy
        .fetch_metadata(target)
        .await
        .map_err(|e| ProxyError::MetadataFetchFailed(format!("{:#}", e)))?;

    progress.status("Downloading audio");
    let audio = strategy
        .fetch_audio(target, &metadata, work_dir, progress)
        .await
        .map_err(|e| ProxyError::Internal(anyhow::anyhow!("{:#}", e)))?;

    let on_disk = fs_err::metadata(&audio.path).map(|m| m.len()).unwrap_or(0);
    if on_disk == 0 {
        return Err(ProxyError::Internal(anyhow::anyhow!(
            "{} produced no audio",
            strategy.name()
        )));
    }

    Ok((metadata, RawAudio { size: on_disk, ..audio }))
}

fn timeout_message(limit: Duration) -> String {
    format!("Attempt timed out after {}s", limit.as_secs())
}

/// Remove whatever a failed attempt left in the work directory
fn clear_dir(dir: &Path) {
    let Ok(entries) = fs_err::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            fs_err::remove_dir_all(&path)
        } else {
            fs_err::remove_file(&path)
        };
        if let Err(e) = result {
            tracing::debug!("Could not clear {}: {}", path.display(), e);
        }
    }
}
