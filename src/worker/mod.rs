//! Job admission and execution.
//!
//! [`AcquisitionService`] resolves and deduplicates submissions, allocates jobs and runs
//! each one on its own tokio task: wait for a concurrency permit, acquire audio through
//! the strategy chain, transcode, and move the result into the output directory.

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::extractors::{MediaMetadata, StrategyChain, Target};
use crate::jobs::{progress::DOWNLOAD_BAND, JobId, JobRecord, JobTracker, ProgressSink};
use crate::registry::{ArtifactRecord, ContentRegistry};
use crate::resolver::{self, ContentId};
use crate::storage::Storage;
use crate::transcode::{FfmpegTranscoder, TranscodeProfile, Transcoder};
use crate::utils::{artifact_filename, ARTIFACT_EXTENSION};
use crate::ProxyError;

/// Tunables of the dispatcher
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub max_concurrent_jobs: usize,

    /// Jobs allowed to wait for a permit before submissions are refused
    pub max_queued_jobs: usize,

    pub job_timeout: Duration,

    /// How long finished jobs stay visible to pollers
    pub job_ttl: Duration,

    pub eviction_interval: Duration,

    pub profile: TranscodeProfile,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_queued_jobs: 32,
            job_timeout: Duration::from_secs(1200),
            job_ttl: Duration::from_secs(3600),
            eviction_interval: Duration::from_secs(300),
            profile: TranscodeProfile::default(),
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_jobs: config.jobs.max_concurrent_jobs,
            max_queued_jobs: config.jobs.max_queued_jobs,
            job_timeout: config.job_timeout(),
            job_ttl: config.job_ttl(),
            eviction_interval: Duration::from_secs(config.jobs.eviction_interval_secs),
            profile: TranscodeProfile::from_config(config),
        }
    }
}

/// Metadata lookup result for `info`
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub content_id: ContentId,
    pub metadata: MediaMetadata,
    pub already_downloaded: bool,

    /// Name of the existing artifact, if any
    pub filename: Option<String>,
}

/// The dispatcher: owns every collaborator a job needs. Cheap to clone.
#[derive(Clone)]
pub struct AcquisitionService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    tracker: Arc<JobTracker>,
    registry: ContentRegistry,
    storage: Storage,
    chain: StrategyChain,
    transcoder: Arc<dyn Transcoder>,
    options: ServiceOptions,
    permits: Arc<Semaphore>,
    // Content ids with a job that has not finished yet
    in_progress: Mutex<HashSet<ContentId>>,
    cancel_tokens: Mutex<HashMap<JobId, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Releases a content id from the in-progress set when the job ends, however it ends
struct InProgressGuard {
    inner: Arc<ServiceInner>,
    content_id: ContentId,
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.inner.in_progress.lock().remove(&self.content_id);
    }
}

impl AcquisitionService {
    pub fn new(
        storage: Storage,
        chain: StrategyChain,
        transcoder: Arc<dyn Transcoder>,
        options: ServiceOptions,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(ServiceInner {
                tracker: Arc::new(JobTracker::new()),
                registry: ContentRegistry::new(storage.output_dir()),
                storage,
                chain,
                transcoder,
                options,
                permits,
                in_progress: Mutex::new(HashSet::new()),
                cancel_tokens: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wire up the production collaborators described by `config`
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let storage = Storage::new(&config.storage.output_dir);
        storage.ensure_dirs()?;
        let chain = StrategyChain::from_config(config)?;
        tracing::info!("Acquisition strategies: {}", chain.names().join(" -> "));

        Ok(Self::new(
            storage,
            chain,
            Arc::new(FfmpegTranscoder::from_config(config)),
            ServiceOptions::from_config(config),
        ))
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.inner.tracker
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.inner.registry
    }

    /// Metadata for `url` without starting a download
    pub async fn info(&self, url: &str) -> Result<MediaInfo, ProxyError> {
        let content_id = resolver::resolve(url)?;
        let metadata = self
            .inner
            .chain
            .fetch_metadata(&Target::new(content_id.clone()))
            .await?;
        let existing = self.inner.registry.exists(&content_id)?;

        Ok(MediaInfo {
            content_id,
            metadata,
            already_downloaded: existing.is_some(),
            filename: existing.map(|a| a.filename),
        })
    }

    /// Admit a download and return its job id immediately
    pub fn submit(&self, url: &str) -> Result<JobId, ProxyError> {
        let (job_id, _handle) = self.spawn_job(url)?;
        Ok(job_id)
    }

    /// Submit and wait for the job to finish (used by the CLI)
    pub async fn run_to_completion(&self, url: &str) -> Result<JobRecord, ProxyError> {
        let (job_id, handle) = self.spawn_job(url)?;
        self.await_job(&job_id, handle).await
    }

    /// Submit and hand back the worker's handle for callers that watch the job
    pub fn submit_watched(&self, url: &str) -> Result<(JobId, JoinHandle<()>), ProxyError> {
        self.spawn_job(url)
    }

    /// Wait for a job spawned by [`submit_watched`](Self::submit_watched)
    pub async fn await_job(&self, job_id: &JobId, handle: JoinHandle<()>) -> Result<JobRecord, ProxyError> {
        handle
            .await
            .map_err(|e| ProxyError::Internal(anyhow::anyhow!("Worker task failed: {}", e)))?;
        self.inner
            .tracker
            .get(job_id)
            .ok_or_else(|| ProxyError::NotFound(job_id.to_string()))
    }

    /// Request cancellation; false when the job is unknown or already finished
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.cancel_tokens.lock().get(job_id) {
            Some(token) => {
                tracing::info!("Cancelling job {}", job_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Delete an artifact and forget its registry entry
    pub fn delete_artifact(&self, filename: &str) -> Result<(), ProxyError> {
        self.inner.storage.delete(filename)?;
        self.inner.registry.forget(filename)?;
        Ok(())
    }

    pub fn list_artifacts(&self) -> crate::Result<Vec<ArtifactRecord>> {
        self.inner.registry.list()
    }

    /// Periodically drop finished jobs older than the configured TTL
    pub fn spawn_eviction_task(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.options.eviction_interval);
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.tracker.evict_expired(inner.options.job_ttl);
                    }
                }
            }
            tracing::debug!("Job eviction task stopped");
        })
    }

    /// Cancel every running and queued job
    pub fn shutdown(&self) {
        tracing::info!("Shutting down acquisition service");
        self.inner.shutdown.cancel();
    }

    fn spawn_job(&self, url: &str) -> Result<(JobId, JoinHandle<()>), ProxyError> {
        let content_id = resolver::resolve(url)?;

        if let Some(existing) = self.inner.registry.exists(&content_id)? {
            return Err(ProxyError::AlreadyExists {
                content_id,
                filename: existing.filename,
            });
        }

        let guard = self.claim(&content_id)?;
        let job_id = self
            .inner
            .tracker
            .submit(resolver::strip_list_params(url), Some(content_id.clone()));
        let cancel = self.inner.shutdown.child_token();
        self.inner
            .cancel_tokens
            .lock()
            .insert(job_id.clone(), cancel.clone());

        tracing::info!("Queued job {} for {}", job_id, content_id);
        let inner = self.inner.clone();
        let worker_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            run_job(inner, worker_job_id, content_id, cancel, guard).await;
        });
        Ok((job_id, handle))
    }

    /// Check-and-insert into the in-progress set under one lock
    fn claim(&self, content_id: &ContentId) -> Result<InProgressGuard, ProxyError> {
        let mut in_progress = self.inner.in_progress.lock();
        if in_progress.contains(content_id) {
            return Err(ProxyError::AlreadyInProgress(content_id.clone()));
        }
        let capacity = self.inner.options.max_concurrent_jobs + self.inner.options.max_queued_jobs;
        if in_progress.len() >= capacity {
            return Err(ProxyError::QueueFull);
        }
        in_progress.insert(content_id.clone());

        Ok(InProgressGuard {
            inner: self.inner.clone(),
            content_id: content_id.clone(),
        })
    }
}

async fn run_job(
    inner: Arc<ServiceInner>,
    job_id: JobId,
    content_id: ContentId,
    cancel: CancellationToken,
    _guard: InProgressGuard,
) {
    let result = async {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
            permit = inner.permits.clone().acquire_owned() => {
                permit.map_err(|_| ProxyError::Cancelled)?
            }
        };

        let timeout = inner.options.job_timeout;
        let run = AssertUnwindSafe(execute(&inner, &job_id, &content_id, &cancel)).catch_unwind();
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(ProxyError::Internal(anyhow::anyhow!(
                "Internal error: {}",
                panic_message(&*payload)
            ))),
            Err(_) => Err(ProxyError::TimedOut(timeout)),
        }
    }
    .await;

    inner.cancel_tokens.lock().remove(&job_id);
    match result {
        Ok(path) => {
            tracing::info!("Job {} finished: {}", job_id, path.display());
            inner.tracker.complete(&job_id, &path);
        }
        Err(e) => {
            tracing::error!("Job {} failed: {}", job_id, e);
            inner.tracker.fail(&job_id, e.to_string());
        }
    }
}

fn panic_message<'a>(payload: &'a (dyn Any + Send + 'static)) -> &'a str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "worker panicked"
    }
}

/// One job from permit to finished artifact. The work directory lives only as long
/// as this future, so dropping it on timeout also removes the intermediates.
async fn execute(
    inner: &ServiceInner,
    job_id: &JobId,
    content_id: &ContentId,
    cancel: &CancellationToken,
) -> Result<PathBuf, ProxyError> {
    // Another job may have produced the file while this one was queued
    if let Some(existing) = inner.registry.exists(content_id)? {
        tracing::info!("{} already downloaded as {}", content_id, existing.filename);
        return Ok(existing.path);
    }

    inner.tracker.start(job_id);
    tracing::info!("Starting job {} for {}", job_id, content_id);

    let work_dir = inner.storage.work_dir(job_id)?;
    let progress = ProgressSink::for_job(inner.tracker.clone(), job_id.clone());
    let target = Target::new(content_id.clone());

    let acquisition = inner
        .chain
        .acquire(&target, work_dir.path(), &progress, cancel)
        .await?;
    tracing::info!(
        "Job {} got {} audio via {}",
        job_id,
        acquisition.audio.format.as_str(),
        acquisition.strategy
    );
    inner.tracker.set_title(job_id, acquisition.metadata.title.clone());

    progress.absolute(DOWNLOAD_BAND.1);
    progress.status("Converting to MP3");
    let encoded = work_dir.path().join(format!("encoded.{}", ARTIFACT_EXTENSION));
    let transcode = inner
        .transcoder
        .transcode(&acquisition.audio.path, &encoded, &inner.options.profile);
    tokio::select! {
        _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
        result = transcode => {
            result.map_err(|e| ProxyError::TranscodeFailed(format!("{:#}", e)))?;
        }
    }

    progress.status("Saving");
    let filename = artifact_filename(&acquisition.metadata.title, content_id);
    let path = inner.storage.finalize(&encoded, &filename)?;
    inner.registry.record(content_id, &filename)?;

    Ok(path)
}
