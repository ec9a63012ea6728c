use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::resolver::ContentId;

pub mod progress;

pub use progress::ProgressSink;

/// Opaque job identifier handed to clients
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One acquisition attempt as seen by polling clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    pub content_id: Option<ContentId>,

    /// URL as submitted (list parameters stripped)
    pub url: String,

    pub state: JobState,

    /// 0 to 100, never decreasing while running
    pub progress: f64,

    /// What the worker is doing right now
    pub status_message: String,

    /// Media title, once metadata is known
    pub title: Option<String>,

    /// Set only when the job succeeded
    pub output_path: Option<PathBuf>,

    /// File name of `output_path`, for the file endpoints
    pub filename: Option<String>,

    /// Set only when the job failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn new(job_id: JobId, url: String, content_id: Option<ContentId>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            content_id,
            url,
            state: JobState::Pending,
            progress: 0.0,
            status_message: "Queued".to_string(),
            title: None,
            output_path: None,
            filename: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// In-memory job store shared by submitters, workers and pollers.
///
/// Each record is written only by its worker; the single map lock is held just long
/// enough to copy or mutate one entry.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh job in the `Pending` state
    pub fn submit(&self, url: impl Into<String>, content_id: Option<ContentId>) -> JobId {
        let job_id = JobId::new();
        let record = JobRecord::new(job_id.clone(), url.into(), content_id);
        self.jobs.lock().insert(job_id.clone(), record);
        tracing::debug!("Allocated job {}", job_id);
        job_id
    }

    /// Snapshot of a job
    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.lock().get(job_id).cloned()
    }

    /// Pending -> Running
    pub fn start(&self, job_id: &JobId) -> bool {
        self.with_job(job_id, |job| {
            if job.state != JobState::Pending {
                return false;
            }
            job.state = JobState::Running;
            job.status_message = "Starting".to_string();
            true
        })
    }

    /// Raise the progress; lower, non-finite or post-terminal values are ignored
    pub fn update_progress(&self, job_id: &JobId, percent: f64) -> bool {
        if !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        self.with_job(job_id, |job| {
            if job.state.is_terminal() || percent <= job.progress {
                return false;
            }
            job.progress = percent;
            true
        })
    }

    pub fn set_status(&self, job_id: &JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.with_job(job_id, |job| {
            if job.state.is_terminal() {
                return false;
            }
            job.status_message = message;
            true
        })
    }

    pub fn set_title(&self, job_id: &JobId, title: impl Into<String>) -> bool {
        let title = title.into();
        self.with_job(job_id, |job| {
            job.title = Some(title);
            true
        })
    }

    /// Mark the job succeeded; the first terminal transition wins
    pub fn complete(&self, job_id: &JobId, output_path: &Path) -> bool {
        self.with_job(job_id, |job| {
            if job.state.is_terminal() {
                tracing::warn!("Ignoring completion of already finished job {}", job.job_id);
                return false;
            }
            job.state = JobState::Succeeded;
            job.progress = 100.0;
            job.status_message = "Completed".to_string();
            job.filename = output_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            job.output_path = Some(output_path.to_path_buf());
            job.error = None;
            job.finished_at = Some(Utc::now());
            true
        })
    }

    /// Mark the job failed; the first terminal transition wins
    pub fn fail(&self, job_id: &JobId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.with_job(job_id, |job| {
            if job.state.is_terminal() {
                tracing::warn!("Ignoring failure of already finished job {}", job.job_id);
                return false;
            }
            job.state = JobState::Failed;
            job.status_message = "Failed".to_string();
            job.output_path = None;
            job.filename = None;
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
            true
        })
    }

    /// All jobs, newest first
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Jobs that have not reached a terminal state
    pub fn active_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|job| !job.state.is_terminal())
            .count()
    }

    /// Drop terminal jobs that finished more than `ttl` ago
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };
        self.evict_finished_before(cutoff)
    }

    fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished) if job.state.is_terminal() => finished > cutoff,
            _ => true,
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} expired job(s)", evicted);
        }
        evicted
    }

    fn with_job<F>(&self, job_id: &JobId, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord) -> bool,
    {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(job_id) {
            Some(job) => {
                let changed = f(job);
                if changed {
                    job.touch();
                }
                changed
            }
            None => false,
        }
    }
}
