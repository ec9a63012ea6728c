use parking_lot::Mutex;
use std::sync::Arc;

use super::{JobId, JobTracker};

/// Share of the job's progress bar spent downloading (the rest is metadata and transcode)
pub const DOWNLOAD_BAND: (f64, f64) = (5.0, 90.0);

/// Progress callback handed to strategies.
///
/// Reporting never fails: non-finite or regressing values are dropped and the last
/// good value stands. Strategy-local percentages are mapped into [`DOWNLOAD_BAND`].
pub struct ProgressSink {
    target: Option<(Arc<JobTracker>, JobId)>,
    last: Mutex<f64>,
}

impl ProgressSink {
    /// Sink that forwards to a tracked job
    pub fn for_job(tracker: Arc<JobTracker>, job_id: JobId) -> Self {
        Self {
            target: Some((tracker, job_id)),
            last: Mutex::new(0.0),
        }
    }

    /// Sink that only remembers the last value (metadata lookups, tests)
    pub fn detached() -> Self {
        Self {
            target: None,
            last: Mutex::new(0.0),
        }
    }

    /// Report download progress as a 0-100 percentage local to the current transfer
    pub fn download(&self, local_percent: f64) {
        if !local_percent.is_finite() {
            return;
        }
        let (start, end) = DOWNLOAD_BAND;
        let local = local_percent.clamp(0.0, 100.0);
        self.absolute(start + (end - start) * local / 100.0);
    }

    /// Report progress on the job's own 0-100 scale
    pub fn absolute(&self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        {
            let mut last = self.last.lock();
            if percent <= *last {
                return;
            }
            *last = percent;
        }
        if let Some((tracker, job_id)) = &self.target {
            tracker.update_progress(job_id, percent);
        }
    }

    /// Update the job's human-readable status line
    pub fn status(&self, message: impl Into<String>) {
        if let Some((tracker, job_id)) = &self.target {
            tracker.set_status(job_id, message);
        }
    }

    /// Last value accepted
    pub fn last(&self) -> f64 {
        *self.last.lock()
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("job_id", &self.target.as_ref().map(|(_, id)| id))
            .field("last", &self.last())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_maps_into_band() {
        let sink = ProgressSink::detached();
        sink.download(0.0);
        assert_eq!(sink.last(), DOWNLOAD_BAND.0);
        sink.download(100.0);
        assert_eq!(sink.last(), DOWNLOAD_BAND.1);
    }

    #[test]
    fn test_bad_values_keep_last_good() {
        let sink = ProgressSink::detached();
        sink.absolute(40.0);
        sink.absolute(f64::NAN);
        sink.absolute(f64::INFINITY);
        sink.absolute(10.0);
        sink.download(-50.0);
        assert_eq!(sink.last(), 40.0);
    }

    #[test]
    fn test_forwards_to_tracker() {
        let tracker = Arc::new(JobTracker::new());
        let id = tracker.submit("u", None);
        tracker.start(&id);
        let sink = ProgressSink::for_job(tracker.clone(), id.clone());

        sink.status("Downloading");
        sink.download(50.0);

        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status_message, "Downloading");
        assert_eq!(job.progress, 47.5);
    }
}
