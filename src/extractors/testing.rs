//! Scripted strategies for chain and worker tests.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AcquisitionStrategy, AudioFormat, MediaMetadata, RawAudio, Target};
use crate::jobs::ProgressSink;
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    FailMetadata(&'static str),
    FailAudio(&'static str),
    /// Never finishes on its own
    Hang,
    /// Reports success with a zero-byte file
    Empty,
    /// Panics while downloading
    Panic,
}

pub struct FakeStrategy {
    name: &'static str,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl FakeStrategy {
    pub fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Boxed strategy plus a counter of its metadata calls
    pub fn boxed(name: &'static str, behavior: Behavior) -> (Box<dyn AcquisitionStrategy>, Arc<AtomicUsize>) {
        let strategy = Self::new(name, behavior);
        let calls = strategy.calls.clone();
        (Box::new(strategy), calls)
    }
}

#[async_trait]
impl AcquisitionStrategy for FakeStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_metadata(&self, _target: &Target) -> Result<MediaMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::FailMetadata(msg) => anyhow::bail!(msg),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                anyhow::bail!("woke up")
            }
            _ => Ok(MediaMetadata {
                title: format!("{} title", self.name),
                ..Default::default()
            }),
        }
    }

    async fn fetch_audio(
        &self,
        _target: &Target,
        _metadata: &MediaMetadata,
        work_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<RawAudio> {
        let path = work_dir.join("source.m4a");
        match self.behavior {
            Behavior::FailAudio(msg) => {
                fs_err::write(work_dir.join("source.m4a.part"), b"partial")?;
                anyhow::bail!(msg)
            }
            Behavior::Empty => fs_err::write(&path, b"")?,
            Behavior::Panic => panic!("{} strategy blew up", self.name),
            _ => {
                progress.download(50.0);
                fs_err::write(&path, b"raw audio")?;
            }
        }
        Ok(RawAudio {
            path,
            format: AudioFormat::M4a,
            size: 9,
        })
    }
}
