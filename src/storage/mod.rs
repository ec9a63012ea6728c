//! Placement and cleanup of artifacts and intermediates.
//!
//! Every job gets a private work directory under the output directory. Raw downloads
//! and the transcoder's output are written there, and the directory is removed when the
//! [`WorkDir`] guard drops, whatever the outcome of the job. Only [`Storage::finalize`]
//! moves a file out of it into the output directory proper.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::jobs::JobId;
use crate::utils::{extension_of, ARTIFACT_EXTENSION};
use crate::ProxyError;

/// Prefix of per-job work directories
pub const WORK_DIR_PREFIX: &str = ".work-";

/// Extensions that only ever belong to unfinished downloads
pub const TEMP_EXTENSIONS: &[&str] = &["part", "ytdl", "tmp", "temp", "webm", "m4a", "opus", "weba", "aac"];

/// Owns the output directory layout
#[derive(Debug, Clone)]
pub struct Storage {
    output_dir: PathBuf,
}

/// A job's scratch directory, deleted with everything in it on drop
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Storage {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory if needed
    pub fn ensure_dirs(&self) -> crate::Result<()> {
        fs_err::create_dir_all(&self.output_dir)
            .context("Failed to create output directory")?;
        Ok(())
    }

    /// Create a fresh work directory for one job
    pub fn work_dir(&self, job_id: &JobId) -> crate::Result<WorkDir> {
        self.ensure_dirs()?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", WORK_DIR_PREFIX, job_id))
            .tempdir_in(&self.output_dir)
            .context("Failed to create job work directory")?;

        tracing::debug!("Created work directory {}", dir.path().display());
        Ok(WorkDir { dir })
    }

    /// Move a finished file into the output directory under `filename`
    pub fn finalize(&self, source: &Path, filename: &str) -> crate::Result<PathBuf> {
        validate_filename(filename)?;
        let destination = self.output_dir.join(filename);

        if destination.exists() {
            tracing::warn!("Replacing existing artifact {}", destination.display());
            fs_err::remove_file(&destination)?;
        }

        if let Err(rename_err) = fs_err::rename(source, &destination) {
            tracing::debug!("Rename failed ({}), copying instead", rename_err);
            fs_err::copy(source, &destination)
                .context("Failed to copy artifact into output directory")?;
            fs_err::remove_file(source)?;
        }

        Ok(destination)
    }

    /// Path of an existing artifact, rejecting anything that is not a plain file name
    pub fn resolve_artifact(&self, filename: &str) -> Result<PathBuf, ProxyError> {
        validate_filename(filename)?;
        let path = self.output_dir.join(filename);
        // Only finished artifacts are reachable; partials and stray files are not
        if path.is_file() && extension_of(&path).as_deref() == Some(ARTIFACT_EXTENSION) {
            Ok(path)
        } else {
            Err(ProxyError::NotFound(filename.to_string()))
        }
    }

    /// Delete an artifact; deleting something that is not there is `NotFound`
    pub fn delete(&self, filename: &str) -> Result<PathBuf, ProxyError> {
        let path = self.resolve_artifact(filename)?;
        match fs_err::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Deleted artifact {}", filename);
                Ok(path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProxyError::NotFound(filename.to_string()))
            }
            Err(e) => Err(ProxyError::Io(e)),
        }
    }

    /// Remove work directories and partial downloads left behind by an earlier run
    pub fn sweep_intermediates(&self) -> crate::Result<usize> {
        if !self.output_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs_err::read_dir(&self.output_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;

            let result = if file_type.is_dir() && name.starts_with(WORK_DIR_PREFIX) {
                fs_err::remove_dir_all(&path)
            } else if file_type.is_file() && is_temp_file(&path) {
                fs_err::remove_file(&path)
            } else {
                continue;
            };

            match result {
                Ok(()) => {
                    tracing::debug!("Swept leftover intermediate {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} leftover intermediate(s) from a previous run", removed);
        }
        Ok(removed)
    }
}

fn is_temp_file(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| TEMP_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Only bare, visible file names are acceptable artifact names
pub fn validate_filename(filename: &str) -> Result<(), ProxyError> {
    let invalid = filename.is_empty()
        || filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
        || filename.chars().any(|c| c.is_control());

    if invalid {
        Err(ProxyError::NotFound(filename.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (Storage, TempDir) {
        let dir = TempDir::new().unwrap();
        (Storage::new(dir.path()), dir)
    }

    #[test]
    fn test_work_dir_is_removed_on_drop() {
        let (storage, _dir) = storage();
        let job = JobId::new();
        let work = storage.work_dir(&job).unwrap();
        let raw = work.path().join("source.webm");
        fs_err::write(&raw, b"raw audio").unwrap();
        let work_path = work.path().to_path_buf();

        drop(work);
        assert!(!work_path.exists());
        assert!(!raw.exists());
    }

    #[test]
    fn test_finalize_moves_file_out_of_work_dir() {
        let (storage, _dir) = storage();
        let work = storage.work_dir(&JobId::new()).unwrap();
        let encoded = work.path().join("out.mp3");
        fs_err::write(&encoded, b"mp3 bytes").unwrap();

        let final_path = storage.finalize(&encoded, "Song_abc12345678.mp3").unwrap();
        assert!(final_path.is_file());
        assert!(!encoded.exists());
        assert_eq!(fs_err::read(&final_path).unwrap(), b"mp3 bytes");

        drop(work);
        assert!(final_path.is_file());
    }

    #[test]
    fn test_delete_missing_file_is_not_found() {
        let (storage, dir) = storage();
        fs_err::write(dir.path().join("a_abc12345678.mp3"), b"x").unwrap();

        assert!(storage.delete("a_abc12345678.mp3").is_ok());
        assert!(matches!(storage.delete("a_abc12345678.mp3"), Err(ProxyError::NotFound(_))));
        assert!(matches!(storage.delete("never-existed.mp3"), Err(ProxyError::NotFound(_))));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let (storage, _dir) = storage();
        for name in ["../etc/passwd", "..", "a/b.mp3", "a\\b.mp3", ".audioproxy-index.json", ""] {
            assert!(storage.resolve_artifact(name).is_err(), "{:?}", name);
        }
    }

    #[test]
    fn test_only_artifacts_are_reachable() {
        let (storage, dir) = storage();
        for name in ["stray.part", "notes.txt", "source.webm"] {
            fs_err::write(dir.path().join(name), b"x").unwrap();
            assert!(matches!(storage.resolve_artifact(name), Err(ProxyError::NotFound(_))), "{}", name);
            assert!(storage.delete(name).is_err(), "{}", name);
            assert!(dir.path().join(name).exists());
        }
    }

    #[test]
    fn test_dots_inside_names_are_fine() {
        let (storage, dir) = storage();
        fs_err::write(dir.path().join("Wait... what_abc12345678.mp3"), b"x").unwrap();
        assert!(storage.resolve_artifact("Wait... what_abc12345678.mp3").is_ok());
    }

    #[test]
    fn test_sweep_removes_only_intermediates() {
        let (storage, dir) = storage();
        let leftover = dir.path().join(".work-deadbeef-abc");
        fs_err::create_dir_all(&leftover).unwrap();
        fs_err::write(leftover.join("source.m4a"), b"x").unwrap();
        fs_err::write(dir.path().join("stray.part"), b"x").unwrap();
        fs_err::write(dir.path().join("stray.webm"), b"x").unwrap();
        fs_err::write(dir.path().join("Keep_abc12345678.mp3"), b"x").unwrap();

        let removed = storage.sweep_intermediates().unwrap();
        assert_eq!(removed, 3);
        assert!(!leftover.exists());
        assert!(dir.path().join("Keep_abc12345678.mp3").exists());
    }

    #[test]
    fn test_sweep_on_missing_dir() {
        let storage = Storage::new("/nonexistent/audioproxy/output");
        assert_eq!(storage.sweep_intermediates().unwrap(), 0);
    }
}
