//! Which content identifiers already have an artifact on disk.
//!
//! The output directory is the source of truth. A sidecar index maps content ids to
//! file names so lookups do not depend on the id surviving inside a sanitized name;
//! when the index misses or points at a vanished file, a directory scan repairs it.

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::resolver::ContentId;
use crate::utils::ARTIFACT_EXTENSION;
use crate::Result;

/// Sidecar index file kept in the output directory
pub const INDEX_FILE: &str = ".audioproxy-index.json";

/// A finished file in the output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub filename: String,
    pub path: PathBuf,
    pub content_id: Option<ContentId>,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

type Index = BTreeMap<String, String>;

pub struct ContentRegistry {
    output_dir: PathBuf,
    // Serializes read-modify-write cycles of the index file
    index_lock: Mutex<()>,
}

impl ContentRegistry {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            index_lock: Mutex::new(()),
        }
    }

    /// The canonical artifact for `content_id`, if one exists on disk
    pub fn exists(&self, content_id: &ContentId) -> Result<Option<ArtifactRecord>> {
        let _guard = self.index_lock.lock();
        let mut index = self.load_index();

        if let Some(filename) = index.get(content_id.as_str()).cloned() {
            let path = self.output_dir.join(&filename);
            if path.is_file() {
                return Ok(Some(artifact_record(&path, Some(content_id.clone()))?));
            }
            tracing::debug!("Index entry for {} points at missing {}", content_id, filename);
            index.remove(content_id.as_str());
            self.save_index(&index)?;
        }

        let Some(path) = self.scan_for(content_id)? else {
            return Ok(None);
        };

        if let Some(name) = path.file_name() {
            index.insert(content_id.to_string(), name.to_string_lossy().into_owned());
            self.save_index(&index)?;
        }
        Ok(Some(artifact_record(&path, Some(content_id.clone()))?))
    }

    /// Every artifact, newest first
    pub fn list(&self) -> Result<Vec<ArtifactRecord>> {
        let reverse: BTreeMap<String, String> = {
            let _guard = self.index_lock.lock();
            self.load_index()
                .into_iter()
                .map(|(id, filename)| (filename, id))
                .collect()
        };

        let mut records = Vec::new();
        for path in self.artifact_files()? {
            let filename = file_name_of(&path);
            let content_id = reverse
                .get(&filename)
                .and_then(|id| ContentId::parse(id).ok())
                .or_else(|| content_id_from_filename(&filename));
            match artifact_record(&path, content_id) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable artifact {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.filename.cmp(&b.filename)));
        Ok(records)
    }

    /// Remember that `filename` is the artifact for `content_id`
    pub fn record(&self, content_id: &ContentId, filename: &str) -> Result<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.load_index();
        index.insert(content_id.to_string(), filename.to_string());
        self.save_index(&index)
    }

    /// Drop every index entry pointing at `filename`
    pub fn forget(&self, filename: &str) -> Result<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.load_index();
        let before = index.len();
        index.retain(|_, name| name != filename);
        if index.len() != before {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn scan_for(&self, content_id: &ContentId) -> Result<Option<PathBuf>> {
        let files = self.artifact_files()?;
        let suffix = format!("_{}.{}", content_id, ARTIFACT_EXTENSION);

        let strict = files.iter().find(|path| file_name_of(path).ends_with(&suffix));
        if let Some(path) = strict {
            return Ok(Some(path.clone()));
        }

        // Names written before the `{title}_{id}` convention only contain the id somewhere
        Ok(files
            .into_iter()
            .find(|path| file_name_of(path).contains(content_id.as_str())))
    }

    fn artifact_files(&self) -> Result<Vec<PathBuf>> {
        if !self.output_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs_err::read_dir(&self.output_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = file_name_of(&path);
            let is_artifact = entry.file_type()?.is_file()
                && !name.starts_with('.')
                && crate::utils::extension_of(&path).as_deref() == Some(ARTIFACT_EXTENSION);
            if is_artifact {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn index_path(&self) -> PathBuf {
        self.output_dir.join(INDEX_FILE)
    }

    fn load_index(&self) -> Index {
        let path = self.index_path();
        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Index::new(),
            Err(e) => {
                tracing::warn!("Could not read artifact index: {}", e);
                return Index::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Artifact index is corrupt, rebuilding from disk: {}", e);
            Index::new()
        })
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        fs_err::create_dir_all(&self.output_dir)?;
        let json = serde_json::to_vec_pretty(index).context("Failed to serialize artifact index")?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.output_dir)
            .context("Failed to create temporary index file")?;
        tmp.write_all(&json)?;
        tmp.persist(self.index_path())
            .context("Failed to replace artifact index")?;
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn artifact_record(path: &Path, content_id: Option<ContentId>) -> Result<ArtifactRecord> {
    let metadata = fs_err::metadata(path)?;
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(ArtifactRecord {
        filename: file_name_of(path),
        path: path.to_path_buf(),
        content_id,
        size: metadata.len(),
        modified,
    })
}

/// Recover the id from a `{title}_{id}.mp3` name
pub fn content_id_from_filename(filename: &str) -> Option<ContentId> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"_([A-Za-z0-9_-]{11})\.mp3$").expect("valid regex")
    });
    pattern
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .and_then(|m| ContentId::parse(m.as_str()).ok())
}
