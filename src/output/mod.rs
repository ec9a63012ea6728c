//! Terminal rendering for the CLI commands

use anyhow::Result;
use console::style;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::jobs::{JobRecord, JobState};
use crate::registry::ArtifactRecord;
use crate::utils::{format_duration, format_file_size};
use crate::worker::MediaInfo;

/// Render the artifact listing
pub fn format_artifacts(artifacts: &[ArtifactRecord], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let files: Vec<_> = artifacts
                .iter()
                .map(|a| {
                    json!({
                        "filename": a.filename,
                        "content_id": a.content_id,
                        "size": a.size,
                        "size_human": format_file_size(a.size),
                        "modified": a.modified,
                    })
                })
                .collect();
            Ok(serde_json::to_string_pretty(&json!({ "files": files }))?)
        }
        OutputFormat::Text => {
            if artifacts.is_empty() {
                return Ok("No downloaded files".to_string());
            }
            let lines: Vec<String> = artifacts
                .iter()
                .map(|a| {
                    format!(
                        "{:>10}  {}  {}",
                        format_file_size(a.size),
                        a.modified.format("%Y-%m-%d %H:%M"),
                        a.filename
                    )
                })
                .collect();
            Ok(lines.join("\n"))
        }
    }
}

/// Render a metadata lookup
pub fn format_info(info: &MediaInfo, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(info)?),
        OutputFormat::Text => {
            let metadata = &info.metadata;
            let mut lines = vec![
                format!("Title:     {}", metadata.title),
                format!("Uploader:  {}", metadata.uploader.as_deref().unwrap_or("Unknown")),
                format!("Duration:  {}", format_duration(metadata.duration)),
                format!("ID:        {}", info.content_id),
            ];
            if let Some(views) = metadata.view_count {
                lines.push(format!("Views:     {}", views));
            }
            match &info.filename {
                Some(filename) => lines.push(format!("Status:    already downloaded as {}", filename)),
                None => lines.push("Status:    not downloaded".to_string()),
            }
            Ok(lines.join("\n"))
        }
    }
}

/// One-line summary of a finished job
pub fn job_summary(job: &JobRecord) -> String {
    match job.state {
        JobState::Succeeded => format!(
            "{} {}",
            style("✓").green(),
            job.output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        ),
        JobState::Failed => format!(
            "{} {}",
            style("✗").red(),
            job.error.as_deref().unwrap_or("Download failed")
        ),
        state => format!("{} {}", style("…").yellow(), state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::MediaMetadata;
    use crate::resolver::ContentId;
    use chrono::Utc;
    use std::path::PathBuf;

    fn artifact() -> ArtifactRecord {
        ArtifactRecord {
            filename: "Song_abc12345678.mp3".to_string(),
            path: PathBuf::from("/tmp/Song_abc12345678.mp3"),
            content_id: ContentId::parse("abc12345678").ok(),
            size: 2048,
            modified: Utc::now(),
        }
    }

    #[test]
    fn test_artifacts_text() {
        let text = format_artifacts(&[artifact()], &OutputFormat::Text).unwrap();
        assert!(text.contains("2.0 KB"));
        assert!(text.ends_with("Song_abc12345678.mp3"));
        assert_eq!(format_artifacts(&[], &OutputFormat::Text).unwrap(), "No downloaded files");
    }

    #[test]
    fn test_artifacts_json() {
        let out = format_artifacts(&[artifact()], &OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["files"][0]["content_id"], "abc12345678");
        assert_eq!(value["files"][0]["size_human"], "2.0 KB");
    }

    #[test]
    fn test_info_text() {
        let info = MediaInfo {
            content_id: ContentId::parse("abc12345678").unwrap(),
            metadata: MediaMetadata {
                title: "Song".to_string(),
                duration: Some(3725),
                ..Default::default()
            },
            already_downloaded: false,
            filename: None,
        };
        let text = format_info(&info, &OutputFormat::Text).unwrap();
        assert!(text.contains("Duration:  01:02:05"));
        assert!(text.contains("not downloaded"));
    }
}
