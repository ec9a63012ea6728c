use std::path::Path;

use crate::resolver::ContentId;

/// Maximum length of a stored filename, extension included
pub const MAX_FILENAME_LEN: usize = 100;

/// Extension of every finished artifact
pub const ARTIFACT_EXTENSION: &str = "mp3";

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\''];

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format a duration as `MM:SS`, or `HH:MM:SS` past the hour
pub fn format_duration(seconds: Option<u64>) -> String {
    let total_seconds = match seconds {
        Some(s) if s > 0 => s,
        _ => return "00:00".to_string(),
    };
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Sanitize a filename for safe filesystem usage.
///
/// Reserved characters, quotes and control characters are removed. Names longer than
/// [`MAX_FILENAME_LEN`] characters lose characters from the right of the base name; the
/// extension is kept intact.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !RESERVED_CHARS.contains(c) && !c.is_control())
        .collect();

    if cleaned.chars().count() <= MAX_FILENAME_LEN {
        return cleaned;
    }

    let (base, ext) = match split_extension(&cleaned) {
        (_, ext) if ext.chars().count() >= MAX_FILENAME_LEN => (cleaned.as_str(), ""),
        split => split,
    };
    let budget = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
    let mut truncated: String = base.chars().take(budget).collect();
    truncated.push_str(ext);
    truncated
}

/// Build the canonical artifact name `{title}_{content_id}.mp3`.
///
/// The title is shortened so the whole name fits in [`MAX_FILENAME_LEN`]; the content id
/// is never truncated because the registry finds artifacts by it.
pub fn artifact_filename(title: &str, content_id: &ContentId) -> String {
    let suffix = format!("_{}.{}", content_id, ARTIFACT_EXTENSION);
    let budget = MAX_FILENAME_LEN.saturating_sub(suffix.chars().count());

    let cleaned: String = title
        .chars()
        .filter(|c| !RESERVED_CHARS.contains(c) && !c.is_control())
        .collect();
    let mut stem: String = cleaned.trim().chars().take(budget).collect();
    stem = stem.trim_end().trim_start_matches('.').to_string();
    if stem.is_empty() {
        stem = "audio".to_string();
    }

    format!("{}{}", stem, suffix)
}

/// Split `name.ext` at the last dot; a leading dot does not start an extension
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Lowercased extension of a path, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Check if the configured external tools are available
pub async fn check_dependencies(yt_dlp: &str, ffmpeg: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!("{} - required by the yt-dlp strategies", yt_dlp));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!("{} - required to transcode audio to MP3", ffmpeg));
    }

    missing
}

/// Check if a command can be spawned and exits successfully
pub async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(None), "00:00");
        assert_eq!(format_duration(Some(0)), "00:00");
        assert_eq!(format_duration(Some(30)), "00:30");
        assert_eq!(format_duration(Some(90)), "01:30");
        assert_eq!(format_duration(Some(3661)), "01:01:01");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello: World?.mp3"), "Hello World.mp3");
        assert_eq!(sanitize_filename("a/b\\c|d*e<f>g\"h'i.mp3"), "abcdefghi.mp3");
        assert_eq!(sanitize_filename("Tab\there.mp3"), "Tabhere.mp3");
    }

    #[test]
    fn test_sanitize_truncates_base_not_extension() {
        let long = format!("{}.mp3", "x".repeat(150));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.chars().count(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".mp3"));

        let unicode = format!("{}.mp3", "é".repeat(120));
        let sanitized = sanitize_filename(&unicode);
        assert_eq!(sanitized.chars().count(), MAX_FILENAME_LEN);
        assert!(sanitized.ends_with(".mp3"));
    }

    #[test]
    fn test_sanitize_is_idempotent_and_bounded() {
        let samples = [
            "",
            "plain",
            "Artist - Song (Official Video) [HD].mp3",
            "what?/is:this*|\"'.mp3",
            ".hidden",
            "many.dots.in.name.webm",
            &"a/b".repeat(80),
            &format!("{}.{}", "t".repeat(99), "e".repeat(30)),
            &format!("name.{}", "e".repeat(120)),
        ];
        for sample in samples {
            let once = sanitize_filename(sample);
            assert_eq!(sanitize_filename(&once), once, "{:?}", sample);
            let (_, ext) = split_extension(&once);
            assert!(once.chars().count() <= MAX_FILENAME_LEN + ext.chars().count());
        }
    }

    #[test]
    fn test_artifact_filename_keeps_content_id() {
        let id = ContentId::parse("abc12345678").unwrap();
        assert_eq!(artifact_filename("My Song: Live?", &id), "My Song Live_abc12345678.mp3");
        assert_eq!(artifact_filename("???", &id), "audio_abc12345678.mp3");

        let long = artifact_filename(&"z".repeat(300), &id);
        assert_eq!(long.chars().count(), MAX_FILENAME_LEN);
        assert!(long.ends_with("_abc12345678.mp3"));
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("song.mp3"), ("song", ".mp3"));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("noext"), ("noext", ""));
    }
}
