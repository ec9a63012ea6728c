use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

use crate::ProxyError;

/// Hosts we accept content URLs from (after stripping `www.`/`m.`/`music.`)
pub const ALLOWED_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com"];

const HOST_PREFIXES: &[&str] = &["www.", "m.", "music."];

/// Canonical identifier of one piece of content, independent of URL decoration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Validate a bare token (11 characters of `[A-Za-z0-9_-]`)
    pub fn parse(token: &str) -> Result<Self, ProxyError> {
        if token.contains('/') || token.contains('?') || !token_pattern().is_match(token) {
            return Err(ProxyError::InvalidUrl(format!("not a content identifier: {}", token)));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL handed to the extraction strategies
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"))
}

/// Path shapes tried in order after the `v` query parameter
fn path_shapes() -> &'static [(Option<&'static str>, Regex)] {
    static SHAPES: OnceLock<Vec<(Option<&'static str>, Regex)>> = OnceLock::new();
    SHAPES.get_or_init(|| {
        vec![
            (Some("youtu.be"), Regex::new(r"^/([^/]+)/?$").expect("valid regex")),
            (None, Regex::new(r"^/(?:embed|v|e|shorts|live)/([^/]+)/?$").expect("valid regex")),
        ]
    })
}

/// Resolve a source URL into its content identifier.
///
/// Every query parameter other than `v` is dropped before matching, so playlist
/// (`list`, `index`) and tracking (`si`, `feature`, ...) parameters never change
/// the result. The same goes for a `&list=...` suffix glued straight onto the path.
pub fn resolve(input: &str) -> Result<ContentId, ProxyError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::InvalidUrl("empty URL".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|_| ProxyError::InvalidUrl(format!("Invalid URL format: {}", trimmed)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidUrl("URL must use HTTP or HTTPS protocol".to_string()));
    }

    let host = normalized_host(&parsed)
        .ok_or_else(|| ProxyError::InvalidUrl(format!("URL has no host: {}", trimmed)))?;
    if !ALLOWED_HOSTS.contains(&host.as_str()) {
        return Err(ProxyError::InvalidUrl(format!("Unsupported site: {}", host)));
    }

    let path = path_without_params(&parsed);
    let token = video_param(&parsed).or_else(|| {
        path_shapes()
            .iter()
            .filter(|(only_host, _)| only_host.map_or(true, |h| h == host))
            .find_map(|(_, shape)| {
                shape
                    .captures(path)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
    });

    match token {
        Some(token) if !token.is_empty() => ContentId::parse(&token),
        _ => Err(ProxyError::InvalidUrl(format!("No video id in URL: {}", trimmed))),
    }
}

/// Remove everything except the `v` parameter from a URL's query string
pub fn strip_list_params(input: &str) -> String {
    let Ok(mut parsed) = Url::parse(input.trim()) else {
        return input.trim().to_string();
    };
    let path = path_without_params(&parsed).to_string();
    parsed.set_path(&path);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key == "v")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

fn normalized_host(parsed: &Url) -> Option<String> {
    let host = parsed.host_str()?.to_lowercase();
    let stripped = HOST_PREFIXES
        .iter()
        .find_map(|prefix| host.strip_prefix(prefix))
        .unwrap_or(host.as_str());
    Some(stripped.to_string())
}

/// The path up to the first `&` separator
fn path_without_params(parsed: &Url) -> &str {
    let path = parsed.path();
    path.split_once('&').map_or(path, |(head, _)| head)
}

fn video_param(parsed: &Url) -> Option<String> {
    if parsed.path() != "/watch" {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, value)| key == "v" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
