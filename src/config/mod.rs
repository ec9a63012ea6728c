use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "audioproxy.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Where artifacts live
    pub storage: StorageConfig,

    /// External binaries and credentials
    pub tools: ToolsConfig,

    /// Which acquisition strategies are enabled
    pub strategies: StrategyConfig,

    /// Output audio profile
    pub transcode: TranscodeConfig,

    /// Job scheduling limits
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding finished MP3 files (and per-job work directories)
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp executable
    pub yt_dlp_path: String,

    /// ffmpeg executable; resolved per platform when unset
    pub ffmpeg_path: Option<String>,

    /// Netscape-format cookies file handed to yt-dlp when it exists
    pub cookie_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Plain yt-dlp extraction
    pub ytdlp_default: bool,

    /// yt-dlp with a desktop browser profile
    pub ytdlp_web: bool,

    /// Piped API instance used as the protocol-based fallback
    pub piped_instance: Option<String>,

    /// External "URL to MP3" conversion endpoint
    pub converter_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Jobs allowed to run at the same time
    pub max_concurrent_jobs: usize,

    /// Jobs allowed to wait for a slot before submissions are rejected
    pub max_queued_jobs: usize,

    /// Deadline for a single strategy attempt
    pub attempt_timeout_secs: u64,

    /// Deadline for a whole job, queueing excluded
    pub job_timeout_secs: u64,

    /// How long finished jobs stay pollable
    pub job_ttl_secs: u64,

    /// How often expired jobs are evicted
    pub eviction_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("static").join("downloads"),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_path: None,
            cookie_file: Some(PathBuf::from("cookies.txt")),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ytdlp_default: true,
            ytdlp_web: true,
            piped_instance: Some("https://pipedapi.kavin.rocks".to_string()),
            converter_endpoint: None,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 192,
            sample_rate_hz: 44100,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_queued_jobs: 32,
            attempt_timeout_secs: 300,
            job_timeout_secs: 1200,
            job_ttl_secs: 3600,
            eviction_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the usual locations, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::read_from(path)?,
            None => match Self::existing_config_path() {
                Some(path) => Self::read_from(&path)?,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn read_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Path `config --init` writes to
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("audioproxy").join("config.yaml"))
    }

    fn existing_config_path() -> Option<PathBuf> {
        // Current directory first for easy testing
        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        Self::default_config_path().ok().filter(|path| path.exists())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_value("AUDIOPROXY_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(dir);
        }
        if let Some(ffmpeg) = env_value("AUDIOPROXY_FFMPEG") {
            self.tools.ffmpeg_path = Some(ffmpeg);
        }
        if let Some(yt_dlp) = env_value("AUDIOPROXY_YT_DLP") {
            self.tools.yt_dlp_path = yt_dlp;
        }
        if let Some(cookies) = env_value("AUDIOPROXY_COOKIES") {
            self.tools.cookie_file = Some(PathBuf::from(cookies));
        }
        if let Some(host) = env_value("AUDIOPROXY_HOST") {
            self.server.host = host;
        }
        match env_value("AUDIOPROXY_PORT").map(|port| port.parse::<u16>()) {
            Some(Ok(port)) => self.server.port = port,
            Some(Err(_)) => tracing::warn!("Ignoring invalid AUDIOPROXY_PORT"),
            None => {}
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.output_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.output_dir must be configured");
        }
        if self.jobs.max_concurrent_jobs == 0 {
            anyhow::bail!("jobs.max_concurrent_jobs must be at least 1");
        }
        if self.jobs.attempt_timeout_secs == 0 || self.jobs.job_timeout_secs == 0 {
            anyhow::bail!("job timeouts must be greater than zero");
        }
        if self.transcode.bitrate_kbps == 0 || self.transcode.sample_rate_hz == 0 {
            anyhow::bail!("transcode bitrate and sample rate must be greater than zero");
        }
        if !self.strategies.ytdlp_default
            && !self.strategies.ytdlp_web
            && self.strategies.piped_instance.is_none()
            && self.strategies.converter_endpoint.is_none()
        {
            anyhow::bail!("at least one acquisition strategy must be enabled");
        }
        Ok(())
    }

    /// ffmpeg location: configured path, else the platform's usual install location
    pub fn ffmpeg_path(&self) -> String {
        if let Some(path) = &self.tools.ffmpeg_path {
            return path.clone();
        }

        if cfg!(windows) {
            return r"C:\ffmpeg\bin\ffmpeg.exe".to_string();
        }

        for candidate in ["/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg"] {
            if Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }

        tracing::warn!("FFmpeg not found in standard locations; relying on PATH");
        "ffmpeg".to_string()
    }

    /// Cookie file, only when it actually exists
    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.tools
            .cookie_file
            .as_ref()
            .filter(|path| path.is_file())
            .cloned()
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs.attempt_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs.job_timeout_secs)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.jobs.job_ttl_secs)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Listen: {}:{}", self.server.host, self.server.port);
        println!("  Output directory: {}", self.storage.output_dir.display());
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
        println!("  ffmpeg: {}", self.ffmpeg_path());
        match self.cookie_file() {
            Some(path) => println!("  Cookies: {}", path.display()),
            None => println!("  Cookies: none (anonymous)"),
        }
        println!("  Strategies:");
        println!("    yt-dlp (default): {}", self.strategies.ytdlp_default);
        println!("    yt-dlp (web): {}", self.strategies.ytdlp_web);
        println!("    piped: {}", self.strategies.piped_instance.as_deref().unwrap_or("disabled"));
        println!("    converter: {}", self.strategies.converter_endpoint.as_deref().unwrap_or("disabled"));
        println!(
            "  Output profile: {} kbps, {} Hz",
            self.transcode.bitrate_kbps, self.transcode.sample_rate_hz
        );
        println!(
            "  Jobs: {} concurrent, {} queued, {}s per attempt, {}s per job",
            self.jobs.max_concurrent_jobs,
            self.jobs.max_queued_jobs,
            self.jobs.attempt_timeout_secs,
            self.jobs.job_timeout_secs
        );
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
