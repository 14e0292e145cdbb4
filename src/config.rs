//! Configuration types for bili-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Download behavior configuration (directories, teardown)
///
/// Groups settings related to where stream data is staged and delivered.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Public directory completed files are delivered into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Temporary directory for partial stream files (default: "./temp")
    ///
    /// Partial files are named deterministically, so a resumed run finds the
    /// same file across process restarts.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// How long the supervisor keeps its execution context alive after a
    /// terminal state, so subscribers can observe it (default: 500ms)
    #[serde(default = "default_teardown_linger", with = "duration_ms_serde")]
    pub teardown_linger: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            teardown_linger: default_teardown_linger(),
        }
    }
}

/// Network configuration for the upstream CDN and metadata API
///
/// The upstream servers reject requests without a browser-like User-Agent
/// and a platform Referer (anti-hotlinking), so both are always sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// User-Agent header sent on every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Referer header sent on every request
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Timeout for establishing a connection (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            referer: default_referer(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Retry behavior for transient transfer failures
///
/// The delay before retry `n` is `n * base_delay` (linear backoff), capped
/// at `max_delay`. These are documented defaults, not hard requirements.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay multiplied by the attempt number (default: 1 second)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false; the documented policy
    /// is plain linear backoff)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

/// Progress emission rate limiting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Emit a progress update only after this many bytes were written since
    /// the last emission (default: 100 KiB). The final emission on success
    /// is always sent regardless.
    #[serde(default = "default_emit_every_bytes")]
    pub emit_every_bytes: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            emit_every_bytes: default_emit_every_bytes(),
        }
    }
}

/// Contiguous split of the overall [0, 1] progress interval across phases
///
/// Each field is the *end* of its phase's sub-range; the next phase starts
/// where the previous one ends, and the finalize phase always ends at 1.0.
/// The proportions are a policy, not a contract; any monotonic ascending
/// split is accepted by [`PhaseWeights::validate`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PhaseWeights {
    /// End of the resolve phase (default: 0.10)
    #[serde(default = "default_resolve_end")]
    pub resolve_end: f64,

    /// End of the primary-stream transfer phase (default: 0.55)
    #[serde(default = "default_primary_end")]
    pub primary_end: f64,

    /// End of the secondary-stream transfer phase (default: 0.90)
    #[serde(default = "default_secondary_end")]
    pub secondary_end: f64,

    /// End of the merge phase (default: 0.98)
    #[serde(default = "default_merge_end")]
    pub merge_end: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            resolve_end: default_resolve_end(),
            primary_end: default_primary_end(),
            secondary_end: default_secondary_end(),
            merge_end: default_merge_end(),
        }
    }
}

impl PhaseWeights {
    /// Check that the phase boundaries are strictly ascending inside (0, 1).
    pub fn validate(&self) -> Result<()> {
        let bounds = [
            self.resolve_end,
            self.primary_end,
            self.secondary_end,
            self.merge_end,
        ];
        let ascending = bounds.windows(2).all(|w| w[0] < w[1]);
        if !ascending || bounds[0] <= 0.0 || bounds[3] >= 1.0 {
            return Err(Error::Config {
                message: format!(
                    "phase boundaries must be strictly ascending within (0, 1), got {bounds:?}"
                ),
                key: Some("phase_weights".to_string()),
            });
        }
        Ok(())
    }
}

/// External tool paths (ffmpeg)
///
/// Groups settings for external binaries, mirroring how the merge step is
/// delegated to a system transcoder.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

/// Main configuration
///
/// Every field has sensible defaults; `Config::default()` works out of the
/// box for local use.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download directories and teardown behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Upstream network headers and timeouts
    #[serde(default)]
    pub network: NetworkConfig,

    /// Transfer retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Progress emission rate limiting
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Phase-weighted progress split
    #[serde(default)]
    pub phase_weights: PhaseWeights,

    /// External tool configuration
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.phase_weights.validate()?;

        if self.network.user_agent.trim().is_empty() {
            return Err(Error::Config {
                message: "user_agent must not be empty (upstream rejects bare clients)"
                    .to_string(),
                key: Some("network.user_agent".to_string()),
            });
        }
        if self.progress.emit_every_bytes == 0 {
            return Err(Error::Config {
                message: "emit_every_bytes must be positive".to_string(),
                key: Some("progress.emit_every_bytes".to_string()),
            });
        }
        Ok(())
    }
}

// --- Default value functions ---

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_teardown_linger() -> Duration {
    Duration::from_millis(500)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_referer() -> String {
    "https://www.bilibili.com".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_emit_every_bytes() -> u64 {
    100 * 1024
}

fn default_resolve_end() -> f64 {
    0.10
}

fn default_primary_end() -> f64 {
    0.55
}

fn default_secondary_end() -> f64 {
    0.90
}

fn default_merge_end() -> f64 {
    0.98
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
