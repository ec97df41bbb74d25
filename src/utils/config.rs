//! Configuration management for SyncPlayer
//!
//! This module handles loading and managing engine configuration
//! from config files and environment variables.

use crate::utils::error::{IntoPlayerError, Result, SyncPlayerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted frame buffer depth
const MAX_FRAME_BUFFER_DEPTH: usize = 16;

/// Largest accepted audio ring capacity in blocks
const MAX_AUDIO_RING_CAPACITY: usize = 1024;

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decode worker, frame buffer and presentation settings
    pub playback: PlaybackConfig,

    /// Audio ring buffer and output settings
    pub audio: AudioConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// What a full bounded buffer does with a new item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer waits for space (or cancellation)
    Block,

    /// Oldest queued item is evicted to admit the new one
    DropOldest,

    /// Producer waits up to `timeout_ms`, then evicts the oldest item
    BlockThenDropOldest { timeout_ms: u64 },
}

impl OverflowPolicy {
    /// How long a producer may wait before evicting, `None` meaning forever
    pub fn wait_limit(&self) -> Option<Duration> {
        match self {
            OverflowPolicy::Block => None,
            OverflowPolicy::DropOldest => Some(Duration::ZERO),
            OverflowPolicy::BlockThenDropOldest { timeout_ms } => {
                Some(Duration::from_millis(*timeout_ms))
            }
        }
    }
}

/// Behaviour when the decoder reaches the end of media while playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfStreamAction {
    /// Seek to zero and keep playing
    Loop,

    /// Pause on the last frame
    Pause,
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Decoded frames held ahead of the display
    pub frame_buffer_depth: usize,

    /// Overflow policy for the frame buffer
    pub video_overflow: OverflowPolicy,

    /// Frame rate used when the stream does not declare one
    pub default_frame_rate: f64,

    /// End-of-stream behaviour
    pub end_of_stream: EndOfStreamAction,

    /// Seeks within this many seconds of the end take the tail path
    pub end_seek_epsilon: f64,

    /// How far before the end the tail path starts decoding
    pub end_seek_preroll: f64,

    /// Consecutive decode errors tolerated before the session fails
    pub max_consecutive_decode_errors: u32,

    /// Time without a good frame, while erroring, before the session fails
    pub decode_error_window_ms: u64,

    /// How long pause/seek wait for the decode worker to exit
    pub worker_join_timeout_ms: u64,
}

/// Audio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Play audio when the media has an audio stream
    pub enabled: bool,

    /// Ring buffer capacity in blocks
    pub ring_capacity: usize,

    /// Frames per block handed to the device
    pub block_size: usize,

    /// Overflow policy for the ring buffer
    pub overflow: OverflowPolicy,
}

/// General application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_buffer_depth: 3,
            video_overflow: OverflowPolicy::Block,
            default_frame_rate: 30.0,
            end_of_stream: EndOfStreamAction::Loop,
            end_seek_epsilon: 0.1,
            end_seek_preroll: 1.0,
            max_consecutive_decode_errors: 16,
            decode_error_window_ms: 2000,
            worker_join_timeout_ms: 2000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ring_capacity: 32,
            block_size: 1024,
            overflow: OverflowPolicy::BlockThenDropOldest { timeout_ms: 1000 },
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PlaybackConfig {
    pub fn decode_error_window(&self) -> Duration {
        Duration::from_millis(self.decode_error_window_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/syncplayer/config.toml on Linux)
    /// 3. User config file (~/.config/syncplayer/config.toml on Linux)
    /// 4. `explicit`, when given
    /// 5. Environment variables (SYNCPLAYER_* prefix)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::from_file(&user_path)?;
            }
        }

        if let Some(path) = explicit {
            config = Self::from_file(path)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .config_err(&format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents)
            .config_err(&format!("Failed to parse config file {}", path.display()))
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::user_config_path()
            .ok_or_else(|| SyncPlayerError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to an arbitrary path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;
        std::fs::write(path, toml).config_err("Failed to write config file")?;

        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(depth) = std::env::var("SYNCPLAYER_FRAME_BUFFER_DEPTH") {
            self.playback.frame_buffer_depth = depth
                .parse()
                .map_err(|_| SyncPlayerError::Config("Invalid SYNCPLAYER_FRAME_BUFFER_DEPTH".to_string()))?;
        }

        if let Ok(capacity) = std::env::var("SYNCPLAYER_AUDIO_RING_CAPACITY") {
            self.audio.ring_capacity = capacity
                .parse()
                .map_err(|_| SyncPlayerError::Config("Invalid SYNCPLAYER_AUDIO_RING_CAPACITY".to_string()))?;
        }

        if let Ok(enabled) = std::env::var("SYNCPLAYER_AUDIO_ENABLED") {
            self.audio.enabled = enabled
                .parse()
                .map_err(|_| SyncPlayerError::Config("Invalid SYNCPLAYER_AUDIO_ENABLED".to_string()))?;
        }

        if let Ok(log_level) = std::env::var("SYNCPLAYER_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let playback = &self.playback;
        if playback.frame_buffer_depth == 0 || playback.frame_buffer_depth > MAX_FRAME_BUFFER_DEPTH {
            return Err(SyncPlayerError::Config(format!(
                "frame_buffer_depth must be between 1 and {}",
                MAX_FRAME_BUFFER_DEPTH
            )));
        }

        if !(playback.default_frame_rate.is_finite() && playback.default_frame_rate > 0.0) {
            return Err(SyncPlayerError::Config("default_frame_rate must be positive".to_string()));
        }

        if playback.end_seek_epsilon < 0.0 || playback.end_seek_preroll < 0.0 {
            return Err(SyncPlayerError::Config(
                "end_seek_epsilon and end_seek_preroll must not be negative".to_string(),
            ));
        }

        if playback.max_consecutive_decode_errors == 0 {
            return Err(SyncPlayerError::Config(
                "max_consecutive_decode_errors must be at least 1".to_string(),
            ));
        }

        if self.audio.ring_capacity == 0 || self.audio.ring_capacity > MAX_AUDIO_RING_CAPACITY {
            return Err(SyncPlayerError::Config(format!(
                "audio ring_capacity must be between 1 and {}",
                MAX_AUDIO_RING_CAPACITY
            )));
        }

        if self.audio.block_size == 0 {
            return Err(SyncPlayerError::Config("audio block_size must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(SyncPlayerError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/syncplayer/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("SyncPlayer").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/SyncPlayer/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("syncplayer").join("config.toml"))
    }
}
