//! Utility module for SyncPlayer
//!
//! This module provides common utilities used throughout the engine:
//! - Error handling with custom error types
//! - Configuration management
//! - Small formatting helpers

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{AudioConfig, Config, EndOfStreamAction, GeneralConfig, OverflowPolicy, PlaybackConfig};
pub use error::{IntoPlayerError, Result, SyncPlayerError};

/// Format a stream position in seconds for display
///
/// Returns "HH:MM:SS.mmm" for positions of an hour or more, "MM:SS.mmm" otherwise.
/// Negative and non-finite inputs format as zero.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let total_ms = (seconds * 1000.0).round() as u64;
    let millis = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, millis)
    }
}
