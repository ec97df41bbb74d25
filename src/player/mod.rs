//! Player controller module for SyncPlayer
//!
//! This module orchestrates playback: it owns the decode worker lifecycle,
//! seek coordination and the Stopped/Playing/Paused state machine, and
//! publishes state for the UI layer to read once per render tick.

pub mod controller;
pub mod state;
pub mod worker;

pub use controller::PlaybackController;
pub use state::{CancellationToken, PlaybackStateData, SharedPlaybackState};
pub use worker::{DecodeWorker, WorkerEvent};

use crate::renderer::Rotation;
use serde::Serialize;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing playing; media may or may not be loaded
    Stopped,

    /// Decode worker running, frames being presented
    Playing,

    /// Worker stopped, last frame held
    Paused,

    /// Positioning the decoder; transient inside `seek`
    Seeking,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Stopped
    }
}

/// Player event for external event handling
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Media opened and first frame shown
    MediaLoaded {
        duration: f64,
        frame_rate: f64,
        frame_width: u32,
        frame_height: u32,
        rotation: Rotation,
        has_audio: bool,
    },

    /// Playback started or resumed
    PlaybackStarted { position: f64 },

    /// Playback paused
    PlaybackPaused { position: f64 },

    /// Playback stopped and media released
    PlaybackStopped,

    /// Seek completed
    Seeked { target: f64, position: f64 },

    /// Decoder reached the end while playing
    EndOfMedia,

    /// Audio output could not be used; playing video only
    AudioDisabled { reason: String },

    /// Decoding kept failing and the session was ended
    PlaybackFailed { message: String },
}

/// Player event handler trait
pub trait PlayerEventHandler: Send {
    /// Handle player event
    ///
    /// # Arguments
    ///
    /// * `event` - Player event
    fn handle_event(&mut self, event: PlayerEvent);
}

impl<F> PlayerEventHandler for F
where
    F: FnMut(PlayerEvent) + Send,
{
    fn handle_event(&mut self, event: PlayerEvent) {
        self(event)
    }
}

/// Playback statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlaybackStats {
    /// Frames promoted to current and uploaded
    pub frames_presented: u64,

    /// Render ticks that held a ready frame back
    pub held_ticks: u64,

    /// Video frames evicted from the frame buffer
    pub video_frames_evicted: u64,

    /// Audio blocks evicted from the ring buffer
    pub audio_blocks_evicted: u64,

    /// Device callbacks padded with silence
    pub audio_underruns: u64,

    /// Single-frame decode errors skipped by the worker
    pub decode_errors_recovered: u64,

    /// Times playback looped back to the start
    pub loops: u64,
}

/// Read-only view of the player for the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub rotation: i32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_rate: f64,
    pub audio_active: bool,
    pub stats: PlaybackStats,
}
