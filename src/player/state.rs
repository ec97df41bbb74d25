//! Shared playback state
//!
//! `SharedPlaybackState` is the only state read across threads. The
//! controller is the only writer of `is_playing` and seek results; the
//! presentation path advances `current_time`. Readers take snapshots.

use super::PlaybackState;
use crate::renderer::Rotation;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Playback state data
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackStateData {
    pub state: PlaybackState,
    pub is_playing: bool,

    /// Presentation time of the current frame in seconds
    pub current_time: f64,

    /// Media duration in seconds
    pub duration: f64,

    pub rotation: Rotation,
}

/// Playback state guarded for cross-thread reads
#[derive(Debug, Default)]
pub struct SharedPlaybackState {
    inner: RwLock<PlaybackStateData>,
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the whole state
    pub fn snapshot(&self) -> PlaybackStateData {
        self.inner.read().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.read().state
    }

    pub fn is_playing(&self) -> bool {
        self.inner.read().is_playing
    }

    pub fn current_time(&self) -> f64 {
        self.inner.read().current_time
    }

    pub fn duration(&self) -> f64 {
        self.inner.read().duration
    }

    pub fn rotation(&self) -> Rotation {
        self.inner.read().rotation
    }

    /// Set the state; `is_playing` follows it
    pub(crate) fn set_state(&self, state: PlaybackState) {
        let mut inner = self.inner.write();
        log::debug!("State {:?} -> {:?}", inner.state, state);
        inner.state = state;
        inner.is_playing = state == PlaybackState::Playing;
    }

    pub(crate) fn set_current_time(&self, time: f64) {
        self.inner.write().current_time = time;
    }

    /// Publish newly loaded media
    pub(crate) fn set_media(&self, duration: f64, rotation: Rotation) {
        let mut inner = self.inner.write();
        inner.duration = duration;
        inner.rotation = rotation;
        inner.current_time = 0.0;
    }
}

/// Cooperative cancellation signal for a playback session
///
/// Cloned into the decode worker; the controller cancels it before joining.
/// Waiters are woken immediately rather than polling a flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep up to `timeout`, returning early on cancellation
    ///
    /// Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        if !*cancelled {
            let _ = self.inner.signal.wait_for(&mut cancelled, timeout);
        }
        *cancelled
    }
}
