//! Frame presentation timing
//!
//! The presentation clock runs on the render tick. It measures wall time
//! since the last promotion against the stream's nominal frame interval, so
//! slow ticks hold the current frame instead of accumulating drift.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frame rate used when the stream declares none
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Wall-clock gate deciding when a buffered frame becomes current
#[derive(Debug, Clone)]
pub struct PresentationClock {
    /// Stream frame rate
    frame_rate: f64,

    /// 1 / frame_rate
    frame_interval: Duration,

    /// Wall clock of the last promotion (or of the play command)
    last_frame_time: Option<Instant>,

    /// Recent promotion instants for rate measurement
    history: VecDeque<Instant>,

    /// Maximum history size
    max_history: usize,

    frames_presented: u64,

    /// Ticks that found a frame ready but still inside the interval
    held_ticks: u64,
}

/// Presentation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PresentationStats {
    pub frames_presented: u64,
    pub held_ticks: u64,
    pub measured_fps: f64,
    pub frame_rate: f64,
}

impl PresentationClock {
    /// Create a clock for a stream rate
    ///
    /// Non-finite or non-positive rates fall back to 30 fps.
    pub fn new(frame_rate: f64) -> Self {
        let frame_rate = sanitize_rate(frame_rate, FALLBACK_FRAME_RATE);

        Self {
            frame_rate,
            frame_interval: Duration::from_secs_f64(1.0 / frame_rate),
            last_frame_time: None,
            history: VecDeque::with_capacity(120),
            max_history: 120,
            frames_presented: 0,
            held_ticks: 0,
        }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn last_frame_time(&self) -> Option<Instant> {
        self.last_frame_time
    }

    /// Change the stream rate (new media loaded)
    pub fn set_frame_rate(&mut self, frame_rate: f64) {
        self.frame_rate = sanitize_rate(frame_rate, FALLBACK_FRAME_RATE);
        self.frame_interval = Duration::from_secs_f64(1.0 / self.frame_rate);
    }

    /// Restart the interval at `now`
    ///
    /// Called when playback starts so the first frame is held for one interval.
    pub fn reset(&mut self, now: Instant) {
        self.last_frame_time = Some(now);
        self.history.clear();
    }

    /// Forget the last promotion; the next ready frame promotes immediately
    pub fn clear(&mut self) {
        self.last_frame_time = None;
        self.history.clear();
    }

    /// Whether a frame may be promoted at `now`
    pub fn should_promote(&self, now: Instant) -> bool {
        match self.last_frame_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.frame_interval,
        }
    }

    /// Record a tick that had a frame ready but could not promote it
    pub fn record_hold(&mut self) {
        self.held_ticks += 1;
    }

    /// Record a promotion at `now`
    pub fn record_promotion(&mut self, now: Instant) {
        self.last_frame_time = Some(now);
        self.frames_presented += 1;

        self.history.push_back(now);
        if self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Promotions in the second leading up to `now`
    pub fn measured_fps(&self, now: Instant) -> f64 {
        let window = Duration::from_secs(1);
        self.history
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < window)
            .count() as f64
    }

    pub fn stats(&self, now: Instant) -> PresentationStats {
        PresentationStats {
            frames_presented: self.frames_presented,
            held_ticks: self.held_ticks,
            measured_fps: self.measured_fps(now),
            frame_rate: self.frame_rate,
        }
    }
}

impl Default for PresentationClock {
    fn default() -> Self {
        Self::new(FALLBACK_FRAME_RATE)
    }
}

/// Use `rate` when it is a usable frame rate, otherwise `fallback`
pub fn sanitize_rate(rate: f64, fallback: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else if fallback.is_finite() && fallback > 0.0 {
        fallback
    } else {
        FALLBACK_FRAME_RATE
    }
}
