//! Bounded video frame buffer
//!
//! Thread-safe queue between the decode worker and the render tick. The
//! producer side applies the configured overflow policy; the consumer side
//! never blocks. Closing the buffer wakes a blocked producer.

use crate::renderer::VideoFrame;
use crate::utils::config::OverflowPolicy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

/// Bounded FIFO of decoded frames awaiting display
pub struct FrameBuffer {
    inner: Mutex<Inner>,

    /// Signalled when a slot frees or the buffer closes
    space: Condvar,

    capacity: usize,

    policy: OverflowPolicy,
}

struct Inner {
    frames: VecDeque<VideoFrame>,
    closed: bool,
    last_pts: Option<f64>,
    stats: QueueStats,
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    /// Total frames added
    pub frames_added: u64,

    /// Frames evicted to admit newer ones
    pub frames_evicted: u64,

    /// Total frames consumed
    pub frames_consumed: u64,

    /// Maximum queue depth reached
    pub max_depth: usize,

    /// Times the producer waited for space
    pub producer_waits: u64,
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued without loss
    Queued,

    /// Frame queued after evicting the oldest one
    Evicted,

    /// Buffer closed; the frame was discarded
    Closed,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                last_pts: None,
                stats: QueueStats::default(),
            }),
            space: Condvar::new(),
            capacity,
            policy,
        }
    }

    /// Push a frame, applying the overflow policy when full
    ///
    /// May block the caller under `Block` and `BlockThenDropOldest`; returns
    /// `Closed` as soon as the buffer is closed.
    pub fn push(&self, frame: VideoFrame) -> PushOutcome {
        let mut inner = self.inner.lock();
        let deadline = self.policy.wait_limit().map(|limit| Instant::now() + limit);

        loop {
            if inner.closed {
                return PushOutcome::Closed;
            }

            if inner.frames.len() < self.capacity {
                inner.enqueue(frame);
                return PushOutcome::Queued;
            }

            match deadline {
                None => {
                    inner.stats.producer_waits += 1;
                    self.space.wait(&mut inner);
                }
                Some(deadline) if Instant::now() < deadline => {
                    inner.stats.producer_waits += 1;
                    // Spurious wakeups and timeouts both re-check the loop conditions
                    let _ = self.space.wait_until(&mut inner, deadline);
                }
                Some(_) => {
                    if let Some(old) = inner.frames.pop_front() {
                        log::debug!("Frame buffer full, evicting frame at {:.3}s", old.pts);
                        inner.stats.frames_evicted += 1;
                    }
                    inner.enqueue(frame);
                    return PushOutcome::Evicted;
                }
            }
        }
    }

    /// Pop the next frame without blocking
    pub fn try_pop(&self) -> Option<VideoFrame> {
        let mut inner = self.inner.lock();
        let frame = inner.frames.pop_front();
        if frame.is_some() {
            inner.stats.frames_consumed += 1;
            drop(inner);
            self.space.notify_one();
        }
        frame
    }

    /// Timestamp of the next frame, if any
    pub fn peek_pts(&self) -> Option<f64> {
        self.inner.lock().frames.front().map(|f| f.pts)
    }

    /// Close the buffer and wake any blocked producer
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.space.notify_all();
    }

    /// Empty the buffer and accept frames again
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.closed = false;
        inner.last_pts = None;
    }

    /// Drop all buffered frames
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.last_pts = None;
        drop(inner);
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats.clone()
    }
}

impl Inner {
    fn enqueue(&mut self, frame: VideoFrame) {
        if let Some(last_pts) = self.last_pts {
            if frame.pts < last_pts {
                log::warn!(
                    "Frame PTS {:.3} is less than last PTS {:.3}, possible ordering issue",
                    frame.pts,
                    last_pts
                );
            }
        }
        self.last_pts = Some(frame.pts);
        self.frames.push_back(frame);
        self.stats.frames_added += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.frames.len());
    }
}
