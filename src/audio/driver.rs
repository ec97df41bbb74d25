//! Audio output callback
//!
//! Runs on the device's real-time thread. Each invocation copies queued
//! blocks into the output buffer and pads whatever is left with silence.
//! It never waits: the only ring operation it performs is a non-blocking pop.

use super::{AudioBlock, AudioCallbackFn, AudioRingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between the callback and the controller
#[derive(Debug, Default)]
pub struct CallbackStats {
    /// Callbacks that could not be filled completely
    underruns: AtomicU64,

    /// Callback invocations
    callbacks: AtomicU64,

    /// Sample frames copied from queued blocks
    frames_played: AtomicU64,
}

impl CallbackStats {
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }
}

/// Pulls blocks from the ring buffer into device output buffers
pub struct AudioCallback {
    ring: Arc<AudioRingBuffer>,

    /// Block being played and how many samples of it are already out
    current: Option<(AudioBlock, usize)>,

    stats: Arc<CallbackStats>,
}

impl AudioCallback {
    pub fn new(ring: Arc<AudioRingBuffer>, stats: Arc<CallbackStats>) -> Self {
        Self {
            ring,
            current: None,
            stats,
        }
    }

    /// Fill one interleaved output buffer
    pub fn fill(&mut self, output: &mut [f32]) {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        let mut written = 0;
        let mut copied = 0usize;
        let mut channels = 1usize;

        while written < output.len() {
            if self.current.is_none() {
                match self.ring.pop() {
                    Some(block) => self.current = Some((block, 0)),
                    None => {
                        output[written..].fill(0.0);
                        self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }

            if let Some((block, offset)) = self.current.as_mut() {
                let available = block.samples.len() - *offset;
                let n = available.min(output.len() - written);
                output[written..written + n].copy_from_slice(&block.samples[*offset..*offset + n]);
                written += n;
                copied += n;
                channels = block.channels.max(1) as usize;
                *offset += n;

                if *offset >= block.samples.len() {
                    self.current = None;
                }
            }
        }

        self.stats
            .frames_played
            .fetch_add((copied / channels) as u64, Ordering::Relaxed);
    }

    /// Box the callback for handing to an audio sink
    pub fn into_callback(mut self) -> AudioCallbackFn {
        Box::new(move |output: &mut [f32]| self.fill(output))
    }
}
