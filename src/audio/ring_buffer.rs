//! Audio ring buffer
//!
//! Bounded lock-free FIFO of audio blocks. The device callback pops without
//! ever blocking; the decode worker pushes under the configured overflow
//! policy, evicting the oldest unplayed block when it gives up waiting.

use super::AudioBlock;
use crate::decoder::PushOutcome;
use crate::player::state::CancellationToken;
use crate::utils::config::OverflowPolicy;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How often a blocked producer re-checks for space
const PRODUCER_POLL: Duration = Duration::from_millis(1);

/// Bounded queue of audio blocks
pub struct AudioRingBuffer {
    queue: ArrayQueue<AudioBlock>,
    policy: OverflowPolicy,
    pushed: AtomicU64,
    popped: AtomicU64,
    evicted: AtomicU64,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            policy,
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Push a block, waiting for space as the policy allows
    ///
    /// Returns `Closed` if `cancel` fires while waiting; the block is dropped.
    pub fn push(&self, block: AudioBlock, cancel: &CancellationToken) -> PushOutcome {
        let deadline = self.policy.wait_limit().map(|limit| Instant::now() + limit);
        let mut block = block;

        loop {
            if cancel.is_cancelled() {
                return PushOutcome::Closed;
            }

            match self.queue.push(block) {
                Ok(()) => {
                    self.pushed.fetch_add(1, Ordering::Relaxed);
                    return PushOutcome::Queued;
                }
                Err(rejected) => block = rejected,
            }

            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    self.pushed.fetch_add(1, Ordering::Relaxed);
                    return match self.queue.force_push(block) {
                        Some(_) => {
                            self.evicted.fetch_add(1, Ordering::Relaxed);
                            log::debug!("Audio ring full, evicted oldest block");
                            PushOutcome::Evicted
                        }
                        None => PushOutcome::Queued,
                    };
                }
                _ => {
                    cancel.wait_timeout(PRODUCER_POLL);
                }
            }
        }
    }

    /// Pop the oldest block; never blocks
    pub fn pop(&self) -> Option<AudioBlock> {
        let block = self.queue.pop();
        if block.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        block
    }

    /// Discard every queued block
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }
}
