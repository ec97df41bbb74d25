//! Decode worker
//!
//! One background thread per playback session. It pulls frames from the
//! media source, normalizes video orientation, converts audio to the device
//! format, and pushes both into their bounded buffers until cancelled, the
//! source ends, or decoding keeps failing. The source is handed back on join
//! so the controller can reposition it.

use super::state::CancellationToken;
use crate::audio::{AudioConverter, AudioRingBuffer};
use crate::decoder::{AudioFrame, DecodedFrame, FrameBuffer, MediaHandle, PushOutcome};
use crate::renderer::{normalize, Rotation};
use crate::utils::error::{IntoPlayerError, Result};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Notifications from the worker to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The source is exhausted; everything decoded has been queued
    EndOfStream,

    /// Decoding failed repeatedly; the session cannot continue
    Failed(String),
}

/// Counters the worker updates while running
#[derive(Debug, Default)]
pub struct WorkerCounters {
    decode_errors: AtomicU64,
    video_frames: AtomicU64,
    audio_blocks: AtomicU64,
}

impl WorkerCounters {
    /// Single-frame decode errors that were skipped
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Relaxed)
    }

    pub fn audio_blocks(&self) -> u64 {
        self.audio_blocks.load(Ordering::Relaxed)
    }
}

/// Audio half of a session: where converted blocks go
pub struct AudioPath {
    pub ring: Arc<AudioRingBuffer>,
    pub converter: AudioConverter,
}

/// Everything a worker needs for one session
pub struct WorkerContext {
    pub source: MediaHandle,
    pub frames: Arc<FrameBuffer>,
    pub audio: Option<AudioPath>,
    pub rotation: Rotation,
    pub cancel: CancellationToken,
    pub events: Sender<WorkerEvent>,
    pub counters: Arc<WorkerCounters>,

    /// Consecutive decode errors tolerated before failing
    pub max_consecutive_errors: u32,

    /// Time spent erroring without a good frame before failing
    pub error_window: Duration,

    /// Audio decoded while the controller positioned the source, played first
    pub lead_audio: Vec<AudioFrame>,
}

/// Handle to a running decode worker
pub struct DecodeWorker {
    handle: thread::JoinHandle<MediaHandle>,
    cancel: CancellationToken,
    frames: Arc<FrameBuffer>,
}

impl DecodeWorker {
    /// Start the worker thread
    pub fn spawn(context: WorkerContext) -> Result<Self> {
        let cancel = context.cancel.clone();
        let frames = Arc::clone(&context.frames);

        let handle = thread::Builder::new()
            .name("decode-worker".to_string())
            .spawn(move || run(context))
            .decoder_err("Spawning decode worker")?;

        Ok(Self { handle, cancel, frames })
    }

    /// Signal the worker to stop and wake it if it is blocked on a full buffer
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.frames.close();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait up to `timeout` for the worker to exit
    ///
    /// Returns the media source, or `None` if the worker did not exit in
    /// time (it is left detached) or panicked.
    pub fn stop(self, timeout: Duration) -> Option<MediaHandle> {
        self.cancel();

        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                log::error!("Decode worker did not exit within {:?}; detaching it", timeout);
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }

        match self.handle.join() {
            Ok(source) => Some(source),
            Err(_) => {
                log::error!("Decode worker panicked");
                None
            }
        }
    }
}

/// Worker loop
fn run(mut context: WorkerContext) -> MediaHandle {
    let mut consecutive_errors = 0u32;
    let mut failing_since: Option<Instant> = None;

    log::debug!("Decode worker started");

    let lead = std::mem::take(&mut context.lead_audio);
    if let Some(audio) = context.audio.as_mut() {
        'lead: for frame in &lead {
            for block in audio.converter.convert(frame) {
                if audio.ring.push(block, &context.cancel) == PushOutcome::Closed {
                    break 'lead;
                }
                context.counters.audio_blocks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    'decode: loop {
        if context.cancel.is_cancelled() {
            break;
        }

        match context.source.decode_next() {
            Ok(Some(DecodedFrame::Video(frame))) => {
                consecutive_errors = 0;
                failing_since = None;

                log::trace!("Decoded video frame at {:.3}s", frame.pts);
                let frame = normalize(frame, context.rotation);
                match context.frames.push(frame) {
                    PushOutcome::Closed => break,
                    PushOutcome::Queued | PushOutcome::Evicted => {
                        context.counters.video_frames.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Ok(Some(DecodedFrame::Audio(frame))) => {
                consecutive_errors = 0;
                failing_since = None;

                if let Some(audio) = context.audio.as_mut() {
                    for block in audio.converter.convert(&frame) {
                        if audio.ring.push(block, &context.cancel) == PushOutcome::Closed {
                            break 'decode;
                        }
                        context.counters.audio_blocks.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Ok(None) => {
                if let Some(audio) = context.audio.as_mut() {
                    for block in audio.converter.flush() {
                        if audio.ring.push(block, &context.cancel) == PushOutcome::Closed {
                            break;
                        }
                    }
                }
                log::debug!("Decode worker reached end of stream");
                let _ = context.events.send(WorkerEvent::EndOfStream);
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                let since = *failing_since.get_or_insert_with(Instant::now);
                context.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("Skipping frame after decode error ({} in a row): {}", consecutive_errors, e);

                if consecutive_errors >= context.max_consecutive_errors || since.elapsed() >= context.error_window {
                    let message = format!(
                        "{} consecutive decode errors over {:.1}s, last: {}",
                        consecutive_errors,
                        since.elapsed().as_secs_f64(),
                        e
                    );
                    log::error!("Ending playback session: {}", message);
                    let _ = context.events.send(WorkerEvent::Failed(message));
                    break;
                }
            }
        }
    }

    log::debug!("Decode worker exiting");
    context.source
}
