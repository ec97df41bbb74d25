//! Audio output module for SyncPlayer
//!
//! The audio side of the engine: the device boundary (`AudioSink`), the
//! block ring buffer between decode worker and device callback, the
//! callback itself, and sample conversion to the device's negotiated format.

pub mod convert;
pub mod driver;
pub mod ring_buffer;

#[cfg(feature = "cpal-output")]
pub mod cpal_output;

pub use convert::{AudioConverter, BlockAssembler};
pub use driver::{AudioCallback, CallbackStats};
pub use ring_buffer::AudioRingBuffer;

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalAudioSink;

use crate::utils::error::{IntoPlayerError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Callback the device invokes with an interleaved output block
pub type AudioCallbackFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Audio sink trait: the output device side of the engine
pub trait AudioSink {
    /// Open an output stream
    ///
    /// The sink may negotiate a different format than requested; the
    /// returned handle reports the one actually in use.
    ///
    /// # Arguments
    ///
    /// * `requested` - Channel count and sample rate of the media
    /// * `block_size` - Frames per callback the engine would like
    /// * `callback` - Invoked on the device thread to fill each output block
    fn open(
        &mut self,
        requested: AudioFormat,
        block_size: usize,
        callback: AudioCallbackFn,
    ) -> Result<Box<dyn AudioStreamHandle>>;
}

/// An open output stream
pub trait AudioStreamHandle {
    /// Negotiated format
    fn format(&self) -> AudioFormat;

    /// Start pulling blocks
    fn start(&mut self) -> Result<()>;

    /// Stop pulling blocks
    fn stop(&mut self) -> Result<()>;

    /// Release the device
    fn close(self: Box<Self>) -> Result<()>;
}

/// Channel count and sample rate of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Number of channels
    pub channels: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self { channels, sample_rate }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
        }
    }
}

/// Interleaved f32 samples in the device format
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioBlock {
    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Block length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Audio sink without a device
///
/// Pulls blocks on its own thread at the real-time cadence of the requested
/// format and discards them, so the ring buffer drains as it would on hardware.
#[derive(Debug, Default)]
pub struct NullAudioSink;

impl NullAudioSink {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSink for NullAudioSink {
    fn open(
        &mut self,
        requested: AudioFormat,
        block_size: usize,
        callback: AudioCallbackFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        log::debug!(
            "Opening null audio output: {} ch @ {} Hz, {} frames per block",
            requested.channels,
            requested.sample_rate,
            block_size
        );
        Ok(Box::new(NullStream {
            format: requested,
            block_size: block_size.max(1),
            callback: Arc::new(Mutex::new(callback)),
            running: Arc::new(AtomicBool::new(false)),
            pump: None,
        }))
    }
}

struct NullStream {
    format: AudioFormat,
    block_size: usize,
    callback: Arc<Mutex<AudioCallbackFn>>,
    running: Arc<AtomicBool>,
    pump: Option<thread::JoinHandle<()>>,
}

impl AudioStreamHandle for NullStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        if self.pump.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let callback = Arc::clone(&self.callback);
        let len = self.block_size * self.format.channels.max(1) as usize;
        let period = Duration::from_secs_f64(self.block_size as f64 / self.format.sample_rate.max(1) as f64);

        let handle = thread::Builder::new()
            .name("null-audio".to_string())
            .spawn(move || {
                let mut block = vec![0.0f32; len];
                while running.load(Ordering::SeqCst) {
                    {
                        let mut fill = callback.lock();
                        (*fill)(&mut block);
                    }
                    thread::sleep(period);
                }
            })
            .audio_err("Spawning null audio thread")?;
        self.pump = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.take() {
            if handle.join().is_err() {
                log::warn!("Null audio pump thread panicked");
            }
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.stop()
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
    }
}
