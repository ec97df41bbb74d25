//! Decoder module for SyncPlayer
//!
//! The decoder side of the engine is an opaque source of timestamped
//! frames. This module defines that boundary (`MediaOpener` and
//! `MediaSource`), the data types crossing it, and the bounded frame
//! buffer the decode worker feeds.

pub mod frame_queue;
pub mod test_pattern;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_decoder;

pub use frame_queue::{FrameBuffer, PushOutcome, QueueStats};
pub use test_pattern::{TestPatternConfig, TestPatternOpener, TestPatternSource};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_decoder::{FfmpegOpener, FfmpegSource};

use crate::audio::AudioFormat;
use crate::renderer::{frame::sanitize_rate, Rotation, VideoFrame};
use crate::utils::error::Result;
use std::path::Path;
use std::time::Duration;

/// Opens media sources
///
/// Openers are shared between the controller and the worker it hands
/// sources to, so they must be thread safe.
pub trait MediaOpener: Send + Sync {
    /// Open a media file for decoding
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the media file
    ///
    /// # Returns
    ///
    /// Returns an open handle or `SyncPlayerError::Open`
    fn open(&self, path: &Path) -> Result<MediaHandle>;
}

/// Owned, open media source
pub type MediaHandle = Box<dyn MediaSource>;

/// An open media source producing frames in decode order
pub trait MediaSource: Send {
    /// Stream metadata, fixed for the lifetime of the handle
    fn metadata(&self) -> &StreamMetadata;

    /// Decode the next frame
    ///
    /// Returns `Ok(None)` at end of stream. A `Decode` error affects only the
    /// frame being decoded; the next call continues after it.
    fn decode_next(&mut self) -> Result<Option<DecodedFrame>>;

    /// Position the source at or before `timestamp` seconds
    ///
    /// Frames decoded afterwards start at a point at or before the target.
    /// Sources that cannot rewind cheaply reopen their input here.
    fn seek(&mut self, timestamp: f64) -> Result<()>;
}

/// One decoded unit from a media source
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl DecodedFrame {
    /// Presentation timestamp in seconds
    pub fn pts(&self) -> f64 {
        match self {
            DecodedFrame::Video(frame) => frame.pts,
            DecodedFrame::Audio(frame) => frame.pts,
        }
    }
}

/// Decoded audio in the source's native sample format
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: SampleBuffer,
    pub channels: u16,
    pub sample_rate: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        let channels = self.channels.max(1) as usize;
        match &self.samples {
            SampleBuffer::I16(data) => data.len() / channels,
            SampleBuffer::F32(data) => data.len() / channels,
            SampleBuffer::F32Planar(planes) => planes.first().map_or(0, Vec::len),
        }
    }

    /// Playback length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Raw decoded samples
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    /// Interleaved signed 16-bit
    I16(Vec<i16>),

    /// Interleaved 32-bit float
    F32(Vec<f32>),

    /// One 32-bit float plane per channel
    F32Planar(Vec<Vec<f32>>),
}

/// Stream metadata, read-only once the handle is open
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    /// Coded width before rotation
    pub original_width: u32,

    /// Coded height before rotation
    pub original_height: u32,

    /// Declared or guessed frame rate, if the container has one
    pub frame_rate: Option<f64>,

    /// Rotation hint
    pub rotation: Rotation,

    /// Duration in seconds
    pub duration: f64,

    /// Seconds per video timestamp tick
    pub time_base: f64,

    /// Audio stream format, if the media has audio
    pub audio: Option<AudioFormat>,
}

impl StreamMetadata {
    /// Displayed width after rotation
    pub fn frame_width(&self) -> u32 {
        self.rotation.display_size(self.original_width, self.original_height).0
    }

    /// Displayed height after rotation
    pub fn frame_height(&self) -> u32 {
        self.rotation.display_size(self.original_width, self.original_height).1
    }

    /// Frame rate with a fallback for streams that declare none
    pub fn frame_rate_or(&self, fallback: f64) -> f64 {
        sanitize_rate(self.frame_rate.unwrap_or(0.0), fallback)
    }

    /// Nominal frame interval
    pub fn frame_interval(&self, fallback_rate: f64) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_or(fallback_rate))
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}
