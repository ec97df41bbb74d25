//! Synthetic media source
//!
//! Produces RGB test frames and a sine tone at a fixed rate, interleaved by
//! presentation time the way a demuxer would deliver them. Seeking lands on
//! the keyframe at or before the target, like a real container.

use super::{AudioFrame, DecodedFrame, MediaHandle, MediaOpener, MediaSource, SampleBuffer, StreamMetadata};
use crate::audio::AudioFormat;
use crate::renderer::{Rotation, VideoFrame};
use crate::utils::error::{Result, SyncPlayerError};
use std::f64::consts::TAU;
use std::path::Path;

/// Shape of the synthetic stream
#[derive(Debug, Clone, PartialEq)]
pub struct TestPatternConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration: f64,
    pub rotation: Rotation,

    /// Audio format, or `None` for a silent stream
    pub audio: Option<AudioFormat>,

    /// Sample frames per decoded audio packet
    pub audio_packet_frames: usize,

    /// Frames between keyframes
    pub keyframe_interval: u64,

    /// Tone frequency in Hz
    pub tone_hz: f64,
}

impl Default for TestPatternConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 36,
            frame_rate: 30.0,
            duration: 10.0,
            rotation: Rotation::NONE,
            audio: Some(AudioFormat::new(2, 48000)),
            audio_packet_frames: 1024,
            keyframe_interval: 30,
            tone_hz: 440.0,
        }
    }
}

impl TestPatternConfig {
    pub fn total_frames(&self) -> u64 {
        (self.duration * self.frame_rate).round().max(0.0) as u64
    }

    fn total_audio_frames(&self) -> u64 {
        match self.audio {
            Some(format) => (self.duration * format.sample_rate as f64).round().max(0.0) as u64,
            None => 0,
        }
    }
}

/// Deterministic test-pattern media source
pub struct TestPatternSource {
    config: TestPatternConfig,
    metadata: StreamMetadata,

    /// Index of the next video frame
    next_frame: u64,

    /// Index of the next audio sample frame
    next_sample: u64,

    seeks: u64,
}

impl TestPatternSource {
    pub fn new(config: TestPatternConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(SyncPlayerError::Open("test pattern needs a non-empty frame".to_string()));
        }
        if !(config.frame_rate.is_finite() && config.frame_rate > 0.0) {
            return Err(SyncPlayerError::Open(format!(
                "test pattern frame rate {} is not positive",
                config.frame_rate
            )));
        }
        if !(config.duration.is_finite() && config.duration > 0.0) {
            return Err(SyncPlayerError::Open(format!(
                "test pattern duration {} is not positive",
                config.duration
            )));
        }

        let metadata = StreamMetadata {
            original_width: config.width,
            original_height: config.height,
            frame_rate: Some(config.frame_rate),
            rotation: config.rotation,
            duration: config.duration,
            time_base: 1.0 / (config.frame_rate * 1000.0),
            audio: config.audio,
        };

        Ok(Self {
            config,
            metadata,
            next_frame: 0,
            next_sample: 0,
            seeks: 0,
        })
    }

    /// Number of seeks performed on this source
    pub fn seeks(&self) -> u64 {
        self.seeks
    }

    /// Frame index encoded into a pattern frame by [`Self::render_frame`]
    ///
    /// Reads the top-left pixel of an unrotated frame.
    pub fn frame_index_of(frame: &VideoFrame) -> Option<u64> {
        frame
            .pixel(0, 0)
            .map(|[r, g, b]| r as u64 | (g as u64) << 8 | (b as u64) << 16)
    }

    fn video_pts(&self, index: u64) -> f64 {
        index as f64 / self.config.frame_rate
    }

    fn audio_pts(&self, sample: u64) -> Option<f64> {
        self.config.audio.map(|format| sample as f64 / format.sample_rate as f64)
    }

    /// Gradient whose hue moves with the frame index; the first pixel stores the index
    fn render_frame(&self, index: u64) -> Result<VideoFrame> {
        let w = self.config.width;
        let h = self.config.height;
        let shift = (index % 256) as u32;
        let mut pixels = Vec::with_capacity(w as usize * h as usize * 3);

        for y in 0..h {
            for x in 0..w {
                let r = ((x * 255 / w.max(1)) + shift) as u8;
                let g = ((y * 255 / h.max(1)) + shift) as u8;
                let b = (shift * 3) as u8;
                pixels.extend_from_slice(&[r, g, b]);
            }
        }
        pixels[0] = (index & 0xff) as u8;
        pixels[1] = ((index >> 8) & 0xff) as u8;
        pixels[2] = ((index >> 16) & 0xff) as u8;

        VideoFrame::new(pixels, w, h, self.video_pts(index))
    }

    fn render_audio(&self, start: u64, format: AudioFormat) -> AudioFrame {
        let remaining = self.config.total_audio_frames().saturating_sub(start);
        let frames = (self.config.audio_packet_frames as u64).min(remaining) as usize;
        let channels = format.channels as usize;
        let mut samples = Vec::with_capacity(frames * channels);

        for i in 0..frames {
            let t = (start + i as u64) as f64 / format.sample_rate as f64;
            let value = ((TAU * self.config.tone_hz * t).sin() * 0.25 * i16::MAX as f64) as i16;
            for _ in 0..channels {
                samples.push(value);
            }
        }

        AudioFrame {
            samples: SampleBuffer::I16(samples),
            channels: format.channels,
            sample_rate: format.sample_rate,
            pts: start as f64 / format.sample_rate as f64,
        }
    }
}

impl MediaSource for TestPatternSource {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        let video_left = self.next_frame < self.config.total_frames();
        let audio_left = self.next_sample < self.config.total_audio_frames();

        let take_audio = match (video_left, audio_left) {
            (false, false) => return Ok(None),
            (true, false) => false,
            (false, true) => true,
            (true, true) => self
                .audio_pts(self.next_sample)
                .map_or(false, |audio_pts| audio_pts < self.video_pts(self.next_frame)),
        };

        if take_audio {
            if let Some(format) = self.config.audio {
                let frame = self.render_audio(self.next_sample, format);
                self.next_sample += frame.frames().max(1) as u64;
                return Ok(Some(DecodedFrame::Audio(frame)));
            }
        }

        let frame = self.render_frame(self.next_frame)?;
        self.next_frame += 1;
        Ok(Some(DecodedFrame::Video(frame)))
    }

    fn seek(&mut self, timestamp: f64) -> Result<()> {
        if !timestamp.is_finite() {
            return Err(SyncPlayerError::Seek(format!("invalid seek target {}", timestamp)));
        }

        let total = self.config.total_frames();
        let target = ((timestamp.max(0.0) * self.config.frame_rate).floor() as u64).min(total);
        let gop = self.config.keyframe_interval.max(1);
        let keyframe = (target / gop) * gop;

        self.next_frame = keyframe;
        self.next_sample = match self.config.audio {
            Some(format) => (self.video_pts(keyframe) * format.sample_rate as f64).round() as u64,
            None => 0,
        };
        self.seeks += 1;

        log::trace!("Test pattern seek to {:.3}s lands on frame {}", timestamp, keyframe);
        Ok(())
    }
}

/// Opener that yields a test-pattern source for any path
#[derive(Debug, Clone, Default)]
pub struct TestPatternOpener {
    config: TestPatternConfig,
}

impl TestPatternOpener {
    pub fn new(config: TestPatternConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TestPatternConfig {
        &self.config
    }
}

impl MediaOpener for TestPatternOpener {
    fn open(&self, path: &Path) -> Result<MediaHandle> {
        log::debug!("Opening test pattern for {}", path.display());
        Ok(Box::new(TestPatternSource::new(self.config.clone())?))
    }
}
