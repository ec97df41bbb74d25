//! Sample conversion for the device format
//!
//! Decoded audio arrives in whatever format the stream uses. The decode
//! worker converts it to interleaved f32, reconciles the channel count,
//! resamples to the device rate and re-chunks it into fixed-size blocks.

use super::{AudioBlock, AudioFormat};
use crate::decoder::{AudioFrame, SampleBuffer};

/// Convert decoded samples to interleaved f32 in [-1.0, 1.0]
pub fn to_interleaved_f32(frame: &AudioFrame) -> Vec<f32> {
    match &frame.samples {
        SampleBuffer::I16(data) => data.iter().map(|s| *s as f32 / 32768.0).collect(),
        SampleBuffer::F32(data) => data.clone(),
        SampleBuffer::F32Planar(planes) => {
            let frames = planes.first().map_or(0, Vec::len);
            let mut out = Vec::with_capacity(frames * planes.len());
            for i in 0..frames {
                for plane in planes {
                    out.push(plane.get(i).copied().unwrap_or(0.0));
                }
            }
            out
        }
    }
}

/// Reconcile channel counts
///
/// Mono is duplicated to every output channel; downmixing to mono averages;
/// otherwise channels are matched by index and extra outputs are silent.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for ch in 0..to {
                out.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }
    out
}

/// Linear interpolation resampling of a complete interleaved buffer
pub fn resample_linear(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let mut resampler = LinearResampler::new(channels, from_rate, to_rate);
    let mut output = resampler.process(samples);
    output.extend(resampler.flush());
    output
}

/// Streaming linear resampler
///
/// Output positions are derived from running frame counts rather than per
/// call, so splitting the input into packets changes neither the output
/// length nor the interpolated values. The last input frame is carried
/// over to interpolate across packet boundaries.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    ratio: f64,

    /// Input frames seen so far
    consumed: u64,

    /// Output frames produced so far
    emitted: u64,

    /// Last input frame, global index `consumed - 1`
    previous: Vec<f32>,
}

impl LinearResampler {
    pub fn new(channels: u16, from_rate: u32, to_rate: u32) -> Self {
        let ratio = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            to_rate as f64 / from_rate as f64
        };
        Self {
            channels: channels.max(1) as usize,
            from_rate,
            to_rate,
            ratio,
            consumed: 0,
            emitted: 0,
            previous: Vec::new(),
        }
    }

    /// Whether this resampler converts `from_rate` to `to_rate`
    pub fn matches(&self, from_rate: u32, to_rate: u32) -> bool {
        self.from_rate == from_rate && self.to_rate == to_rate
    }

    fn passthrough(&self) -> bool {
        self.ratio == 1.0
    }

    /// Resample the next stretch of input
    ///
    /// Output frames whose right-hand neighbour has not arrived yet are held
    /// back until the next call or [`flush`](Self::flush).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let channels = self.channels;
        let frames = samples.len() / channels;
        if self.passthrough() {
            self.consumed += frames as u64;
            self.emitted += frames as u64;
            return samples[..frames * channels].to_vec();
        }
        if frames == 0 {
            return Vec::new();
        }

        // Global index of the first frame in `window`
        let base = self.consumed - (self.previous.len() / channels) as u64;
        let mut window = std::mem::take(&mut self.previous);
        window.extend_from_slice(&samples[..frames * channels]);
        self.consumed += frames as u64;

        let mut output = Vec::with_capacity(((frames as f64 * self.ratio).ceil() as usize + 1) * channels);
        loop {
            let position = self.emitted as f64 / self.ratio;
            let source = position as u64;
            if source + 1 >= self.consumed {
                break;
            }
            let fraction = (position - source as f64).clamp(0.0, 1.0) as f32;
            let local = (source - base) as usize;
            for ch in 0..channels {
                let a = window[local * channels + ch];
                let b = window[(local + 1) * channels + ch];
                output.push(a * (1.0 - fraction) + b * fraction);
            }
            self.emitted += 1;
        }

        self.previous = window.split_off(window.len() - channels);
        output
    }

    /// Emit the frames held back for the final input frame
    ///
    /// Brings the total output to `round(input_frames * ratio)`.
    pub fn flush(&mut self) -> Vec<f32> {
        let channels = self.channels;
        if self.passthrough() || self.previous.len() < channels {
            return Vec::new();
        }

        let total = (self.consumed as f64 * self.ratio).round() as u64;
        let last = self.consumed - 1;
        let mut output = Vec::new();
        while self.emitted < total {
            let position = self.emitted as f64 / self.ratio;
            let fraction = (position - last as f64).clamp(0.0, 1.0) as f32;
            for ch in 0..channels {
                let a = self.previous[ch];
                output.push(a * (1.0 - fraction) + a * fraction);
            }
            self.emitted += 1;
        }

        self.previous.clear();
        output
    }
}

/// Re-chunks a sample stream into fixed-size blocks
#[derive(Debug, Clone)]
pub struct BlockAssembler {
    format: AudioFormat,
    block_frames: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(format: AudioFormat, block_frames: usize) -> Self {
        let block_frames = block_frames.max(1);
        Self {
            format,
            block_frames,
            pending: Vec::with_capacity(block_frames * format.channels.max(1) as usize),
        }
    }

    fn block_len(&self) -> usize {
        self.block_frames * self.format.channels.max(1) as usize
    }

    /// Append samples and return every block completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioBlock> {
        self.pending.extend_from_slice(samples);
        let len = self.block_len();
        let mut blocks = Vec::with_capacity(self.pending.len() / len);

        while self.pending.len() >= len {
            let rest = self.pending.split_off(len);
            let full = std::mem::replace(&mut self.pending, rest);
            blocks.push(self.block(full));
        }
        blocks
    }

    /// Emit whatever is left as a short block
    pub fn flush(&mut self) -> Option<AudioBlock> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        Some(self.block(samples))
    }

    /// Discard buffered samples
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Samples waiting for a full block
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    fn block(&self, samples: Vec<f32>) -> AudioBlock {
        AudioBlock {
            samples,
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
        }
    }
}

/// Full decode-to-device conversion chain
#[derive(Debug, Clone)]
pub struct AudioConverter {
    target: AudioFormat,
    resampler: Option<LinearResampler>,
    assembler: BlockAssembler,
}

impl AudioConverter {
    pub fn new(target: AudioFormat, block_frames: usize) -> Self {
        Self {
            target,
            resampler: None,
            assembler: BlockAssembler::new(target, block_frames),
        }
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Convert a decoded frame into zero or more device blocks
    pub fn convert(&mut self, frame: &AudioFrame) -> Vec<AudioBlock> {
        let interleaved = to_interleaved_f32(frame);
        let remixed = remix(&interleaved, frame.channels, self.target.channels);

        let mut samples = Vec::new();
        let stale = self
            .resampler
            .as_ref()
            .map_or(true, |r| !r.matches(frame.sample_rate, self.target.sample_rate));
        if stale {
            if let Some(mut old) = self.resampler.take() {
                log::debug!("Audio rate changed to {} Hz", frame.sample_rate);
                samples = old.flush();
            }
            self.resampler = Some(LinearResampler::new(
                self.target.channels,
                frame.sample_rate,
                self.target.sample_rate,
            ));
        }
        if let Some(resampler) = self.resampler.as_mut() {
            samples.extend(resampler.process(&remixed));
        }

        self.assembler.push(&samples)
    }

    /// Emit everything still buffered at end of stream, ending with a short block
    pub fn flush(&mut self) -> Vec<AudioBlock> {
        let tail = self.resampler.as_mut().map(LinearResampler::flush).unwrap_or_default();
        let mut blocks = self.assembler.push(&tail);
        blocks.extend(self.assembler.flush());
        blocks
    }
}
