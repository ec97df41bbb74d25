//! FFmpeg-backed media source
//!
//! Decodes the best video stream to packed RGB24 and the best audio stream
//! to interleaved f32 using the ffmpeg-next crate. Seeking reopens the
//! input and seeks to the keyframe at or before the target, since backward
//! seeks on an open demuxer are unreliable for many containers.

use super::{AudioFrame, DecodedFrame, MediaHandle, MediaOpener, MediaSource, SampleBuffer, StreamMetadata};
use crate::audio::AudioFormat;
use crate::renderer::{Rotation, VideoFrame, BYTES_PER_PIXEL};
use crate::utils::error::{IntoPlayerError, Result, SyncPlayerError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media, software};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Container timestamps (duration, seek targets) are in microseconds
const AV_TIME_BASE: f64 = 1_000_000.0;

/// Opens files with FFmpeg
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegOpener;

impl MediaOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<MediaHandle> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }
}

/// FFmpeg media source
pub struct FfmpegSource {
    path: PathBuf,
    input: format::context::Input,
    video: VideoDecoder,
    audio: Option<AudioDecoder>,
    metadata: StreamMetadata,

    /// Frames already received from the decoders but not yet returned
    pending: VecDeque<DecodedFrame>,

    /// Demuxer exhausted and decoders flushed
    eof: bool,
}

/// Video decoder state
struct VideoDecoder {
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: f64,
    scaler: Option<software::scaling::Context>,
}

/// Audio decoder state
struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
    time_base: f64,
    resampler: Option<software::resampling::Context>,
}

struct OpenedInput {
    input: format::context::Input,
    video: VideoDecoder,
    audio: Option<AudioDecoder>,
    metadata: StreamMetadata,
}

impl FfmpegSource {
    /// Open a media file
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().open_err("Initializing FFmpeg")?;
        ffmpeg::log::set_level(ffmpeg::log::Level::Warning);

        let opened = open_input(path)?;
        log::info!(
            "Opened {}: {}x{} rotation {} at {:?} fps, {:.3}s, audio {:?}",
            path.display(),
            opened.metadata.original_width,
            opened.metadata.original_height,
            opened.metadata.rotation,
            opened.metadata.frame_rate,
            opened.metadata.duration,
            opened.metadata.audio
        );

        Ok(Self {
            path: path.to_path_buf(),
            input: opened.input,
            video: opened.video,
            audio: opened.audio,
            metadata: opened.metadata,
            pending: VecDeque::new(),
            eof: false,
        })
    }

    fn receive_video(&mut self) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.video.decoder.receive_frame(&mut decoded).is_ok() {
            let frame = self.video.convert(&decoded)?;
            self.pending.push_back(DecodedFrame::Video(frame));
        }
        Ok(())
    }

    fn receive_audio(&mut self) -> Result<()> {
        if let Some(audio) = self.audio.as_mut() {
            let mut decoded = ffmpeg::frame::Audio::empty();
            while audio.decoder.receive_frame(&mut decoded).is_ok() {
                let frame = audio.convert(&decoded)?;
                self.pending.push_back(DecodedFrame::Audio(frame));
            }
        }
        Ok(())
    }

    fn flush_decoders(&mut self) -> Result<()> {
        self.video.decoder.send_eof().decoder_err("Flushing video decoder")?;
        self.receive_video()?;

        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.send_eof().decoder_err("Flushing audio decoder")?;
        }
        self.receive_audio()
    }
}

impl MediaSource for FfmpegSource {
    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(None);
            }

            // Release the stream borrow before touching the decoders
            let next = self.input.packets().next().map(|(stream, packet)| (stream.index(), packet));

            match next {
                Some((index, packet)) if index == self.video.stream_index => {
                    self.video
                        .decoder
                        .send_packet(&packet)
                        .decoder_err("Sending video packet")?;
                    self.receive_video()?;
                }
                Some((index, packet)) => {
                    if let Some(audio) = self.audio.as_mut().filter(|a| a.stream_index == index) {
                        audio.decoder.send_packet(&packet).decoder_err("Sending audio packet")?;
                        self.receive_audio()?;
                    }
                }
                None => {
                    self.eof = true;
                    self.flush_decoders()?;
                }
            }
        }
    }

    fn seek(&mut self, timestamp: f64) -> Result<()> {
        if !timestamp.is_finite() {
            return Err(SyncPlayerError::Seek(format!("invalid seek target {}", timestamp)));
        }

        let mut opened = open_input(&self.path)
            .map_err(|e| SyncPlayerError::Seek(format!("reopening {}: {}", self.path.display(), e)))?;

        if timestamp > 0.0 {
            let target = (timestamp * AV_TIME_BASE) as i64;
            opened
                .input
                .seek(target, ..target)
                .map_err(|e| SyncPlayerError::Seek(format!("seeking to {:.3}s: {}", timestamp, e)))?;
        }

        self.input = opened.input;
        self.video = opened.video;
        self.audio = opened.audio;
        self.pending.clear();
        self.eof = false;

        log::debug!("Reopened {} at {:.3}s", self.path.display(), timestamp);
        Ok(())
    }
}

fn open_input(path: &Path) -> Result<OpenedInput> {
    let input = format::input(&path).open_err(&format!("Opening {}", path.display()))?;

    let (video, width, height, frame_rate, rotation, stream_duration) = {
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| SyncPlayerError::Open(format!("{}: no video stream", path.display())))?;

        let time_base = f64::from(stream.time_base());
        let frame_rate = rational_rate(stream.avg_frame_rate()).or_else(|| rational_rate(stream.rate()));
        let rotation = stream_rotation(&stream);
        let stream_duration = if stream.duration() > 0 {
            Some(stream.duration() as f64 * time_base)
        } else {
            None
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .open_err("Reading video codec parameters")?;
        let decoder = context.decoder().video().open_err("Opening video decoder")?;
        let (width, height) = (decoder.width(), decoder.height());

        (
            VideoDecoder {
                decoder,
                stream_index: stream.index(),
                time_base,
                scaler: None,
            },
            width,
            height,
            frame_rate,
            rotation,
            stream_duration,
        )
    };

    let audio = match input.streams().best(media::Type::Audio) {
        Some(stream) => {
            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .open_err("Reading audio codec parameters")?;
            match context.decoder().audio() {
                Ok(decoder) => Some(AudioDecoder {
                    decoder,
                    stream_index: stream.index(),
                    time_base: f64::from(stream.time_base()),
                    resampler: None,
                }),
                Err(e) => {
                    log::warn!("{}: audio stream not decodable ({}), playing video only", path.display(), e);
                    None
                }
            }
        }
        None => None,
    };

    let duration = if input.duration() > 0 {
        input.duration() as f64 / AV_TIME_BASE
    } else {
        stream_duration.unwrap_or(0.0)
    };

    let metadata = StreamMetadata {
        original_width: width,
        original_height: height,
        frame_rate,
        rotation,
        duration,
        time_base: video.time_base,
        audio: audio
            .as_ref()
            .map(|a| AudioFormat::new(a.decoder.channels() as u16, a.decoder.rate())),
    };

    Ok(OpenedInput {
        input,
        video,
        audio,
        metadata,
    })
}

/// Rotation from the display matrix, falling back to the legacy `rotate` tag
fn stream_rotation(stream: &format::stream::Stream) -> Rotation {
    let matrix = stream
        .side_data()
        .find(|side| side.kind() == ffmpeg::codec::packet::side_data::Type::DisplayMatrix)
        .and_then(|side| Rotation::from_display_matrix(side.data()));
    if let Some(rotation) = matrix {
        return rotation;
    }

    // The tag counts clockwise degrees
    stream
        .metadata()
        .get("rotate")
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|degrees| Rotation::from_hint(-degrees))
        .unwrap_or(Rotation::NONE)
}

fn rational_rate(rate: ffmpeg::Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(f64::from(rate))
    } else {
        None
    }
}

impl VideoDecoder {
    /// Convert a decoded frame to packed RGB24
    fn convert(&mut self, frame: &ffmpeg::frame::Video) -> Result<VideoFrame> {
        let pts = frame.timestamp().or(frame.pts()).unwrap_or(0) as f64 * self.time_base;
        let (width, height) = (frame.width(), frame.height());

        let stale = self.scaler.as_ref().map_or(true, |s| {
            s.input().width != width || s.input().height != height || s.input().format != frame.format()
        });
        if stale {
            self.scaler = Some(
                software::scaling::Context::get(
                    frame.format(),
                    width,
                    height,
                    format::Pixel::RGB24,
                    width,
                    height,
                    software::scaling::Flags::BILINEAR,
                )
                .decoder_err("Creating RGB converter")?,
            );
        }

        let mut rgb = ffmpeg::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgb).decoder_err("Converting frame to RGB")?;
        }

        // Strip row padding
        let row = width as usize * BYTES_PER_PIXEL;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            pixels.extend_from_slice(&data[start..start + row]);
        }

        VideoFrame::new(pixels, width, height, pts)
    }
}

impl AudioDecoder {
    /// Convert a decoded frame to interleaved f32 at its native rate and layout
    fn convert(&mut self, frame: &ffmpeg::frame::Audio) -> Result<AudioFrame> {
        let pts = frame.timestamp().or(frame.pts()).unwrap_or(0) as f64 * self.time_base;
        let target = format::Sample::F32(format::sample::Type::Packed);

        let stale = self.resampler.as_ref().map_or(true, |r| {
            r.input().format != frame.format()
                || r.input().rate != frame.rate()
                || r.input().channel_layout != frame.channel_layout()
        });
        if stale {
            self.resampler = Some(
                software::resampling::Context::get(
                    frame.format(),
                    frame.channel_layout(),
                    frame.rate(),
                    target,
                    frame.channel_layout(),
                    frame.rate(),
                )
                .decoder_err("Creating sample converter")?,
            );
        }

        let mut converted = ffmpeg::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut converted).decoder_err("Converting samples")?;
        }

        let channels = frame.channel_layout().channels().max(1) as usize;
        let bytes = converted.samples() * channels * std::mem::size_of::<f32>();
        let data = &converted.data(0)[..bytes];
        let samples = data
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(AudioFrame {
            samples: SampleBuffer::F32(samples),
            channels: channels as u16,
            sample_rate: frame.rate(),
            pts,
        })
    }
}
