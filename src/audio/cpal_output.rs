//! CPAL audio output for SyncPlayer
//!
//! Implements `AudioSink` on the default output device. The stream is
//! opened in the media's format when the device supports it, otherwise in
//! the device's default format; the handle reports what was negotiated.

use super::{AudioCallbackFn, AudioFormat, AudioSink, AudioStreamHandle};
use crate::utils::error::{IntoPlayerError, Result, SyncPlayerError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Host, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

/// Audio sink on the host's default output device
pub struct CpalAudioSink {
    host: Host,
}

impl CpalAudioSink {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// Pick a device configuration, preferring the requested format in f32
    fn choose_config(device: &Device, requested: AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
        let rate = SampleRate(requested.sample_rate);

        if let Ok(configs) = device.supported_output_configs() {
            let mut matching: Vec<_> = configs
                .filter(|c| {
                    c.channels() == requested.channels
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
                .collect();
            matching.sort_by_key(|c| c.sample_format() != SampleFormat::F32);

            if let Some(range) = matching.into_iter().next() {
                let supported = range.with_sample_rate(rate);
                let format = supported.sample_format();
                return Ok((supported.config(), format));
            }
        }

        let fallback = device
            .default_output_config()
            .audio_err("Querying default output config")?;
        log::info!(
            "Device does not support {} ch @ {} Hz, using {} ch @ {} Hz",
            requested.channels,
            requested.sample_rate,
            fallback.channels(),
            fallback.sample_rate().0
        );
        let format = fallback.sample_format();
        Ok((fallback.config(), format))
    }
}

impl Default for CpalAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for CpalAudioSink {
    fn open(
        &mut self,
        requested: AudioFormat,
        block_size: usize,
        callback: AudioCallbackFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| SyncPlayerError::AudioDevice("No default output device found".to_string()))?;

        let (config, sample_format) = Self::choose_config(&device, requested)?;
        let format = AudioFormat::new(config.channels, config.sample_rate.0);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, block_size, callback),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, block_size, callback),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, block_size, callback),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, block_size, callback),
            other => Err(SyncPlayerError::AudioDevice(format!(
                "Unsupported device sample format {:?}",
                other
            ))),
        }?;

        log::info!(
            "Opened audio output {} ({} ch @ {} Hz, {:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            format.channels,
            format.sample_rate,
            sample_format
        );

        Ok(Box::new(CpalStream { stream, format }))
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    block_size: usize,
    mut callback: AudioCallbackFn,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    // Scratch buffer grows to the largest callback size seen, then stays put
    let mut scratch = vec![0.0f32; block_size * config.channels as usize];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let out = &mut scratch[..data.len()];
                callback(out);
                for (dst, src) in data.iter_mut().zip(out.iter()) {
                    *dst = T::from_sample(*src);
                }
            },
            |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .audio_err("Failed to create audio stream")
}

struct CpalStream {
    stream: Stream,
    format: AudioFormat,
}

impl AudioStreamHandle for CpalStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        self.stream.play().audio_err("Failed to start audio stream")
    }

    fn stop(&mut self) -> Result<()> {
        self.stream.pause().audio_err("Failed to pause audio stream")
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.stream);
        Ok(())
    }
}
