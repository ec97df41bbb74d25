//! Integration test utilities for SyncPlayer
//!
//! This module provides the test doubles the end-to-end tests drive the
//! controller with:
//! - A display sink that records every upload
//! - Audio sinks that are pumped by hand or refuse to open
//! - Media sources that inject decode and seek failures, stall, or
//!   interleave audio ahead of video

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use syncplayer::audio::{AudioCallbackFn, AudioFormat, AudioSink, AudioStreamHandle};
use syncplayer::decoder::{
    DecodedFrame, MediaHandle, MediaOpener, MediaSource, StreamMetadata, TestPatternConfig, TestPatternOpener,
    TestPatternSource,
};
use syncplayer::player::{PlaybackController, PlayerEvent};
use syncplayer::renderer::{DisplaySink, TextureHandle};
use syncplayer::utils::{Config, OverflowPolicy, Result, SyncPlayerError};

/// One frame handed to the display
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub width: u32,
    pub height: u32,

    /// First pixel, which the test pattern uses to store the frame index
    pub first_pixel: [u8; 3],
}

impl Upload {
    /// Frame index of an unrotated test-pattern frame
    pub fn pattern_index(&self) -> u64 {
        let [r, g, b] = self.first_pixel;
        r as u64 | (g as u64) << 8 | (b as u64) << 16
    }
}

/// Display sink that records uploads
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    uploads: Arc<Mutex<Vec<Upload>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().clone()
    }

    pub fn last(&self) -> Option<Upload> {
        self.uploads.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Make every upload fail while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl DisplaySink for RecordingDisplay {
    fn upload(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<TextureHandle> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncPlayerError::Internal("display surface lost".to_string()));
        }
        if pixels.len() != width as usize * height as usize * 3 {
            return Err(SyncPlayerError::InvalidInput(format!(
                "{} bytes uploaded for a {}x{} frame",
                pixels.len(),
                width,
                height
            )));
        }

        let mut uploads = self.uploads.lock();
        uploads.push(Upload {
            width,
            height,
            first_pixel: [pixels[0], pixels[1], pixels[2]],
        });
        Ok(TextureHandle(uploads.len() as u64))
    }
}

/// Audio sink whose callback is invoked by the test instead of a device
#[derive(Clone, Default)]
pub struct ManualAudioSink {
    callback: Arc<Mutex<Option<AudioCallbackFn>>>,
    started: Arc<AtomicBool>,
    opened: Arc<AtomicU64>,

    /// Format reported back instead of the requested one
    negotiated: Option<AudioFormat>,
}

impl ManualAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that always opens in `format`
    pub fn negotiating(format: AudioFormat) -> Self {
        Self {
            negotiated: Some(format),
            ..Self::default()
        }
    }

    /// Invoke the callback for `samples` interleaved samples
    ///
    /// Returns `None` when no stream is open.
    pub fn pump(&self, samples: usize) -> Option<Vec<f32>> {
        let mut guard = self.callback.lock();
        let callback = guard.as_mut()?;
        // Garbage that the callback must overwrite
        let mut output = vec![f32::NAN; samples];
        callback(&mut output);
        Some(output)
    }

    pub fn is_open(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Streams opened so far
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl AudioSink for ManualAudioSink {
    fn open(
        &mut self,
        requested: AudioFormat,
        _block_size: usize,
        callback: AudioCallbackFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        *self.callback.lock() = Some(callback);
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ManualStream {
            callback: Arc::clone(&self.callback),
            started: Arc::clone(&self.started),
            format: self.negotiated.unwrap_or(requested),
        }))
    }
}

struct ManualStream {
    callback: Arc<Mutex<Option<AudioCallbackFn>>>,
    started: Arc<AtomicBool>,
    format: AudioFormat,
}

impl AudioStreamHandle for ManualStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        *self.callback.lock() = None;
        Ok(())
    }
}

/// Audio sink with no usable device
#[derive(Debug, Default)]
pub struct FailingAudioSink;

impl AudioSink for FailingAudioSink {
    fn open(
        &mut self,
        _requested: AudioFormat,
        _block_size: usize,
        _callback: AudioCallbackFn,
    ) -> Result<Box<dyn AudioStreamHandle>> {
        Err(SyncPlayerError::AudioDevice("no output device".to_string()))
    }
}

/// Failures a [`FaultySource`] injects
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Every decode after this many successful ones fails
    pub fail_after: Option<u64>,

    /// Every n-th decode fails
    pub fail_every: Option<u64>,

    /// Seeks fail while set
    pub fail_seeks: Arc<AtomicBool>,
}

/// Test-pattern source with injected failures
pub struct FaultySource {
    inner: TestPatternSource,
    plan: FaultPlan,
    decodes: u64,
}

impl MediaSource for FaultySource {
    fn metadata(&self) -> &StreamMetadata {
        self.inner.metadata()
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        self.decodes += 1;

        if self.plan.fail_after.map_or(false, |n| self.decodes > n) {
            return Err(SyncPlayerError::decode_error(format!("corrupt packet #{}", self.decodes)));
        }
        if self.plan.fail_every.map_or(false, |n| self.decodes % n == 0) {
            return Err(SyncPlayerError::decode_error(format!("damaged frame #{}", self.decodes)));
        }

        self.inner.decode_next()
    }

    fn seek(&mut self, timestamp: f64) -> Result<()> {
        if self.plan.fail_seeks.load(Ordering::SeqCst) {
            return Err(SyncPlayerError::Seek(format!("index unreadable at {:.3}s", timestamp)));
        }
        self.inner.seek(timestamp)
    }
}

/// Opener producing [`FaultySource`]s
#[derive(Debug, Clone)]
pub struct FaultyOpener {
    pub config: TestPatternConfig,
    pub plan: FaultPlan,
}

impl MediaOpener for FaultyOpener {
    fn open(&self, _path: &Path) -> Result<MediaHandle> {
        Ok(Box::new(FaultySource {
            inner: TestPatternSource::new(self.config.clone())?,
            plan: self.plan.clone(),
            decodes: 0,
        }))
    }
}

/// Test-pattern source that hangs once in `decode_next`
pub struct StallingSource {
    inner: TestPatternSource,
    stall_after: u64,
    stall_for: Duration,
    armed: Arc<AtomicBool>,
    decodes: u64,
}

impl MediaSource for StallingSource {
    fn metadata(&self) -> &StreamMetadata {
        self.inner.metadata()
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        self.decodes += 1;
        if self.decodes == self.stall_after && self.armed.swap(false, Ordering::SeqCst) {
            std::thread::sleep(self.stall_for);
        }
        self.inner.decode_next()
    }

    fn seek(&mut self, timestamp: f64) -> Result<()> {
        self.inner.seek(timestamp)
    }
}

/// Opener producing [`StallingSource`]s; only the first stall fires
#[derive(Debug, Clone)]
pub struct StallingOpener {
    pub config: TestPatternConfig,

    /// The decode call that hangs
    pub stall_after: u64,
    pub stall_for: Duration,
    pub armed: Arc<AtomicBool>,

    /// Sources opened so far
    pub opens: Arc<AtomicU64>,
}

impl StallingOpener {
    pub fn new(config: TestPatternConfig, stall_after: u64, stall_for: Duration) -> Self {
        Self {
            config,
            stall_after,
            stall_for,
            armed: Arc::new(AtomicBool::new(true)),
            opens: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl MediaOpener for StallingOpener {
    fn open(&self, _path: &Path) -> Result<MediaHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StallingSource {
            inner: TestPatternSource::new(self.config.clone())?,
            stall_after: self.stall_after,
            stall_for: self.stall_for,
            armed: Arc::clone(&self.armed),
            decodes: 0,
        }))
    }
}

/// Test-pattern source whose audio packets run `lead` seconds ahead of video,
/// the way many containers interleave them
pub struct AudioLeadSource {
    inner: TestPatternSource,
    lead: f64,
    held: VecDeque<DecodedFrame>,

    /// Start of the last audio packet returned
    audio_horizon: f64,
    exhausted: bool,
}

impl AudioLeadSource {
    pub fn new(config: TestPatternConfig, lead: f64) -> Result<Self> {
        Ok(Self {
            inner: TestPatternSource::new(config)?,
            lead,
            held: VecDeque::new(),
            audio_horizon: f64::NEG_INFINITY,
            exhausted: false,
        })
    }
}

impl MediaSource for AudioLeadSource {
    fn metadata(&self) -> &StreamMetadata {
        self.inner.metadata()
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            let due = match self.held.front() {
                Some(DecodedFrame::Video(frame)) => self.exhausted || self.audio_horizon >= frame.pts + self.lead,
                Some(DecodedFrame::Audio(_)) => true,
                None => false,
            };
            if due {
                return Ok(self.held.pop_front());
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.inner.decode_next()? {
                Some(DecodedFrame::Audio(frame)) => {
                    self.audio_horizon = frame.pts;
                    return Ok(Some(DecodedFrame::Audio(frame)));
                }
                Some(video) => self.held.push_back(video),
                None => self.exhausted = true,
            }
        }
    }

    fn seek(&mut self, timestamp: f64) -> Result<()> {
        self.inner.seek(timestamp)?;
        self.held.clear();
        self.audio_horizon = f64::NEG_INFINITY;
        self.exhausted = false;
        Ok(())
    }
}

/// Opener producing [`AudioLeadSource`]s
#[derive(Debug, Clone)]
pub struct AudioLeadOpener {
    pub config: TestPatternConfig,
    pub lead: f64,
}

impl MediaOpener for AudioLeadOpener {
    fn open(&self, _path: &Path) -> Result<MediaHandle> {
        Ok(Box::new(AudioLeadSource::new(self.config.clone(), self.lead)?))
    }
}

/// Opener that rejects every path
#[derive(Debug, Default)]
pub struct FailingOpener;

impl MediaOpener for FailingOpener {
    fn open(&self, path: &Path) -> Result<MediaHandle> {
        Err(SyncPlayerError::Open(format!("{}: unsupported container", path.display())))
    }
}

/// Engine configuration for tests: no blocking on a ring nobody drains
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.overflow = OverflowPolicy::DropOldest;
    config.playback.worker_join_timeout_ms = 5000;
    config
}

/// Collected player events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PlayerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register with a controller
    pub fn attach(&self, controller: &mut PlaybackController) {
        let events = Arc::clone(&self.events);
        controller.add_event_handler(Box::new(move |event: PlayerEvent| events.lock().push(event)));
    }

    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    pub fn contains(&self, event: &PlayerEvent) -> bool {
        self.events.lock().contains(event)
    }

    pub fn any(&self, predicate: impl Fn(&PlayerEvent) -> bool) -> bool {
        self.events.lock().iter().any(predicate)
    }
}

/// A controller over the test pattern with a recording display
pub fn pattern_controller(
    config: TestPatternConfig,
    audio: Box<dyn AudioSink>,
    engine: Config,
) -> (PlaybackController, RecordingDisplay) {
    let display = RecordingDisplay::new();
    let controller = PlaybackController::new(
        Arc::new(TestPatternOpener::new(config)),
        Box::new(display.clone()),
        audio,
        engine,
    );
    (controller, display)
}

/// Drives render ticks on a synthetic clock
///
/// Each tick advances by one frame interval, so presentation never waits on
/// the wall clock; a short sleep gives the decode worker time to refill.
pub struct TickDriver {
    start: Instant,
    step: Duration,
    ticks: u32,
}

impl TickDriver {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            start: Instant::now(),
            step: Duration::from_secs_f64(1.0 / frame_rate),
            ticks: 0,
        }
    }

    /// One tick
    pub fn tick(&mut self, controller: &mut PlaybackController) -> Result<bool> {
        self.ticks += 1;
        let now = self.start + self.step * self.ticks;
        let result = controller.tick_at(now);
        std::thread::sleep(Duration::from_millis(1));
        result
    }

    /// Tick until `done` holds; fails after `max_ticks`
    pub fn run_until(
        &mut self,
        controller: &mut PlaybackController,
        max_ticks: u32,
        done: impl Fn(&PlaybackController) -> bool,
    ) -> Result<()> {
        for _ in 0..max_ticks {
            if done(controller) {
                return Ok(());
            }
            self.tick(controller)?;
        }

        if done(controller) {
            Ok(())
        } else {
            Err(SyncPlayerError::Internal(format!("condition not reached in {} ticks", max_ticks)))
        }
    }
}
