//! Playback controller implementation for SyncPlayer
//!
//! This module provides the `PlaybackController` that orchestrates the
//! decode worker, the frame and audio buffers, the audio sink and the
//! presentation clock. All commands and the render tick run on the caller's
//! thread; only the decode worker and the audio callback run elsewhere.

use super::state::{CancellationToken, SharedPlaybackState};
use super::worker::{AudioPath, DecodeWorker, WorkerContext, WorkerCounters, WorkerEvent};
use super::{PlaybackSnapshot, PlaybackState, PlaybackStats, PlayerEvent, PlayerEventHandler};
use crate::audio::{
    AudioCallback, AudioConverter, AudioFormat, AudioRingBuffer, AudioSink, AudioStreamHandle, CallbackStats,
};
use crate::decoder::{AudioFrame, DecodedFrame, FrameBuffer, MediaHandle, MediaOpener, StreamMetadata};
use crate::renderer::{normalize, DisplaySink, PresentationClock, VideoFrame};
use crate::utils::config::{Config, EndOfStreamAction};
use crate::utils::error::{Result, SyncPlayerError};

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Main playback controller
pub struct PlaybackController {
    // Collaborators
    opener: Arc<dyn MediaOpener>,
    display: Box<dyn DisplaySink>,
    audio_sink: Box<dyn AudioSink>,
    config: Config,

    // Published state
    state: Arc<SharedPlaybackState>,

    // Media
    path: Option<PathBuf>,
    source: Option<MediaHandle>,
    metadata: Option<StreamMetadata>,

    // Buffers shared with the worker and the audio callback
    frames: Arc<FrameBuffer>,
    ring: Arc<AudioRingBuffer>,
    callback_stats: Arc<CallbackStats>,
    worker_counters: Arc<WorkerCounters>,

    // Session
    worker: Option<DecodeWorker>,
    cancel: CancellationToken,
    worker_events: Option<Receiver<WorkerEvent>>,
    audio_stream: Option<Box<dyn AudioStreamHandle>>,
    audio_disabled: bool,
    end_of_stream: bool,

    // Presentation
    clock: PresentationClock,
    current: Option<VideoFrame>,

    /// Position the decoder must be moved to before the next session starts
    resume_from: Option<f64>,

    /// Audio decoded while positioning, handed to the next session
    lead_audio: Vec<AudioFrame>,

    // Statistics carried over from buffers replaced after a detached worker
    retired_video_evicted: u64,
    retired_audio_evicted: u64,
    loops: u64,

    // Event handlers
    event_handlers: Vec<Box<dyn PlayerEventHandler>>,
}

impl PlaybackController {
    /// Create a new playback controller
    ///
    /// # Arguments
    ///
    /// * `opener` - Opens media sources for `load` and re-opens
    /// * `display` - Receives every promoted frame
    /// * `audio_sink` - Output device for the audio stream
    /// * `config` - Engine configuration
    pub fn new(
        opener: Arc<dyn MediaOpener>,
        display: Box<dyn DisplaySink>,
        audio_sink: Box<dyn AudioSink>,
        config: Config,
    ) -> Self {
        let frames = Arc::new(Self::frame_buffer(&config));
        let ring = Arc::new(Self::ring_buffer(&config));
        let clock = PresentationClock::new(config.playback.default_frame_rate);

        Self {
            opener,
            display,
            audio_sink,
            config,
            state: Arc::new(SharedPlaybackState::new()),
            path: None,
            source: None,
            metadata: None,
            frames,
            ring,
            callback_stats: Arc::new(CallbackStats::default()),
            worker_counters: Arc::new(WorkerCounters::default()),
            worker: None,
            cancel: CancellationToken::new(),
            worker_events: None,
            audio_stream: None,
            audio_disabled: false,
            end_of_stream: false,
            clock,
            current: None,
            resume_from: None,
            lead_audio: Vec::new(),
            retired_video_evicted: 0,
            retired_audio_evicted: 0,
            loops: 0,
            event_handlers: Vec::new(),
        }
    }

    fn frame_buffer(config: &Config) -> FrameBuffer {
        FrameBuffer::new(config.playback.frame_buffer_depth, config.playback.video_overflow)
    }

    fn ring_buffer(config: &Config) -> AudioRingBuffer {
        AudioRingBuffer::new(config.audio.ring_capacity, config.audio.overflow)
    }

    /// Add an event handler
    pub fn add_event_handler(&mut self, handler: Box<dyn PlayerEventHandler>) {
        self.event_handlers.push(handler);
    }

    /// Send event to all handlers
    fn send_event(&mut self, event: PlayerEvent) {
        for handler in &mut self.event_handlers {
            handler.handle_event(event.clone());
        }
    }

    /// State shared with readers on other threads
    pub fn shared_state(&self) -> Arc<SharedPlaybackState> {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> PlaybackState {
        self.state.state()
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn current_time(&self) -> f64 {
        self.state.current_time()
    }

    pub fn duration(&self) -> f64 {
        self.state.duration()
    }

    /// Metadata of the loaded media
    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    /// Frame currently on display
    pub fn current_frame(&self) -> Option<&VideoFrame> {
        self.current.as_ref()
    }

    /// Whether an audio stream is open for the current session
    pub fn audio_active(&self) -> bool {
        self.audio_stream.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open media, show its first frame and leave the controller stopped
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<StreamMetadata> {
        let path = path.as_ref();
        info!("Loading media: {}", path.display());

        self.release();
        self.path = None;
        self.metadata = None;
        self.current = None;
        self.state.set_state(PlaybackState::Stopped);

        let mut source = self.opener.open(path)?;
        let metadata = source.metadata().clone();
        let frame_rate = metadata.frame_rate_or(self.config.playback.default_frame_rate);

        self.clock = PresentationClock::new(frame_rate);
        self.state.set_media(metadata.duration, metadata.rotation);
        self.path = Some(path.to_path_buf());
        self.metadata = Some(metadata.clone());
        self.audio_disabled = false;
        self.loops = 0;

        let mut lead = Vec::new();
        let first = next_video(&mut source, self.config.playback.max_consecutive_decode_errors, &mut lead)?
            .ok_or_else(|| SyncPlayerError::Open(format!("{} has no video frames", path.display())))?;
        self.present(normalize(first, metadata.rotation))?;
        self.source = Some(source);
        self.lead_audio = lead;

        info!(
            "Loaded {}: {:.3}s, {:.3} fps, {}x{}, rotation {}, audio {}",
            path.display(),
            metadata.duration,
            frame_rate,
            metadata.frame_width(),
            metadata.frame_height(),
            metadata.rotation,
            if metadata.has_audio() { "yes" } else { "no" }
        );

        self.send_event(PlayerEvent::MediaLoaded {
            duration: metadata.duration,
            frame_rate,
            frame_width: metadata.frame_width(),
            frame_height: metadata.frame_height(),
            rotation: metadata.rotation,
            has_audio: metadata.has_audio(),
        });

        Ok(metadata)
    }

    /// Start or resume playback
    pub fn play(&mut self) -> Result<()> {
        if self.state.state() == PlaybackState::Playing {
            return Ok(());
        }

        let metadata = self
            .metadata
            .clone()
            .ok_or_else(|| SyncPlayerError::InvalidState("play() with no media loaded".to_string()))?;
        let max_errors = self.config.playback.max_consecutive_decode_errors;

        let mut source = self.take_source()?;
        self.frames.reopen();
        self.ring.clear();

        if let Some(position) = self.resume_from.take() {
            // Pause drained the buffers; continue after the frame on display
            let threshold = position + self.clock.frame_interval().as_secs_f64() / 2.0;
            let mut lead = Vec::new();
            let resumed = source
                .seek(position)
                .and_then(|_| next_video_from(&mut source, threshold, max_errors, &mut lead));
            self.lead_audio = audio_from(lead, position);

            match resumed {
                Ok(Some(frame)) => {
                    self.frames.push(normalize(frame, metadata.rotation));
                }
                Ok(None) => debug!("Resume position {:.3}s is at end of stream", position),
                Err(e) => {
                    self.source = Some(source);
                    self.resume_from = Some(position);
                    return Err(e);
                }
            }
        }

        self.cancel = CancellationToken::new();
        let (events_tx, events_rx) = unbounded();

        let audio = match metadata.audio {
            Some(format) if self.config.audio.enabled && !self.audio_disabled => self.open_audio(format),
            _ => None,
        };

        let context = WorkerContext {
            source,
            frames: Arc::clone(&self.frames),
            audio,
            rotation: metadata.rotation,
            cancel: self.cancel.clone(),
            events: events_tx,
            counters: Arc::clone(&self.worker_counters),
            max_consecutive_errors: max_errors,
            error_window: self.config.playback.decode_error_window(),
            lead_audio: std::mem::take(&mut self.lead_audio),
        };

        let worker = match DecodeWorker::spawn(context) {
            Ok(worker) => worker,
            Err(e) => {
                self.close_audio();
                return Err(e);
            }
        };
        self.worker = Some(worker);
        self.worker_events = Some(events_rx);
        self.end_of_stream = false;

        if let Some(stream) = self.audio_stream.as_mut() {
            if let Err(e) = stream.start() {
                warn!("Failed to start audio stream: {}", e);
                self.close_audio();
                self.disable_audio(e.to_string());
            }
        }

        self.clock.reset(Instant::now());
        self.state.set_state(PlaybackState::Playing);

        let position = self.state.current_time();
        info!("Playback started at {:.3}s", position);
        self.send_event(PlayerEvent::PlaybackStarted { position });

        Ok(())
    }

    /// Pause playback, holding the current frame
    pub fn pause(&mut self) -> Result<()> {
        if self.state.state() != PlaybackState::Playing {
            return Ok(());
        }

        self.halt_session();
        let position = self.state.current_time();
        self.resume_from = Some(position);
        self.state.set_state(PlaybackState::Paused);

        info!("Playback paused at {:.3}s", position);
        self.send_event(PlayerEvent::PlaybackPaused { position });
        Ok(())
    }

    /// Toggle between playing and paused
    pub fn toggle_play(&mut self) -> Result<()> {
        if self.state.state() == PlaybackState::Playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Seek to `timestamp` seconds and leave playback paused there
    ///
    /// The target is clamped to `[0, duration]`. Targets within
    /// `end_seek_epsilon` of the end decode to end of stream and show the last
    /// frame. On failure `current_time` is left unchanged.
    pub fn seek(&mut self, timestamp: f64) -> Result<()> {
        let metadata = self
            .metadata
            .clone()
            .ok_or_else(|| SyncPlayerError::InvalidState("seek() with no media loaded".to_string()))?;

        if !timestamp.is_finite() {
            return Err(SyncPlayerError::Seek(format!("invalid seek target {}", timestamp)));
        }

        let previous = self.state.current_time();
        if self.state.state() == PlaybackState::Playing {
            self.halt_session();
            self.send_event(PlayerEvent::PlaybackPaused { position: previous });
        }

        let target = timestamp.clamp(0.0, metadata.duration.max(0.0));
        if target != timestamp {
            debug!("Seek target {:.3}s clamped to {:.3}s", timestamp, target);
        }

        self.state.set_state(PlaybackState::Seeking);
        debug!("Seeking to {:.3}s", target);

        let outcome = self
            .position_at(target, &metadata)
            .and_then(|(frame, position, lead)| {
                self.present(normalize(frame, metadata.rotation))
                    .map(|_| (position, lead))
            });

        match outcome {
            Ok((position, lead)) => {
                self.state.set_current_time(position);
                self.lead_audio = lead;
                self.resume_from = None;
                self.end_of_stream = false;
                self.state.set_state(PlaybackState::Paused);

                info!("Seeked to {:.3}s (requested {:.3}s)", position, timestamp);
                self.send_event(PlayerEvent::Seeked { target, position });
                Ok(())
            }
            Err(e) => {
                warn!("Seek to {:.3}s failed, staying at {:.3}s: {}", target, previous, e);
                self.state.set_current_time(previous);
                self.resume_from = Some(previous);
                self.state.set_state(PlaybackState::Paused);

                Err(match e {
                    SyncPlayerError::Seek(msg) => SyncPlayerError::Seek(msg),
                    other => SyncPlayerError::Seek(format!("seek to {:.3}s: {}", target, other)),
                })
            }
        }
    }

    /// Seek relative to the current position
    pub fn seek_relative(&mut self, delta: f64) -> Result<()> {
        let target = self.state.current_time() + delta;
        self.seek(target)
    }

    /// Stop playback and release the media handle and buffers
    pub fn stop(&mut self) -> Result<()> {
        if self.metadata.is_none() {
            return Ok(());
        }

        self.release();
        self.current = None;
        self.state.set_current_time(0.0);
        self.state.set_state(PlaybackState::Stopped);

        info!("Playback stopped");
        self.send_event(PlayerEvent::PlaybackStopped);
        Ok(())
    }

    /// Render tick at the current wall-clock time
    pub fn tick(&mut self) -> Result<bool> {
        self.tick_at(Instant::now())
    }

    /// Render tick at `now`
    ///
    /// Handles worker notifications and promotes at most one buffered frame.
    /// Returns whether a frame was promoted.
    pub fn tick_at(&mut self, now: Instant) -> Result<bool> {
        self.handle_worker_events()?;

        if self.state.state() != PlaybackState::Playing {
            return Ok(false);
        }

        let mut promoted = false;
        if !self.frames.is_empty() {
            if self.current.is_none() || self.clock.should_promote(now) {
                if let Some(frame) = self.frames.try_pop() {
                    log::trace!("Promoting frame at {:.3}s", frame.pts);
                    self.present(frame)?;
                    self.clock.record_promotion(now);
                    promoted = true;
                }
            } else {
                self.clock.record_hold();
            }
        } else if self.end_of_stream && self.clock.should_promote(now) {
            // Last frame has had its interval on screen
            self.handle_end_of_media()?;
        }

        Ok(promoted)
    }

    /// Read-only view for the UI layer
    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.state.snapshot();
        let (frame_width, frame_height) = self
            .metadata
            .as_ref()
            .map_or((0, 0), |m| (m.frame_width(), m.frame_height()));

        PlaybackSnapshot {
            state: state.state,
            is_playing: state.is_playing,
            current_time: state.current_time,
            duration: state.duration,
            rotation: state.rotation.degrees(),
            frame_width,
            frame_height,
            frame_rate: self.clock.frame_rate(),
            audio_active: self.audio_active(),
            stats: self.stats(),
        }
    }

    /// Get playback statistics
    pub fn stats(&self) -> PlaybackStats {
        let presentation = self.clock.stats(Instant::now());

        PlaybackStats {
            frames_presented: presentation.frames_presented,
            held_ticks: presentation.held_ticks,
            video_frames_evicted: self.retired_video_evicted + self.frames.stats().frames_evicted,
            audio_blocks_evicted: self.retired_audio_evicted + self.ring.evicted(),
            audio_underruns: self.callback_stats.underruns(),
            decode_errors_recovered: self.worker_counters.decode_errors(),
            loops: self.loops,
        }
    }

    /// Upload a normalized frame and make it current
    fn present(&mut self, frame: VideoFrame) -> Result<()> {
        self.display.upload(&frame.pixels, frame.width, frame.height)?;
        self.state.set_current_time(frame.pts);
        self.current = Some(frame);
        Ok(())
    }

    /// Source for the next session, re-opening the media if it was released
    fn take_source(&mut self) -> Result<MediaHandle> {
        if let Some(source) = self.source.take() {
            return Ok(source);
        }

        let path = self
            .path
            .clone()
            .ok_or_else(|| SyncPlayerError::InvalidState("no media path to re-open".to_string()))?;
        debug!("Re-opening {}", path.display());
        self.opener.open(&path)
    }

    /// Decode the frame to show for `target`, returning it with the position to publish
    ///
    /// Also returns the audio decoded past the landing frame.
    fn position_at(&mut self, target: f64, metadata: &StreamMetadata) -> Result<(VideoFrame, f64, Vec<AudioFrame>)> {
        let max_errors = self.config.playback.max_consecutive_decode_errors;
        let epsilon = self.config.playback.end_seek_epsilon;
        let mut source = self.take_source()?;

        // A seek to the start always decodes forward, even on clips shorter than epsilon
        let result = if target > 0.0 && target >= metadata.duration - epsilon {
            // Tail path: precise seeks near the end are unreliable
            let start = (metadata.duration - self.config.playback.end_seek_preroll).max(0.0);
            source
                .seek(start)
                .and_then(|_| last_video(&mut source, max_errors))
                .and_then(|frame| {
                    frame
                        .map(|f| (f, metadata.duration, Vec::new()))
                        .ok_or_else(|| SyncPlayerError::Seek(format!("no frames after {:.3}s", start)))
                })
        } else {
            let threshold = target - metadata.time_base;
            source.seek(target).and_then(|_| {
                let mut last = None;
                let mut lead = Vec::new();
                loop {
                    match next_video(&mut source, max_errors, &mut lead)? {
                        Some(frame) if frame.pts >= threshold => {
                            let pts = frame.pts;
                            return Ok((frame, pts, audio_from(lead, pts)));
                        }
                        Some(frame) => last = Some(frame),
                        None => {
                            return last
                                .map(|f| {
                                    let pts = f.pts;
                                    (f, pts, Vec::new())
                                })
                                .ok_or_else(|| SyncPlayerError::Seek(format!("no frames at {:.3}s", target)));
                        }
                    }
                }
            })
        };

        self.source = Some(source);
        result
    }

    /// Open the audio sink for `format`, or disable audio for the session
    fn open_audio(&mut self, format: AudioFormat) -> Option<AudioPath> {
        let callback = AudioCallback::new(Arc::clone(&self.ring), Arc::clone(&self.callback_stats));

        match self
            .audio_sink
            .open(format, self.config.audio.block_size, callback.into_callback())
        {
            Ok(stream) => {
                let negotiated = stream.format();
                if negotiated != format {
                    info!(
                        "Audio converted from {} ch @ {} Hz to {} ch @ {} Hz",
                        format.channels, format.sample_rate, negotiated.channels, negotiated.sample_rate
                    );
                }
                self.audio_stream = Some(stream);
                Some(AudioPath {
                    ring: Arc::clone(&self.ring),
                    converter: AudioConverter::new(negotiated, self.config.audio.block_size),
                })
            }
            Err(e) => {
                warn!("Audio output unavailable, playing video only: {}", e);
                self.disable_audio(e.to_string());
                None
            }
        }
    }

    fn disable_audio(&mut self, reason: String) {
        self.audio_disabled = true;
        self.send_event(PlayerEvent::AudioDisabled { reason });
    }

    fn close_audio(&mut self) {
        if let Some(mut stream) = self.audio_stream.take() {
            if let Err(e) = stream.stop() {
                warn!("Failed to stop audio stream: {}", e);
            }
            if let Err(e) = stream.close() {
                warn!("Failed to close audio stream: {}", e);
            }
        }
    }

    /// Cancel and join the worker, close audio and empty the buffers
    fn halt_session(&mut self) {
        self.cancel.cancel();
        self.frames.close();

        if let Some(worker) = self.worker.take() {
            match worker.stop(self.config.playback.worker_join_timeout()) {
                Some(source) => self.source = Some(source),
                None => {
                    // The detached worker keeps its buffers; give the next session fresh ones
                    self.source = None;
                    self.retired_video_evicted += self.frames.stats().frames_evicted;
                    self.retired_audio_evicted += self.ring.evicted();
                    self.frames = Arc::new(Self::frame_buffer(&self.config));
                    self.ring = Arc::new(Self::ring_buffer(&self.config));
                }
            }
        }

        self.close_audio();
        self.frames.reopen();
        let dropped = self.ring.clear();
        if dropped > 0 {
            debug!("Dropped {} queued audio blocks", dropped);
        }

        self.worker_events = None;
        self.end_of_stream = false;
    }

    /// Tear down the session and release the media handle
    fn release(&mut self) {
        self.halt_session();
        self.source = None;
        self.resume_from = None;
        self.lead_audio.clear();
    }

    fn handle_worker_events(&mut self) -> Result<()> {
        let mut failure = None;

        if let Some(events) = self.worker_events.as_ref() {
            loop {
                match events.try_recv() {
                    Ok(WorkerEvent::EndOfStream) => {
                        debug!("Worker reported end of stream");
                        self.end_of_stream = true;
                    }
                    Ok(WorkerEvent::Failed(message)) => {
                        failure = Some(message);
                        break;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }

        match failure {
            Some(message) => self.fail_session(message),
            None => Ok(()),
        }
    }

    /// End the session after repeated decode failures
    fn fail_session(&mut self, message: String) -> Result<()> {
        error!("Playback failed: {}", message);

        self.release();
        self.state.set_state(PlaybackState::Stopped);
        self.send_event(PlayerEvent::PlaybackFailed {
            message: message.clone(),
        });

        Err(SyncPlayerError::PlaybackFailed(message))
    }

    fn handle_end_of_media(&mut self) -> Result<()> {
        info!("End of media at {:.3}s", self.state.current_time());
        self.send_event(PlayerEvent::EndOfMedia);

        match self.config.playback.end_of_stream {
            EndOfStreamAction::Loop => {
                self.seek(0.0)?;
                self.loops += 1;
                self.play()
            }
            EndOfStreamAction::Pause => self.pause(),
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.halt_session();
    }
}

/// Next video frame, skipping audio and tolerating isolated decode errors
fn next_video(source: &mut MediaHandle, max_errors: u32, audio: &mut Vec<AudioFrame>) -> Result<Option<VideoFrame>> {
    let mut errors = 0;

    loop {
        match source.decode_next() {
            Ok(Some(DecodedFrame::Video(frame))) => return Ok(Some(frame)),
            Ok(Some(DecodedFrame::Audio(frame))) => audio.push(frame),
            Ok(None) => return Ok(None),
            Err(e) => {
                errors += 1;
                warn!("Decode error while positioning ({} in a row): {}", errors, e);
                if errors >= max_errors {
                    return Err(e);
                }
            }
        }
    }
}

/// First video frame at or after `threshold`
fn next_video_from(
    source: &mut MediaHandle,
    threshold: f64,
    max_errors: u32,
    audio: &mut Vec<AudioFrame>,
) -> Result<Option<VideoFrame>> {
    while let Some(frame) = next_video(source, max_errors, audio)? {
        if frame.pts >= threshold {
            return Ok(Some(frame));
        }
    }
    Ok(None)
}

/// Decode to end of stream, keeping the last video frame
fn last_video(source: &mut MediaHandle, max_errors: u32) -> Result<Option<VideoFrame>> {
    let mut last = None;
    let mut audio = Vec::new();
    while let Some(frame) = next_video(source, max_errors, &mut audio)? {
        last = Some(frame);
        audio.clear();
    }
    Ok(last)
}

/// Audio packets still sounding at or after `start`
fn audio_from(mut audio: Vec<AudioFrame>, start: f64) -> Vec<AudioFrame> {
    audio.retain(|frame| frame.pts + frame.duration() > start);
    audio
}
