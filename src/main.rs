use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use syncplayer::audio::AudioSink;
use syncplayer::decoder::{MediaOpener, TestPatternConfig, TestPatternOpener};
use syncplayer::player::{PlaybackController, PlayerEvent, PlayerEventHandler};
use syncplayer::renderer::{HeadlessDisplay, Rotation};
use syncplayer::utils::{format_timestamp, Config};

/// Render tick rate of the front end
const TICK_HZ: u64 = 60;

/// SyncPlayer - headless A/V sync engine driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file to play
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Play a generated test pattern instead of a file
    #[arg(long)]
    test_pattern: bool,

    /// Test pattern duration in seconds
    #[arg(long, value_name = "SECONDS", default_value = "10")]
    duration: f64,

    /// Test pattern frame rate
    #[arg(long, value_name = "FPS", default_value = "30")]
    fps: f64,

    /// Test pattern rotation in degrees (0, ±90, ±180, ±270)
    #[arg(long, value_name = "DEGREES", default_value = "0", allow_hyphen_values = true)]
    rotation: i32,

    /// Seek here before starting playback
    #[arg(long, value_name = "SECONDS")]
    seek: Option<f64>,

    /// Exit after this many seconds of playback
    #[arg(long, value_name = "SECONDS")]
    run_for: Option<f64>,

    /// Disable audio output
    #[arg(long)]
    no_audio: bool,

    /// Configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print the final playback snapshot as JSON
    #[arg(long)]
    json_status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Loading configuration")?;
    if args.no_audio {
        config.audio.enabled = false;
    }

    // Initialize logging
    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting SyncPlayer v{}", env!("CARGO_PKG_VERSION"));

    let (opener, path) = media_opener(&args)?;

    let mut controller = PlaybackController::new(opener, Box::new(HeadlessDisplay::new()), audio_sink(), config);
    controller.add_event_handler(Box::new(LoggingEventHandler));

    controller
        .load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if let Some(target) = args.seek {
        if let Err(e) = controller.seek(target) {
            warn!("Initial seek to {:.3}s failed: {}", target, e);
        }
    }
    controller.play()?;

    let run_for = args.run_for.map(Duration::from_secs_f64);
    let started = Instant::now();
    let mut last_status = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_micros(1_000_000 / TICK_HZ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = controller.tick() {
                    error!("Playback ended: {}", e);
                    break;
                }

                if last_status.elapsed() >= Duration::from_secs(1) {
                    last_status = Instant::now();
                    let snapshot = controller.snapshot();
                    info!(
                        "{:?} {} / {} | presented {} held {} | underruns {} | evicted v{} a{}",
                        snapshot.state,
                        format_timestamp(snapshot.current_time),
                        format_timestamp(snapshot.duration),
                        snapshot.stats.frames_presented,
                        snapshot.stats.held_ticks,
                        snapshot.stats.audio_underruns,
                        snapshot.stats.video_frames_evicted,
                        snapshot.stats.audio_blocks_evicted,
                    );
                }

                if run_for.map_or(false, |limit| started.elapsed() >= limit) {
                    break;
                }
            }
        }
    }

    let snapshot = controller.snapshot();
    controller.stop()?;

    if args.json_status {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}

/// Pick the media opener and the path to load
fn media_opener(args: &Args) -> Result<(Arc<dyn MediaOpener>, PathBuf)> {
    if args.test_pattern {
        let rotation = Rotation::from_degrees(args.rotation)
            .ok_or_else(|| anyhow::anyhow!("Unsupported rotation {}", args.rotation))?;
        let config = TestPatternConfig {
            duration: args.duration,
            frame_rate: args.fps,
            rotation,
            ..Default::default()
        };
        return Ok((Arc::new(TestPatternOpener::new(config)), PathBuf::from("test-pattern")));
    }

    let path = args
        .file
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No media file given (use --test-pattern for a synthetic stream)"))?;

    if !path.exists() {
        error!("File not found: {:?}", path);
        return Err(anyhow::anyhow!("File not found: {}", path.display()));
    }

    file_opener().map(|opener| (opener, path))
}

#[cfg(feature = "ffmpeg")]
fn file_opener() -> Result<Arc<dyn MediaOpener>> {
    Ok(Arc::new(syncplayer::decoder::FfmpegOpener))
}

#[cfg(not(feature = "ffmpeg"))]
fn file_opener() -> Result<Arc<dyn MediaOpener>> {
    Err(anyhow::anyhow!(
        "Built without the `ffmpeg` feature; only --test-pattern is available"
    ))
}

#[cfg(feature = "cpal-output")]
fn audio_sink() -> Box<dyn AudioSink> {
    Box::new(syncplayer::audio::CpalAudioSink::new())
}

#[cfg(not(feature = "cpal-output"))]
fn audio_sink() -> Box<dyn AudioSink> {
    Box::new(syncplayer::audio::NullAudioSink::new())
}

/// Event handler that logs events
struct LoggingEventHandler;

impl PlayerEventHandler for LoggingEventHandler {
    fn handle_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::MediaLoaded {
                duration,
                frame_rate,
                frame_width,
                frame_height,
                rotation,
                has_audio,
            } => info!(
                "Media loaded: {}x{} @ {:.2} fps, {}, rotation {}, audio {}",
                frame_width,
                frame_height,
                frame_rate,
                format_timestamp(duration),
                rotation,
                has_audio
            ),
            PlayerEvent::AudioDisabled { reason } => warn!("Audio disabled: {}", reason),
            PlayerEvent::PlaybackFailed { message } => error!("Playback failed: {}", message),
            PlayerEvent::EndOfMedia => info!("End of media reached"),
            other => log::debug!("Player event: {:?}", other),
        }
    }
}
