//! Integration tests for the SyncPlayer playback engine
//!
//! These tests verify the complete engine including:
//! - Loading, play/pause/seek/stop
//! - End-of-stream looping
//! - Audio output, underruns and device failure
//! - Decode and seek error recovery

use anyhow::Result;
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use syncplayer::audio::{AudioFormat, NullAudioSink};
use syncplayer::decoder::TestPatternConfig;
use syncplayer::player::{PlaybackController, PlaybackState, PlayerEvent};
use syncplayer::renderer::{HeadlessDisplay, Rotation};
use syncplayer::utils::{EndOfStreamAction, OverflowPolicy, SyncPlayerError};
use syncplayer_integration_tests::{
    pattern_controller, test_config, AudioLeadOpener, EventLog, FailingAudioSink, FailingOpener, FaultPlan,
    FaultyOpener, ManualAudioSink, RecordingDisplay, StallingOpener, TickDriver,
};

fn silent_pattern(duration: f64) -> TestPatternConfig {
    TestPatternConfig {
        duration,
        audio: None,
        ..Default::default()
    }
}

#[test]
fn test_load_reports_metadata_and_first_frame() -> Result<()> {
    let (mut player, display) = pattern_controller(
        TestPatternConfig::default(),
        Box::new(NullAudioSink::new()),
        test_config(),
    );
    let events = EventLog::new();
    events.attach(&mut player);

    let metadata = player.load("clip.mp4")?;
    assert!((metadata.duration - 10.0).abs() < 1e-9);
    assert!((metadata.frame_rate_or(30.0) - 30.0).abs() < 1e-9);
    assert!(metadata.has_audio());

    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(display.count(), 1);
    assert_eq!(display.last().map(|u| u.pattern_index()), Some(0));
    assert!(events.any(|e| matches!(e, PlayerEvent::MediaLoaded { frame_width: 64, frame_height: 36, .. })));

    Ok(())
}

#[test]
#[serial]
fn test_first_tick_after_play_shows_time_zero() -> Result<()> {
    let (mut player, display) = pattern_controller(silent_pattern(10.0), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;
    player.play()?;

    let mut driver = TickDriver::new(30.0);
    player.tick_at(Instant::now())?;
    assert_eq!(player.current_time(), 0.0);
    assert_eq!(display.last().map(|u| u.pattern_index()), Some(0));

    driver.run_until(&mut player, 500, |p| p.current_time() > 0.0)?;
    assert!((player.current_time() - 1.0 / 30.0).abs() < 1e-9);

    player.stop()?;
    Ok(())
}

#[test]
fn test_seek_lands_within_one_frame() -> Result<()> {
    let (mut player, _display) = pattern_controller(TestPatternConfig::default(), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;

    let interval = 1.0 / 30.0;
    let mut target = 0.0;
    while target < 9.85 {
        player.seek(target)?;
        let position = player.current_time();
        assert!(
            (position - target).abs() <= interval + 1e-9,
            "seek({}) landed at {}",
            target,
            position
        );
        assert_eq!(player.state(), PlaybackState::Paused);
        target += 0.37;
    }

    player.seek(5.0)?;
    assert!((player.current_time() - 5.0).abs() <= interval);
    Ok(())
}

#[test]
fn test_seek_near_end_takes_tail_path() -> Result<()> {
    let (mut player, display) = pattern_controller(silent_pattern(10.0), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;

    player.seek(9.95)?;
    assert_eq!(player.current_time(), 10.0);
    assert_eq!(display.last().map(|u| u.pattern_index()), Some(299));

    // Out of range targets clamp
    player.seek(1e6)?;
    assert_eq!(player.current_time(), 10.0);
    player.seek(-5.0)?;
    assert_eq!(player.current_time(), 0.0);

    Ok(())
}

#[test]
fn test_rotated_media_reports_portrait_frames() -> Result<()> {
    for degrees in [90, -90, 270, -270] {
        let (mut player, display) = pattern_controller(
            TestPatternConfig {
                width: 1920,
                height: 1080,
                duration: 1.0,
                rotation: Rotation::from_degrees(degrees).unwrap_or_default(),
                audio: None,
                ..Default::default()
            },
            Box::new(NullAudioSink::new()),
            test_config(),
        );

        let metadata = player.load("portrait.mp4")?;
        assert_eq!((metadata.frame_width(), metadata.frame_height()), (1080, 1920), "{}", degrees);

        let upload = display.last().unwrap();
        assert_eq!((upload.width, upload.height), (1080, 1920), "{}", degrees);

        let snapshot = player.snapshot();
        assert_eq!(snapshot.rotation, degrees);
        assert_eq!((snapshot.frame_width, snapshot.frame_height), (1080, 1920));
    }

    Ok(())
}

#[test]
#[serial]
fn test_end_of_stream_loops() -> Result<()> {
    let (mut player, display) = pattern_controller(silent_pattern(0.5), Box::new(NullAudioSink::new()), test_config());
    let events = EventLog::new();
    events.attach(&mut player);

    player.load("clip.mp4")?;
    player.play()?;

    let mut driver = TickDriver::new(30.0);
    driver.run_until(&mut player, 2000, |p| p.stats().loops >= 1)?;

    assert_eq!(player.state(), PlaybackState::Playing);
    assert!(events.contains(&PlayerEvent::EndOfMedia));
    assert!(events.contains(&PlayerEvent::Seeked {
        target: 0.0,
        position: 0.0
    }));
    assert!(!events.contains(&PlayerEvent::PlaybackStopped));

    // Keeps playing from the top
    driver.run_until(&mut player, 2000, |_| display.last().map_or(false, |u| u.pattern_index() == 5))?;
    assert!(player.is_playing());

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_end_of_stream_can_pause() -> Result<()> {
    let mut config = test_config();
    config.playback.end_of_stream = EndOfStreamAction::Pause;
    let (mut player, display) = pattern_controller(silent_pattern(0.5), Box::new(NullAudioSink::new()), config);

    player.load("clip.mp4")?;
    player.play()?;
    TickDriver::new(30.0).run_until(&mut player, 2000, |p| p.state() == PlaybackState::Paused)?;

    assert_eq!(display.last().map(|u| u.pattern_index()), Some(14));
    assert_eq!(player.stats().loops, 0);
    Ok(())
}

#[test]
#[serial]
fn test_pause_resume_continues_after_held_frame() -> Result<()> {
    let (mut player, display) = pattern_controller(silent_pattern(10.0), Box::new(NullAudioSink::new()), test_config());
    let events = EventLog::new();
    events.attach(&mut player);

    player.load("clip.mp4")?;
    player.play()?;
    let mut driver = TickDriver::new(30.0);
    driver.run_until(&mut player, 2000, |_| display.last().map_or(false, |u| u.pattern_index() >= 10))?;

    player.pause()?;
    let held = display.last().unwrap().pattern_index();
    let position = player.current_time();
    assert!(events.contains(&PlayerEvent::PlaybackPaused { position }));

    // Nothing advances while paused
    for _ in 0..10 {
        assert!(!driver.tick(&mut player)?);
    }
    assert_eq!(player.current_time(), position);

    player.toggle_play()?;
    let before = display.count();
    driver.run_until(&mut player, 2000, |_| display.count() > before)?;
    assert_eq!(display.last().unwrap().pattern_index(), held + 1);

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_seek_while_playing_pauses() -> Result<()> {
    let (mut player, display) = pattern_controller(TestPatternConfig::default(), Box::new(NullAudioSink::new()), test_config());
    let events = EventLog::new();
    events.attach(&mut player);
    player.load("clip.mp4")?;
    player.play()?;

    let mut driver = TickDriver::new(30.0);
    driver.run_until(&mut player, 2000, |p| p.current_time() > 0.2)?;
    let position = player.current_time();

    player.seek(6.0)?;
    assert_eq!(player.state(), PlaybackState::Paused);
    assert!(!player.is_playing());
    assert_eq!(display.last().unwrap().pattern_index(), 180);

    // Handlers see the pause before the seek lands
    let tail: Vec<PlayerEvent> = events.events().into_iter().rev().take(2).collect();
    assert!(matches!(tail[0], PlayerEvent::Seeked { .. }));
    assert_eq!(tail[1], PlayerEvent::PlaybackPaused { position });

    // Resuming straight after a seek continues with the next frame
    player.play()?;
    let before = display.count();
    driver.run_until(&mut player, 2000, |_| display.count() > before)?;
    assert_eq!(display.last().unwrap().pattern_index(), 181);

    let before = player.current_time();
    player.seek_relative(-1.0)?;
    assert!((player.current_time() - (before - 1.0)).abs() <= 1.0 / 30.0 + 1e-9);

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_video_frames_presented_in_order() -> Result<()> {
    let mut config = test_config();
    config.playback.video_overflow = OverflowPolicy::DropOldest;
    let (mut player, display) = pattern_controller(silent_pattern(2.0), Box::new(NullAudioSink::new()), config);

    player.load("clip.mp4")?;
    player.play()?;

    // Worker outruns the display and evicts
    thread::sleep(Duration::from_millis(100));
    let mut driver = TickDriver::new(30.0);
    driver.run_until(&mut player, 2000, |p| p.stats().loops >= 1)?;
    player.stop()?;

    assert!(player.stats().video_frames_evicted > 0);

    let indices: Vec<u64> = display.uploads().iter().map(|u| u.pattern_index()).collect();
    let restarts = indices.windows(2).filter(|w| w[1] < w[0]).count();
    assert_eq!(restarts, 1, "{:?}", indices);
    Ok(())
}

#[test]
#[serial]
fn test_audio_underrun_fills_silence() -> Result<()> {
    let sink = ManualAudioSink::new();
    let (mut player, _display) = pattern_controller(TestPatternConfig::default(), Box::new(sink.clone()), test_config());

    player.load("clip.mp4")?;
    player.play()?;
    assert!(sink.is_open());
    assert!(sink.is_started());
    assert!(player.audio_active());

    thread::sleep(Duration::from_millis(50));

    let mut heard = false;
    let mut last = Vec::new();
    for _ in 0..64 {
        let output = sink.pump(2048).unwrap();
        assert!(output.iter().all(|s| s.is_finite() && (-1.0..=1.0).contains(s)));
        heard |= output.iter().any(|s| *s != 0.0);
        last = output;
    }

    // No ticks, so the worker stalls on the frame buffer and the ring runs dry
    assert!(heard);
    assert!(last.iter().all(|s| *s == 0.0));
    assert!(player.stats().audio_underruns > 0);

    player.pause()?;
    assert!(!sink.is_open());

    player.play()?;
    assert_eq!(sink.opened(), 2);
    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_negotiated_audio_format_is_accepted() -> Result<()> {
    let sink = ManualAudioSink::negotiating(AudioFormat::new(1, 22050));
    let (mut player, _display) = pattern_controller(TestPatternConfig::default(), Box::new(sink.clone()), test_config());

    player.load("clip.mp4")?;
    player.play()?;
    thread::sleep(Duration::from_millis(50));

    let output = sink.pump(4096).unwrap();
    assert!(output.iter().any(|s| *s != 0.0));
    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_audio_device_failure_plays_video_only() -> Result<()> {
    let (mut player, display) = pattern_controller(TestPatternConfig::default(), Box::new(FailingAudioSink), test_config());
    let events = EventLog::new();
    events.attach(&mut player);

    player.load("clip.mp4")?;
    player.play()?;

    assert_eq!(player.state(), PlaybackState::Playing);
    assert!(!player.audio_active());
    assert!(events.any(|e| matches!(e, PlayerEvent::AudioDisabled { .. })));

    TickDriver::new(30.0).run_until(&mut player, 2000, |_| display.count() > 5)?;

    // Not retried within the same media
    player.pause()?;
    player.play()?;
    let disabled = events
        .events()
        .iter()
        .filter(|e| matches!(e, PlayerEvent::AudioDisabled { .. }))
        .count();
    assert_eq!(disabled, 1);

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_repeated_decode_errors_fail_playback() -> Result<()> {
    let mut config = test_config();
    config.playback.max_consecutive_decode_errors = 4;

    let mut player = PlaybackController::new(
        Arc::new(FaultyOpener {
            config: silent_pattern(10.0),
            plan: FaultPlan {
                fail_after: Some(20),
                ..Default::default()
            },
        }),
        Box::new(RecordingDisplay::new()),
        Box::new(NullAudioSink::new()),
        config,
    );
    let events = EventLog::new();
    events.attach(&mut player);

    player.load("broken.mp4")?;
    player.play()?;

    let mut driver = TickDriver::new(30.0);
    let mut failure = None;
    for _ in 0..2000 {
        if let Err(e) = driver.tick(&mut player) {
            failure = Some(e);
            break;
        }
    }

    assert!(matches!(failure, Some(SyncPlayerError::PlaybackFailed(_))));
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert!(events.any(|e| matches!(e, PlayerEvent::PlaybackFailed { .. })));
    Ok(())
}

#[test]
#[serial]
fn test_isolated_decode_errors_are_skipped() -> Result<()> {
    let display = RecordingDisplay::new();
    let mut player = PlaybackController::new(
        Arc::new(FaultyOpener {
            config: silent_pattern(10.0),
            plan: FaultPlan {
                fail_every: Some(7),
                ..Default::default()
            },
        }),
        Box::new(display.clone()),
        Box::new(NullAudioSink::new()),
        test_config(),
    );

    player.load("flaky.mp4")?;
    player.play()?;
    TickDriver::new(30.0).run_until(&mut player, 2000, |_| display.last().map_or(false, |u| u.pattern_index() >= 30))?;

    assert!(player.is_playing());
    assert!(player.stats().decode_errors_recovered > 0);
    player.stop()?;
    Ok(())
}

#[test]
fn test_failed_seek_keeps_position() -> Result<()> {
    let plan = FaultPlan::default();
    let fail_seeks = Arc::clone(&plan.fail_seeks);
    let mut player = PlaybackController::new(
        Arc::new(FaultyOpener {
            config: silent_pattern(10.0),
            plan,
        }),
        Box::new(RecordingDisplay::new()),
        Box::new(NullAudioSink::new()),
        test_config(),
    );

    player.load("clip.mp4")?;
    player.seek(2.0)?;

    fail_seeks.store(true, Ordering::SeqCst);
    assert!(matches!(player.seek(7.0), Err(SyncPlayerError::Seek(_))));
    assert_eq!(player.current_time(), 2.0);
    assert_eq!(player.state(), PlaybackState::Paused);

    fail_seeks.store(false, Ordering::SeqCst);
    player.seek(7.0)?;
    assert!((player.current_time() - 7.0).abs() <= 1.0 / 30.0);
    Ok(())
}

#[test]
#[serial]
fn test_display_failure_during_seek_keeps_position() -> Result<()> {
    let (mut player, display) = pattern_controller(silent_pattern(10.0), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;
    player.seek(2.0)?;

    display.set_failing(true);
    assert!(matches!(player.seek(5.0), Err(SyncPlayerError::Seek(_))));
    assert_eq!(player.state(), PlaybackState::Paused);
    assert_eq!(player.current_time(), 2.0);
    assert_eq!(display.last().map(|u| u.pattern_index()), Some(60));

    // Playback picks up after the frame still on screen
    display.set_failing(false);
    player.play()?;
    let before = display.count();
    TickDriver::new(30.0).run_until(&mut player, 2000, |_| display.count() > before)?;
    assert_eq!(display.last().map(|u| u.pattern_index()), Some(61));

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_short_clip_loops_from_first_frame() -> Result<()> {
    // Two frames, shorter than the end-seek window
    let (mut player, display) = pattern_controller(silent_pattern(0.05), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;
    player.play()?;

    TickDriver::new(30.0).run_until(&mut player, 2000, |p| p.stats().loops >= 3)?;

    let indices: Vec<u64> = display.uploads().iter().map(|u| u.pattern_index()).collect();
    assert!(indices.iter().all(|i| *i <= 1), "{:?}", indices);
    assert!(indices.iter().filter(|i| **i == 0).count() >= 4, "{:?}", indices);
    assert!(player.current_time() < 0.05);
    assert!(player.is_playing());

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_stuck_worker_is_detached() -> Result<()> {
    let mut config = test_config();
    config.playback.video_overflow = OverflowPolicy::BlockThenDropOldest { timeout_ms: 20 };
    config.playback.worker_join_timeout_ms = 50;

    // Decode #20 hangs: frames 1..=18 reach the depth-3 buffer first
    let opener = StallingOpener::new(silent_pattern(10.0), 20, Duration::from_millis(800));
    let opens = Arc::clone(&opener.opens);
    let display = RecordingDisplay::new();
    let mut player = PlaybackController::new(
        Arc::new(opener),
        Box::new(display.clone()),
        Box::new(NullAudioSink::new()),
        config,
    );

    player.load("clip.mp4")?;
    player.play()?;

    let deadline = Instant::now() + Duration::from_secs(5);
    while player.stats().video_frames_evicted < 15 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    let evicted = player.stats().video_frames_evicted;
    assert_eq!(evicted, 15);

    let started = Instant::now();
    player.pause()?;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(player.stats().video_frames_evicted, evicted);

    // The stuck worker kept the source; the next session re-opens the media
    player.play()?;
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    let before = display.count();
    TickDriver::new(30.0).run_until(&mut player, 2000, |_| display.count() >= before + 30)?;
    let resumed: Vec<u64> = display.uploads()[before..].iter().map(|u| u.pattern_index()).collect();
    assert_eq!(resumed[0], 1);
    assert!(resumed.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", resumed);
    assert!(player.stats().video_frames_evicted >= evicted);

    player.stop()?;
    Ok(())
}

#[test]
#[serial]
fn test_audio_ahead_of_first_frame_is_played() -> Result<()> {
    let mut config = test_config();
    config.playback.video_overflow = OverflowPolicy::DropOldest;
    config.audio.ring_capacity = 64;
    config.audio.block_size = 1024;

    let sink = ManualAudioSink::new();
    let mut player = PlaybackController::new(
        Arc::new(AudioLeadOpener {
            config: TestPatternConfig {
                duration: 0.5,
                ..Default::default()
            },
            lead: 0.1,
        }),
        Box::new(RecordingDisplay::new()),
        Box::new(sink.clone()),
        config,
    );

    player.load("interleaved.mp4")?;
    player.play()?;

    // No ticks: the worker evicts its way to end of stream
    let deadline = Instant::now() + Duration::from_secs(5);
    while player.stats().video_frames_evicted < 11 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));

    // 0.5s of 48 kHz stereo is 23 full 1024-frame blocks and a short tail
    let mut full_blocks = 0;
    while full_blocks < 64 {
        assert!(sink.pump(2048).is_some());
        if player.stats().audio_underruns > 0 {
            break;
        }
        full_blocks += 1;
    }
    assert_eq!(full_blocks, 23);

    player.stop()?;
    Ok(())
}

#[test]
fn test_open_error_surfaces() {
    let mut player = PlaybackController::new(
        Arc::new(FailingOpener),
        Box::new(HeadlessDisplay::new()),
        Box::new(NullAudioSink::new()),
        test_config(),
    );

    assert!(matches!(player.load("missing.mkv"), Err(SyncPlayerError::Open(_))));
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert!(matches!(player.play(), Err(SyncPlayerError::InvalidState(_))));
}

#[test]
#[serial]
fn test_event_sequence() -> Result<()> {
    let (mut player, _display) = pattern_controller(silent_pattern(10.0), Box::new(NullAudioSink::new()), test_config());
    let events = EventLog::new();
    events.attach(&mut player);

    player.load("clip.mp4")?;
    player.play()?;
    player.pause()?;
    player.seek(3.0)?;
    player.stop()?;

    let kinds: Vec<&str> = events
        .events()
        .iter()
        .map(|e| match e {
            PlayerEvent::MediaLoaded { .. } => "loaded",
            PlayerEvent::PlaybackStarted { .. } => "started",
            PlayerEvent::PlaybackPaused { .. } => "paused",
            PlayerEvent::Seeked { .. } => "seeked",
            PlayerEvent::PlaybackStopped => "stopped",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, ["loaded", "started", "paused", "seeked", "stopped"]);
    assert_eq!(player.current_time(), 0.0);
    Ok(())
}

#[test]
#[serial]
fn test_shared_state_reads_from_another_thread() -> Result<()> {
    let (mut player, _display) = pattern_controller(silent_pattern(1.0), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;

    let shared = player.shared_state();
    let reader = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_millis(300);
        let mut reads = 0u64;
        while Instant::now() < deadline {
            let snapshot = shared.snapshot();
            assert_eq!(snapshot.is_playing, snapshot.state == PlaybackState::Playing);
            assert!(snapshot.current_time >= 0.0 && snapshot.current_time <= snapshot.duration);
            reads += 1;
        }
        reads
    });

    player.play()?;
    let mut driver = TickDriver::new(30.0);
    for i in 0..100 {
        driver.tick(&mut player)?;
        if i == 50 {
            player.seek(0.5)?;
            player.play()?;
        }
    }
    player.stop()?;

    assert!(reader.join().unwrap() > 0);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_real_time_presentation_spacing() -> Result<()> {
    let (mut player, _display) = pattern_controller(silent_pattern(10.0), Box::new(NullAudioSink::new()), test_config());
    player.load("clip.mp4")?;
    player.play()?;

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(4));
    while started.elapsed() < Duration::from_millis(500) {
        ticker.tick().await;
        player.tick()?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let presented = player.stats().frames_presented as f64;
    assert!(presented <= elapsed * 30.0 + 1.0, "{} frames in {:.3}s", presented, elapsed);
    assert!(presented >= 5.0);

    player.stop()?;
    Ok(())
}
