//! H.264 + MP4 end-to-end tests for framereel
//!
//! Drives the recorder with the openh264 backend and the muxide container
//! writer, writing real files into a temporary directory.
//!
//! Run with: cargo test --test encoder_test --features recording

#![cfg(feature = "recording")]

use std::time::{Duration, Instant};
use tempfile::tempdir;

use framereel::recording::{EncoderBackend, H264Backend, Mp4ContainerWriter, OutputStatus};
use framereel::testing::{solid_image, synthetic_image};
use framereel::{FrameReelConfig, Recorder, ReelError, VideoCodecKind, VideoConfig};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn read_box_type(bytes: &[u8], offset: usize) -> Option<&[u8]> {
    bytes.get(offset + 4..offset + 8)
}

// ═══════════════════════════════════════════════════════════════════════════
// FULL RECORDINGS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_one_second_slideshow() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("slideshow.mp4");

    let config = VideoConfig::new(&output, 320, 240)
        .with_frame_rate(30.0)
        .with_title("Integration Test");
    let mut recorder = Recorder::create_mp4(config, 1.0).expect("Recorder creation should succeed");
    recorder.start().expect("Start should succeed");

    for i in 0..30 {
        recorder
            .record(&synthetic_image(i, 320, 240))
            .expect("Frame should be recorded");
    }
    let stats = recorder.stop().expect("Stop should succeed");

    assert_eq!(stats.video_frames, 30);
    assert_eq!(stats.audio_samples, 0);
    assert!(stats.bytes_written > 0);
    assert!(
        (stats.duration_secs - 1.0).abs() < 0.1,
        "Duration should be about 1s, got {:.3}s",
        stats.duration_secs
    );

    let bytes = std::fs::read(&output).expect("Output file should exist");
    assert_eq!(read_box_type(&bytes, 0), Some(&b"ftyp"[..]));
}

#[test]
fn test_recorder_from_config_file_settings() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("configured.mp4");

    let mut config = FrameReelConfig::default();
    config.video.width = 160;
    config.video.height = 120;
    config.video.fps = 10.0;
    config.pacing.audio_steps_per_frame = 4;
    config.pacing.drain_timeout_ms = 1;

    let mut recorder = Recorder::from_config(&config, &output, 1.0).unwrap();
    assert_eq!(recorder.audio_steps_per_frame(), 4);
    assert_eq!(recorder.video().drain_timeout(), Duration::from_millis(1));
    assert_eq!(recorder.video().config().width, 160);

    recorder.start().unwrap();
    for i in 0..10 {
        recorder.record(&synthetic_image(i, 160, 120)).unwrap();
    }
    let stats = recorder.stop().unwrap();
    assert_eq!(stats.video_frames, 10);
    assert!(output.exists());

    config.video.width = 161;
    let invalid = Recorder::from_config(&config, dir.path().join("odd.mp4"), 1.0);
    assert!(matches!(invalid, Err(ReelError::ConfigError(_))));
}

#[test]
fn test_images_of_other_sizes_are_cropped_or_padded() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("mixed_sizes.mp4");

    let config = VideoConfig::new(&output, 160, 120).with_frame_rate(10.0);
    let mut recorder = Recorder::create_mp4(config, 1.0).unwrap();
    recorder.start().unwrap();
    recorder.record(&solid_image(320, 240, [200, 30, 30])).unwrap();
    recorder.record(&solid_image(64, 48, [30, 200, 30])).unwrap();
    recorder.record(&synthetic_image(2, 160, 120)).unwrap();
    let stats = recorder.stop().unwrap();

    assert_eq!(stats.video_frames, 3);
    assert!(output.exists());
}

#[test]
fn test_compressed_output_is_smaller_than_raw() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("bounded.mp4");

    let (width, height) = (320u32, 240u32);
    let config = VideoConfig::new(&output, width, height).with_frame_rate(15.0);
    let mut recorder = Recorder::create_mp4(config, 1.0).unwrap();
    recorder.start().unwrap();
    for i in 0..15 {
        recorder.record(&synthetic_image(i, width, height)).unwrap();
    }
    let stats = recorder.stop().unwrap();

    let raw = (width * height * 3) as u64 * 15;
    assert!(
        stats.bytes_written < raw,
        "Compressed output ({} bytes) should be smaller than raw ({} bytes)",
        stats.bytes_written,
        raw
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// FAILURE PATHS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_unavailable_codec_leaves_no_file() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("hevc.mp4");

    let config = VideoConfig::new(&output, 320, 240).with_codec(VideoCodecKind::Hevc);
    let mut recorder = Recorder::create_mp4(config, 1.0).unwrap();
    assert!(output.exists(), "File is created with the writer");

    let result = recorder.start();
    assert!(matches!(result, Err(ReelError::EncodingError(_))));
    assert!(!output.exists(), "No partial file may be left behind");
    assert!(recorder.stop().is_ok());
}

#[test]
fn test_odd_dimensions_rejected_at_start() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("odd.mp4");

    let config = VideoConfig::new(&output, 321, 240);
    let mut recorder = Recorder::create_mp4(config, 1.0).unwrap();
    assert!(matches!(recorder.start(), Err(ReelError::EncodingError(_))));
}

#[test]
fn test_missing_output_directory() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("does").join("not").join("exist.mp4");

    let config = VideoConfig::new(&output, 320, 240);
    let result = Recorder::create_mp4(config, 1.0);
    assert!(matches!(result, Err(ReelError::IoError(_))));
}

#[test]
fn test_stop_before_any_frame_discards_file() {
    init_logging();
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("empty.mp4");

    let config = VideoConfig::new(&output, 320, 240);
    let mut recorder = Recorder::create_mp4(config, 1.0).unwrap();
    recorder.start().unwrap();
    let stats = recorder.stop().unwrap();

    assert_eq!(stats.video_frames, 0);
    assert!(!output.exists());
}

#[test]
fn test_writer_dropped_without_session_removes_file() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("dropped.mp4");
    {
        let writer = Mp4ContainerWriter::create(&output, true, None).unwrap();
        assert_eq!(writer.path(), output.as_path());
        assert!(output.exists());
    }
    assert!(!output.exists());
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND BEHAVIOUR
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_backend_reports_format_before_first_chunk() {
    let config = VideoConfig::new("unused.mp4", 160, 120);
    let mut backend = H264Backend::new();
    let settings = config.encoder_settings(&backend.capabilities());
    backend.configure(&settings).unwrap();
    backend.start().unwrap();
    assert!(backend.output_format().is_none());

    backend.queue_frame(&synthetic_image(0, 160, 120)).unwrap();
    let first = backend.dequeue_output(Duration::ZERO).unwrap();
    assert!(matches!(first, OutputStatus::FormatChanged));
    assert!(backend.output_format().is_some());

    match backend.dequeue_output(Duration::ZERO).unwrap() {
        OutputStatus::Buffer { index, info } => {
            assert!(info.flags.codec_config);
            assert!(info.size > 0);
            backend.release_output_buffer(index).unwrap();
        }
        other => panic!("Expected the codec config chunk, got {:?}", other),
    }
    match backend.dequeue_output(Duration::ZERO).unwrap() {
        OutputStatus::Buffer { index, info } => {
            assert!(info.flags.key_frame);
            assert!(!info.flags.codec_config);
            backend.release_output_buffer(index).unwrap();
        }
        other => panic!("Expected the first key frame, got {:?}", other),
    }
    backend.stop().unwrap();
    backend.release();
}

#[test]
fn test_encoding_performance() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("perf.mp4");

    let config = VideoConfig::new(&output, 640, 480).with_frame_rate(30.0);
    let mut recorder = Recorder::create_mp4(config, 2.0).unwrap();
    recorder.start().unwrap();

    let frames: Vec<_> = (0..60).map(|i| synthetic_image(i, 640, 480)).collect();
    let started = Instant::now();
    for frame in &frames {
        recorder.record(frame).unwrap();
    }
    let stats = recorder.stop().unwrap();
    let elapsed = started.elapsed();

    println!(
        "Encoded {} frames of 640x480 in {:?} ({:.1} fps)",
        stats.video_frames,
        elapsed,
        stats.video_frames as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(stats.video_frames, 60);
    assert!(elapsed < Duration::from_secs(60));
}
