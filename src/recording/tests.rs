//! Tests for the recording module

#[cfg(test)]
mod recording_tests {
    use crate::errors::ReelError;
    use crate::recording::{
        Profile, Recorder, RecorderState, RecordingQuality, RecordingStats, VideoCodecKind,
        VideoConfig,
    };
    use crate::testing::{synthetic_image, MemoryContainer, ScriptedAudio, ScriptedEncoder};

    #[test]
    fn test_quality_presets() {
        assert_eq!(RecordingQuality::Low.resolution(), (1280, 720));
        assert_eq!(RecordingQuality::Medium.resolution(), (1920, 1080));
        assert_eq!(RecordingQuality::High.resolution(), (1920, 1080));
        assert!(RecordingQuality::High.bitrate() > RecordingQuality::Medium.bitrate());
    }

    #[test]
    fn test_config_from_quality() {
        let config = VideoConfig::from_quality("out.mp4", RecordingQuality::High);
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.frame_rate, 30.0);
        assert_eq!(config.bitrate, 8_000_000);
        assert_eq!(config.codec, VideoCodecKind::Avc);
    }

    #[test]
    fn test_config_with_title() {
        let config = VideoConfig::from_quality("out.mp4", RecordingQuality::Medium)
            .with_title("My Slideshow");
        assert_eq!(config.title, Some("My Slideshow".to_string()));
    }

    #[test]
    fn test_key_frame_period() {
        let config = VideoConfig::new("out.mp4", 640, 480).with_frame_rate(30.0);
        assert_eq!(config.key_frame_period(), 30);
        assert_eq!(config.clone().with_key_frame_interval(2.0).key_frame_period(), 60);
        assert_eq!(config.clone().with_key_frame_interval(0.0).key_frame_period(), 1);
        assert_eq!(config.with_key_frame_interval(f64::NAN).key_frame_period(), 1);
    }

    #[test]
    fn test_codec_parsing() {
        assert_eq!("h264".parse::<VideoCodecKind>().unwrap(), VideoCodecKind::Avc);
        assert_eq!("HEVC".parse::<VideoCodecKind>().unwrap(), VideoCodecKind::Hevc);
        assert!("vp9".parse::<VideoCodecKind>().is_err());
        assert_eq!(VideoCodecKind::Avc.mime_type(), "video/avc");
    }

    #[test]
    fn test_encoder_settings_negotiated_against_capabilities() {
        use crate::recording::EncoderBackend;

        let encoder = ScriptedEncoder::new();
        let config = VideoConfig::new("out.mp4", 640, 480).with_bitrate(50_000_000);
        let settings = config.encoder_settings(&encoder.capabilities());
        assert_eq!(settings.profile, Some(Profile::High));
        assert_eq!(settings.level, Some(41));
        assert_eq!(settings.bitrate, 20_000_000);
        assert_eq!(settings.key_frame_period, 30);
    }

    #[test]
    fn test_stats_bitrate() {
        let stats = RecordingStats {
            duration_secs: 2.0,
            bytes_written: 250_000,
            ..RecordingStats::default()
        };
        assert_eq!(stats.avg_bitrate(), 1_000_000.0);
        assert_eq!(RecordingStats::default().avg_bitrate(), 0.0);
    }

    #[test]
    fn test_recording_workflow() {
        let container = MemoryContainer::new();
        let log = container.log();
        let encoder = ScriptedEncoder::new().with_latency(2);
        let probe = encoder.probe();
        let config = VideoConfig::new("memory.mp4", 32, 24).with_frame_rate(30.0);

        let mut recorder = Recorder::new(config, 1.0, encoder, container);
        recorder.start().unwrap();
        for i in 0..30 {
            recorder.record(&synthetic_image(i, 32, 24)).unwrap();
        }
        assert_eq!(recorder.frames_recorded(), 30);
        assert_eq!(recorder.state(), RecorderState::Recording);

        let stats = recorder.stop().unwrap();
        assert_eq!(stats.video_frames, 30);
        assert_eq!(stats.audio_samples, 0);
        assert_eq!(stats.audio_loops, 0);
        assert_eq!(stats.output_path, "memory.mp4");

        let log = log.borrow();
        let stamps: Vec<i64> = log.video_samples().map(|s| s.timestamp_us).collect();
        let expected: Vec<i64> = (0..30)
            .map(|i| (i as f64 * 1_000_000.0 / 30.0).round() as i64)
            .collect();
        assert_eq!(stamps, expected);
        assert!(log.samples.iter().all(|s| !s.flags.codec_config));
        assert!(log.samples[0].flags.key_frame);
        assert!(log.stopped);

        let probe = probe.borrow();
        assert_eq!(probe.outstanding(), 0);
        assert!(probe.stopped);
        assert!(probe.released_encoder);
    }

    #[test]
    fn test_container_failure_aborts_recording() {
        let container = MemoryContainer::new().failing_after(3);
        let log = container.log();
        let encoder = ScriptedEncoder::new();
        let probe = encoder.probe();
        let config = VideoConfig::new("memory.mp4", 16, 16).with_frame_rate(10.0);

        let mut recorder = Recorder::new(config, 1.0, encoder, container);
        recorder.start().unwrap();
        for i in 0..3 {
            recorder.record(&synthetic_image(i, 16, 16)).unwrap();
        }

        let result = recorder.record(&synthetic_image(3, 16, 16));
        assert!(matches!(result, Err(ReelError::IoError(_))));
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert_eq!(log.borrow().release_calls, 1);
        assert_eq!(probe.borrow().outstanding(), 0);
        assert!(probe.borrow().released_encoder);

        let stats = recorder.stop().unwrap();
        assert_eq!(stats.video_frames, 0);
        assert_eq!(log.borrow().release_calls, 1);
    }

    #[test]
    fn test_music_with_unsupported_codec_never_starts() {
        let container = MemoryContainer::new();
        let log = container.log();
        let config = VideoConfig::new("memory.mp4", 16, 16).with_codec(VideoCodecKind::Hevc);

        let mut recorder = Recorder::new(config, 2.0, ScriptedEncoder::new(), container);
        let audio = ScriptedAudio::new(100_000);
        let audio_probe = audio.probe();
        recorder.set_music(Box::new(audio), 1.0, 0.0).unwrap();

        assert!(matches!(recorder.start(), Err(ReelError::EncodingError(_))));
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert!(log.borrow().tracks.is_empty());
        assert!(!audio_probe.borrow().started);
        assert!(recorder.audio_loop_plan().is_none());
    }

    #[test]
    fn test_loop_plan_visible_once_muxer_starts() {
        let config = VideoConfig::new("memory.mp4", 16, 16).with_frame_rate(10.0);
        let mut recorder = Recorder::new(config, 3.0, ScriptedEncoder::new(), MemoryContainer::new());
        recorder
            .set_music(Box::new(ScriptedAudio::new(250_000)), 5.0, 0.5)
            .unwrap();
        recorder.start().unwrap();
        assert!(recorder.audio_loop_plan().is_none());
        assert_eq!(recorder.current_audio_loop(), None);

        recorder.record(&synthetic_image(0, 16, 16)).unwrap();
        let plan = recorder.audio_loop_plan().unwrap();
        assert_eq!(plan.loops(), &[3.0]);
        assert_eq!(recorder.current_audio_loop(), Some(0));
    }
}
