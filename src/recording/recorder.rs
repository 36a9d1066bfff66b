//! Slideshow recorder combining the drain engine, the frame muxer and the music track

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;

use super::audio_track::{AudioTrackEncoder, SegmentDecoded};
use super::backend::EncoderBackend;
use super::config::{RecordingStats, VideoConfig};
use super::container::ContainerWriter;
use super::drain::{MuxerListener, VideoEncoder};
use super::loop_plan::{AudioLoopPlan, AudioSegmentParams};
use crate::config::{FrameReelConfig, MusicSection};
use crate::errors::ReelError;

/// Audio encode steps interleaved after each video frame
pub const DEFAULT_AUDIO_STEPS_PER_FRAME: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped,
}

struct MusicSchedule {
    encoder: Box<dyn AudioTrackEncoder>,
    end_position: f64,
    fade_duration: f64,
    plan: Option<AudioLoopPlan>,
    current_loop: usize,
    started: bool,
}

impl MusicSchedule {
    fn apply(&mut self, params: AudioSegmentParams) {
        self.encoder.set_start_time_us(params.start_time_us);
        self.encoder.set_end_time_us(params.end_time_us);
        self.encoder.set_fade_duration_us(params.fade_duration_us);
    }

    fn on_segment_decoded(&mut self, event: SegmentDecoded) -> Result<(), ReelError> {
        self.current_loop += 1;
        let next = self
            .plan
            .as_ref()
            .and_then(|plan| plan.segment_params(self.current_loop, self.fade_duration));

        match next {
            Some(params) => {
                log::debug!(
                    "Audio segment {} decoded, starting loop {} ({} us, fade {} us)",
                    event.segment,
                    self.current_loop,
                    params.end_time_us,
                    params.fade_duration_us
                );
                self.apply(params);
                self.encoder.restart_input_decoding()
            }
            None => {
                log::debug!("Final audio segment decoded");
                Ok(())
            }
        }
    }
}

/// Owns the optional music track and answers the muxer's pre-start call.
struct AudioScheduler {
    music: Option<MusicSchedule>,
    video_duration: f64,
    events_tx: Sender<SegmentDecoded>,
    events_rx: Receiver<SegmentDecoded>,
}

impl AudioScheduler {
    fn new(video_duration: f64) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            music: None,
            video_duration,
            events_tx,
            events_rx,
        }
    }

    /// Run audio encode steps until done, or until `limit` steps have run.
    fn step(&mut self, writer: &mut dyn ContainerWriter, limit: Option<usize>) -> Result<(), ReelError> {
        let events = &self.events_rx;
        let Some(music) = self.music.as_mut().filter(|m| m.started) else {
            return Ok(());
        };

        let mut steps = 0;
        while !music.encoder.is_encoding_done() && limit.map_or(true, |max| steps < max) {
            music.encoder.encode(writer)?;
            steps += 1;
            while let Ok(event) = events.try_recv() {
                music.on_segment_decoded(event)?;
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.music
            .as_ref()
            .map_or(true, |m| !m.started || m.encoder.is_encoding_done())
    }

    fn stop(&mut self) -> Result<(), ReelError> {
        match self.music.as_mut() {
            Some(music) => {
                music.started = false;
                music.encoder.stop()
            }
            None => Ok(()),
        }
    }
}

impl MuxerListener for AudioScheduler {
    fn on_muxer_pre_start(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError> {
        let Some(music) = self.music.as_mut() else {
            return Ok(());
        };

        let plan = AudioLoopPlan::new(music.end_position, self.video_duration)?;
        log::info!(
            "Music plan: {:?} s loops, caller fade {:.2} s",
            plan.loops(),
            music.fade_duration
        );

        let first = plan.segment_params(0, music.fade_duration).ok_or_else(|| {
            ReelError::InvalidSchedule("Loop plan has no segments".to_string())
        })?;
        music.plan = Some(plan);
        music.current_loop = 0;
        music.apply(first);
        music.encoder.start(writer)?;
        music.started = true;
        Ok(())
    }
}

/// Turns a sequence of images into a video of a known length, with optional looped music.
///
/// ```rust,ignore
/// let config = VideoConfig::new("slideshow.mp4", 1280, 720).with_frame_rate(30.0);
/// let mut recorder = Recorder::create_mp4(config, 12.0)?;
/// recorder.set_music_file("song.mp3", 5.0, 0.5)?;
/// recorder.start()?;
/// for image in &images {
///     recorder.record(image)?;
/// }
/// recorder.drain_remaining_audio()?;
/// let stats = recorder.stop()?;
/// ```
pub struct Recorder<B: EncoderBackend, W: ContainerWriter> {
    state: RecorderState,
    video: VideoEncoder<B, W>,
    audio: AudioScheduler,
    audio_steps_per_frame: usize,
    music_defaults: Option<MusicSection>,
    output_path: String,
}

impl<B: EncoderBackend, W: ContainerWriter> Recorder<B, W> {
    /// `video_duration` is the total length, in seconds, the caller will record.
    pub fn new(config: VideoConfig, video_duration: f64, backend: B, writer: W) -> Self {
        let output_path = config.path.to_string_lossy().to_string();
        Self {
            state: RecorderState::Idle,
            video: VideoEncoder::new(config, backend, writer),
            audio: AudioScheduler::new(video_duration),
            audio_steps_per_frame: DEFAULT_AUDIO_STEPS_PER_FRAME,
            music_defaults: None,
            output_path,
        }
    }

    pub fn with_audio_steps_per_frame(mut self, steps: usize) -> Self {
        self.audio_steps_per_frame = steps;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.video.set_drain_timeout(timeout);
        self
    }

    /// Apply the `[pacing]` section and keep `[music]` for [`Recorder::set_configured_music`].
    pub fn with_config(mut self, config: &FrameReelConfig) -> Self {
        self.audio_steps_per_frame = config.pacing.audio_steps_per_frame;
        self.video.set_drain_timeout(config.drain_timeout());
        self.music_defaults = Some(config.music.clone());
        self
    }

    pub fn audio_steps_per_frame(&self) -> usize {
        self.audio_steps_per_frame
    }

    /// [`Recorder::set_music`] with the loop point and fade from the `[music]` section.
    pub fn set_configured_music(
        &mut self,
        encoder: Box<dyn AudioTrackEncoder>,
    ) -> Result<(), ReelError> {
        let music = self.music_defaults.clone().ok_or_else(|| {
            ReelError::ConfigError("No configuration applied to this recorder".to_string())
        })?;
        self.set_music(encoder, music.end_position, music.fade_duration)
    }

    /// Loop `encoder`'s source over the whole video.
    ///
    /// The clip is cut at `music_end_position` seconds and repeated; every
    /// loop but the last fades out over `music_fade_duration` seconds.
    pub fn set_music(
        &mut self,
        mut encoder: Box<dyn AudioTrackEncoder>,
        music_end_position: f64,
        music_fade_duration: f64,
    ) -> Result<(), ReelError> {
        if self.state != RecorderState::Idle {
            return Err(ReelError::InvalidState(
                "Music must be set before recording starts".to_string(),
            ));
        }
        if !music_fade_duration.is_finite() || music_fade_duration < 0.0 {
            return Err(ReelError::InvalidSchedule(format!(
                "fade duration must not be negative, got {}",
                music_fade_duration
            )));
        }
        // validates both durations
        AudioLoopPlan::new(music_end_position, self.audio.video_duration)?;

        if let Some(source_us) = encoder.source_duration_us() {
            let end_us = (music_end_position * 1_000_000.0).round() as i64;
            if end_us > source_us {
                return Err(ReelError::InvalidSchedule(format!(
                    "music end position {:.3}s is beyond the clip length {:.3}s",
                    music_end_position,
                    source_us as f64 / 1_000_000.0
                )));
            }
        }

        encoder.set_decoding_done_listener(self.audio.events_tx.clone());
        self.audio.music = Some(MusicSchedule {
            encoder,
            end_position: music_end_position,
            fade_duration: music_fade_duration,
            plan: None,
            current_loop: 0,
            started: false,
        });
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ReelError> {
        if self.state != RecorderState::Idle {
            return Err(ReelError::InvalidState(format!(
                "Recorder cannot start from {:?}",
                self.state
            )));
        }

        if let Err(e) = self.video.start() {
            log::error!("Failed to start recording: {}", e);
            self.abort();
            return Err(e);
        }
        self.state = RecorderState::Recording;
        log::info!("Recording to {}", self.output_path);
        Ok(())
    }

    /// Encode one image, then give the music track a bounded share of work.
    ///
    /// Any failure tears the recording down; the recorder ends up `Stopped`.
    pub fn record(&mut self, image: &RgbImage) -> Result<(), ReelError> {
        self.ensure_recording()?;
        let result = self
            .video
            .submit_frame(image, &mut self.audio)
            .and_then(|_| self.pump_audio(Some(self.audio_steps_per_frame)));
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Run the music track until it has written everything.
    pub fn drain_remaining_audio(&mut self) -> Result<(), ReelError> {
        self.ensure_recording()?;
        let result = self.pump_audio(None);
        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Flush the encoder, finalize the container and stop the music track.
    ///
    /// Every teardown step runs even if an earlier one fails; the first
    /// failure is returned. Outside `Recording` this releases whatever is
    /// still held and returns empty stats.
    pub fn stop(&mut self) -> Result<RecordingStats, ReelError> {
        if self.state != RecorderState::Recording {
            self.abort();
            return Ok(RecordingStats {
                output_path: self.output_path.clone(),
                ..RecordingStats::default()
            });
        }
        self.state = RecorderState::Stopped;

        let finished = self.video.finish(&mut self.audio);
        let released = self.video.release();
        let audio_stopped = self.audio.stop();

        finished?;
        let container = released?.unwrap_or_default();
        audio_stopped?;

        let stats = RecordingStats {
            video_frames: container.video_samples,
            audio_samples: container.audio_samples,
            duration_secs: container.duration_secs,
            bytes_written: container.bytes_written,
            audio_loops: self.audio_loops(),
            output_path: self.output_path.clone(),
        };
        log::info!(
            "Recording stopped: {} frames, {} audio samples, {:.2}s",
            stats.video_frames,
            stats.audio_samples,
            stats.duration_secs
        );
        Ok(stats)
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn video_duration(&self) -> f64 {
        self.audio.video_duration
    }

    pub fn frames_recorded(&self) -> u64 {
        self.video.stats().frames_submitted
    }

    /// The loop plan, once the muxer has started
    pub fn audio_loop_plan(&self) -> Option<&AudioLoopPlan> {
        self.audio.music.as_ref().and_then(|m| m.plan.as_ref())
    }

    /// Index of the loop the music track is currently on
    pub fn current_audio_loop(&self) -> Option<usize> {
        self.audio
            .music
            .as_ref()
            .filter(|m| m.plan.is_some())
            .map(|m| m.current_loop)
    }

    pub fn is_audio_done(&self) -> bool {
        self.audio.is_done()
    }

    pub fn video(&self) -> &VideoEncoder<B, W> {
        &self.video
    }

    fn audio_loops(&self) -> usize {
        self.audio_loop_plan().map_or(0, AudioLoopPlan::len)
    }

    fn ensure_recording(&self) -> Result<(), ReelError> {
        if self.state == RecorderState::Recording {
            Ok(())
        } else {
            Err(ReelError::InvalidState(format!(
                "Recorder is not recording ({:?})",
                self.state
            )))
        }
    }

    fn pump_audio(&mut self, limit: Option<usize>) -> Result<(), ReelError> {
        // no audio before the muxer has started
        let Some(writer) = self.video.container_mut() else {
            return Ok(());
        };
        self.audio.step(writer, limit)
    }

    /// Release everything without reporting; used on failure paths.
    fn abort(&mut self) {
        self.state = RecorderState::Stopped;
        if let Err(e) = self.video.release() {
            log::warn!("Video teardown failed: {}", e);
        }
        if let Err(e) = self.audio.stop() {
            log::warn!("Audio teardown failed: {}", e);
        }
    }
}

#[cfg(feature = "recording")]
impl Recorder<super::encoder::H264Backend, super::mp4::Mp4ContainerWriter> {
    /// Record into an MP4 file at `config.path` with the built-in H.264 encoder.
    pub fn create_mp4(config: VideoConfig, video_duration: f64) -> Result<Self, ReelError> {
        let writer = super::mp4::Mp4ContainerWriter::create(
            &config.path,
            config.fast_start,
            config.title.clone(),
        )?;
        Ok(Self::new(
            config,
            video_duration,
            super::encoder::H264Backend::new(),
            writer,
        ))
    }

    /// MP4 recorder built from a validated [`FrameReelConfig`].
    pub fn from_config<P: AsRef<std::path::Path>>(
        config: &FrameReelConfig,
        path: P,
        video_duration: f64,
    ) -> Result<Self, ReelError> {
        config.validate()?;
        Ok(Self::create_mp4(config.video_config(path), video_duration)?.with_config(config))
    }
}

#[cfg(feature = "audio")]
impl<B: EncoderBackend, W: ContainerWriter> Recorder<B, W> {
    /// Loop a music file (any format symphonia can read) over the video.
    pub fn set_music_file<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
        music_end_position: f64,
        music_fade_duration: f64,
    ) -> Result<(), ReelError> {
        let encoder = crate::audio::MusicEncoder::open(path)?;
        self.set_music(Box::new(encoder), music_end_position, music_fade_duration)
    }

    /// [`Recorder::set_music_file`] with the `[music]` section's loop point and fade.
    pub fn set_configured_music_file<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
    ) -> Result<(), ReelError> {
        let encoder = crate::audio::MusicEncoder::open(path)?;
        self.set_configured_music(Box::new(encoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::TrackHandle;
    use crate::testing::{
        synthetic_image, ContainerEvent, MemoryContainer, ScriptedAudio, ScriptedEncoder,
    };

    fn recorder(video_duration: f64) -> (Recorder<ScriptedEncoder, MemoryContainer>, std::rc::Rc<std::cell::RefCell<crate::testing::ContainerLog>>) {
        let container = MemoryContainer::new();
        let log = container.log();
        let config = VideoConfig::new("memory.mp4", 16, 16).with_frame_rate(10.0);
        (
            Recorder::new(config, video_duration, ScriptedEncoder::new(), container),
            log,
        )
    }

    #[test]
    fn music_loops_follow_the_plan() {
        let (mut rec, log) = recorder(12.0);
        let audio = ScriptedAudio::new(500_000);
        let probe = audio.probe();
        rec.set_music(Box::new(audio), 5.0, 0.0).unwrap();
        rec.start().unwrap();

        for i in 0..120 {
            rec.record(&synthetic_image(i, 16, 16)).unwrap();
        }
        rec.drain_remaining_audio().unwrap();
        let stats = rec.stop().unwrap();

        let probe = probe.borrow();
        let windows: Vec<(i64, i64)> = probe
            .segments
            .iter()
            .map(|s| (s.end_time_us, s.fade_duration_us))
            .collect();
        assert_eq!(
            windows,
            vec![(5_000_000, 0), (5_000_000, 0), (2_000_000, 2_000_000)]
        );
        assert!(probe.segments.iter().all(|s| s.start_time_us == 0));
        assert!(probe.stopped);
        assert_eq!(stats.audio_loops, 3);
        assert_eq!(stats.video_frames, 120);
        assert_eq!(log.borrow().audio_samples().count(), 24);
    }

    #[test]
    fn audio_track_is_added_before_the_session_starts() {
        let (mut rec, log) = recorder(3.0);
        let audio = ScriptedAudio::new(100_000);
        rec.set_music(Box::new(audio), 5.0, 0.0).unwrap();
        rec.start().unwrap();
        rec.record(&synthetic_image(0, 16, 16)).unwrap();

        let log = log.borrow();
        let audio_added = log
            .position(|e| *e == ContainerEvent::TrackAdded(TrackHandle(0)))
            .unwrap();
        let started = log.position(|e| *e == ContainerEvent::Started).unwrap();
        let first_sample = log.position(|e| matches!(e, ContainerEvent::Sample(_))).unwrap();
        assert!(audio_added < started);
        assert!(started < first_sample);
        assert_eq!(log.tracks.len(), 2);
    }

    #[test]
    fn audio_quota_is_bounded_per_frame() {
        let (rec, _log) = recorder(10.0);
        let mut rec = rec.with_audio_steps_per_frame(1);
        let audio = ScriptedAudio::new(100_000);
        let probe = audio.probe();
        rec.set_music(Box::new(audio), 10.0, 0.0).unwrap();
        rec.start().unwrap();

        for i in 0..5 {
            rec.record(&synthetic_image(i, 16, 16)).unwrap();
        }
        assert_eq!(probe.borrow().encode_calls, 5);
        assert!(!rec.is_audio_done());
    }

    #[test]
    fn stop_without_start_returns_empty_stats() {
        let (mut rec, log) = recorder(4.0);
        let stats = rec.stop().unwrap();
        assert_eq!(stats.video_frames, 0);
        assert_eq!(rec.state(), RecorderState::Stopped);
        assert_eq!(log.borrow().release_calls, 1);

        let again = rec.stop().unwrap();
        assert_eq!(again.video_frames, 0);
        assert_eq!(log.borrow().release_calls, 1);
    }

    #[test]
    fn music_cannot_change_after_start() {
        let (mut rec, _log) = recorder(4.0);
        rec.start().unwrap();
        let result = rec.set_music(Box::new(ScriptedAudio::new(1_000)), 2.0, 0.0);
        assert!(matches!(result, Err(ReelError::InvalidState(_))));
    }

    #[test]
    fn loop_point_beyond_clip_is_rejected() {
        let (mut rec, _log) = recorder(4.0);
        let audio = ScriptedAudio::new(1_000).with_source_duration_us(3_000_000);
        let result = rec.set_music(Box::new(audio), 3.5, 0.0);
        assert!(matches!(result, Err(ReelError::InvalidSchedule(_))));
    }

    #[test]
    fn failed_audio_start_tears_down_the_recording() {
        let (mut rec, log) = recorder(4.0);
        rec.set_music(Box::new(ScriptedAudio::new(1_000).failing_start()), 2.0, 0.0)
            .unwrap();
        rec.start().unwrap();

        let result = rec.record(&synthetic_image(0, 16, 16));
        assert!(matches!(result, Err(ReelError::AudioError(_))));
        assert_eq!(rec.state(), RecorderState::Stopped);
        assert_eq!(log.borrow().release_calls, 1);
        assert!(matches!(
            rec.record(&synthetic_image(1, 16, 16)),
            Err(ReelError::InvalidState(_))
        ));
    }

    #[test]
    fn config_sections_reach_the_recorder() {
        let mut config = FrameReelConfig::default();
        config.pacing.audio_steps_per_frame = 3;
        config.pacing.drain_timeout_ms = 0;
        config.music.end_position = 1.5;
        config.music.fade_duration = 0.25;

        let (rec, _log) = recorder(4.0);
        let mut rec = rec.with_config(&config);
        assert_eq!(rec.audio_steps_per_frame(), 3);
        assert_eq!(rec.video().drain_timeout(), Duration::ZERO);

        let audio = ScriptedAudio::new(1_000);
        let probe = audio.probe();
        rec.set_configured_music(Box::new(audio)).unwrap();
        rec.start().unwrap();
        rec.record(&synthetic_image(0, 16, 16)).unwrap();

        assert_eq!(rec.audio_loop_plan().unwrap().loops(), &[1.5, 1.5, 1.0]);
        assert_eq!(probe.borrow().encode_calls, 3);
        let first = probe.borrow().segments[0];
        assert_eq!(first.end_time_us, 1_500_000);
        assert_eq!(first.fade_duration_us, 250_000);
    }

    #[test]
    fn configured_music_needs_a_config() {
        let (mut rec, _log) = recorder(4.0);
        let result = rec.set_configured_music(Box::new(ScriptedAudio::new(1_000)));
        assert!(matches!(result, Err(ReelError::ConfigError(_))));
    }
}
