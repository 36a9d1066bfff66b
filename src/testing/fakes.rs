//! Scripted collaborators
//!
//! In-memory stand-ins for the encoder, the container writer and the music
//! encoder. Each one shares a probe (`Rc<RefCell<..>>`) with the test so the
//! test can inspect what the pipeline did after the collaborator was moved
//! into it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crossbeam_channel::Sender;
use image::RgbImage;

use super::synthetic_data::{synthetic_parameter_sets, synthetic_slice, synthetic_video_format};
use crate::errors::ReelError;
use crate::recording::{
    AudioCodecKind, AudioTrackEncoder, AudioTrackFormat, BufferInfo, ChunkFlags, ContainerStats,
    ContainerWriter, EncoderBackend, EncoderCapabilities, EncoderSettings, OutputStatus, Profile,
    ProfileLevel, SegmentDecoded, TrackFormat, TrackHandle, VideoCodecKind,
};

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    TrackAdded(TrackHandle),
    Started,
    Sample(TrackHandle),
    Stopped,
    Released,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSample {
    pub track: TrackHandle,
    pub timestamp_us: i64,
    pub data: Vec<u8>,
    pub flags: ChunkFlags,
}

/// Everything a [`MemoryContainer`] was asked to do
#[derive(Debug, Default)]
pub struct ContainerLog {
    pub tracks: Vec<TrackFormat>,
    pub events: Vec<ContainerEvent>,
    pub samples: Vec<RecordedSample>,
    pub started: bool,
    pub stopped: bool,
    pub release_calls: usize,
}

impl ContainerLog {
    fn is_track<F: Fn(&TrackFormat) -> bool>(&self, handle: TrackHandle, pred: F) -> bool {
        self.tracks.get(handle.0).map(pred).unwrap_or(false)
    }

    pub fn video_samples(&self) -> impl Iterator<Item = &RecordedSample> + '_ {
        self.samples
            .iter()
            .filter(move |s| self.is_track(s.track, TrackFormat::is_video))
    }

    pub fn audio_samples(&self) -> impl Iterator<Item = &RecordedSample> + '_ {
        self.samples
            .iter()
            .filter(move |s| self.is_track(s.track, TrackFormat::is_audio))
    }

    /// Position of the first event matching `pred`
    pub fn position<F: Fn(&ContainerEvent) -> bool>(&self, pred: F) -> Option<usize> {
        self.events.iter().position(pred)
    }
}

/// Container writer that keeps every sample in memory.
///
/// Enforces the session rules a real muxer enforces: tracks only before
/// `start`, samples only between `start` and `stop`.
pub struct MemoryContainer {
    log: Rc<RefCell<ContainerLog>>,
    fail_after_samples: Option<usize>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(ContainerLog::default())),
            fail_after_samples: None,
        }
    }

    /// Make `write_sample` fail once `count` samples have been accepted.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after_samples = Some(count);
        self
    }

    pub fn log(&self) -> Rc<RefCell<ContainerLog>> {
        Rc::clone(&self.log)
    }
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerWriter for MemoryContainer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackHandle, ReelError> {
        let mut log = self.log.borrow_mut();
        if log.started {
            return Err(ReelError::MuxingError(
                "Tracks must be added before the session starts".to_string(),
            ));
        }
        let handle = TrackHandle(log.tracks.len());
        log.tracks.push(format.clone());
        log.events.push(ContainerEvent::TrackAdded(handle));
        Ok(handle)
    }

    fn start(&mut self) -> Result<(), ReelError> {
        let mut log = self.log.borrow_mut();
        if log.started {
            return Err(ReelError::MuxingError("Session already started".to_string()));
        }
        log.started = true;
        log.events.push(ContainerEvent::Started);
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackHandle,
        buffer: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ReelError> {
        let mut log = self.log.borrow_mut();
        if !log.started || log.stopped {
            return Err(ReelError::MuxingError(
                "Samples can only be written while the session runs".to_string(),
            ));
        }
        if track.0 >= log.tracks.len() {
            return Err(ReelError::MuxingError(format!("Unknown track {:?}", track)));
        }
        if let Some(limit) = self.fail_after_samples {
            if log.samples.len() >= limit {
                return Err(ReelError::IoError("Disk full".to_string()));
            }
        }

        let data = info.slice(buffer)?.to_vec();
        log.samples.push(RecordedSample {
            track,
            timestamp_us: info.presentation_time_us,
            data,
            flags: info.flags,
        });
        log.events.push(ContainerEvent::Sample(track));
        Ok(())
    }

    fn stop(&mut self) -> Result<ContainerStats, ReelError> {
        let mut log = self.log.borrow_mut();
        if !log.started || log.stopped {
            return Err(ReelError::MuxingError("Session is not running".to_string()));
        }
        log.stopped = true;
        log.events.push(ContainerEvent::Stopped);

        let video_samples = log.video_samples().count() as u64;
        let audio_samples = log.audio_samples().count() as u64;
        let last_us = log.samples.iter().map(|s| s.timestamp_us).max().unwrap_or(0);
        let bytes_written = log.samples.iter().map(|s| s.data.len() as u64).sum();
        Ok(ContainerStats {
            video_samples,
            audio_samples,
            duration_secs: last_us as f64 / 1_000_000.0,
            bytes_written,
        })
    }

    fn release(&mut self) {
        let mut log = self.log.borrow_mut();
        log.release_calls += 1;
        log.events.push(ContainerEvent::Released);
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// What a [`ScriptedEncoder`] did, visible after it moved into the pipeline
#[derive(Debug, Default)]
pub struct EncoderProbe {
    pub settings: Option<EncoderSettings>,
    pub frames_queued: u64,
    pub dequeued: u64,
    pub released: u64,
    pub started: bool,
    pub stopped: bool,
    pub released_encoder: bool,
}

impl EncoderProbe {
    /// Buffers handed out and not yet given back
    pub fn outstanding(&self) -> u64 {
        self.dequeued - self.released
    }
}

#[derive(Debug)]
enum Pending {
    Status(OutputStatus),
    Chunk { data: Vec<u8>, flags: ChunkFlags, pts_us: i64 },
}

/// Deterministic encoder with configurable latency, pool size and misbehaviour.
pub struct ScriptedEncoder {
    probe: Rc<RefCell<EncoderProbe>>,
    latency: usize,
    pool: Vec<Option<Vec<u8>>>,
    burst: usize,
    empty_polls_before_eos: usize,
    advisory_noise: bool,
    duplicate_format: bool,
    emit_format: bool,
    in_flight: VecDeque<u64>,
    pending: VecDeque<Pending>,
    format: Option<TrackFormat>,
    format_emitted: bool,
    end_of_input: bool,
    eos_polls_left: usize,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self {
            probe: Rc::new(RefCell::new(EncoderProbe::default())),
            latency: 0,
            pool: vec![None; 4],
            burst: 1,
            empty_polls_before_eos: 0,
            advisory_noise: false,
            duplicate_format: false,
            emit_format: true,
            in_flight: VecDeque::new(),
            pending: VecDeque::new(),
            format: None,
            format_emitted: false,
            end_of_input: false,
            eos_polls_left: 0,
        }
    }

    /// Hold `frames` frames before any output appears.
    pub fn with_latency(mut self, frames: usize) -> Self {
        self.latency = frames;
        self
    }

    pub fn with_pool_size(mut self, slots: usize) -> Self {
        self.pool = vec![None; slots.max(1)];
        self
    }

    /// Produce `chunks` output chunks per input frame.
    pub fn with_burst(mut self, chunks: usize) -> Self {
        self.burst = chunks.max(1);
        self
    }

    /// Report nothing ready for `polls` polls after end of input.
    pub fn with_empty_polls_before_eos(mut self, polls: usize) -> Self {
        self.empty_polls_before_eos = polls;
        self
    }

    /// Interleave buffer-set and advisory statuses with real output.
    pub fn with_advisory_noise(mut self) -> Self {
        self.advisory_noise = true;
        self
    }

    pub fn with_duplicate_format_change(mut self) -> Self {
        self.duplicate_format = true;
        self
    }

    /// Emit chunks without ever reporting the output format.
    pub fn without_format_change(mut self) -> Self {
        self.emit_format = false;
        self
    }

    pub fn probe(&self) -> Rc<RefCell<EncoderProbe>> {
        Rc::clone(&self.probe)
    }

    fn emit_frame(&mut self, frame: u64) {
        if !self.format_emitted && self.emit_format {
            self.format_emitted = true;
            self.pending.push_back(Pending::Status(OutputStatus::FormatChanged));
            if self.duplicate_format {
                self.pending.push_back(Pending::Status(OutputStatus::FormatChanged));
            }
            self.push_chunk(
                synthetic_parameter_sets(),
                ChunkFlags {
                    codec_config: true,
                    ..ChunkFlags::default()
                },
                0,
            );
        }

        for part in 0..self.burst {
            let key = frame == 0 && part == 0;
            let nal_type = if key { 5 } else { 1 };
            self.push_chunk(
                synthetic_slice(nal_type, 16, frame as u8),
                ChunkFlags {
                    key_frame: key,
                    ..ChunkFlags::default()
                },
                // deliberately unrelated to the frame position
                (frame as i64 + 1) * 7_777,
            );
        }
    }

    fn push_chunk(&mut self, data: Vec<u8>, flags: ChunkFlags, pts_us: i64) {
        if self.advisory_noise {
            self.pending.push_back(Pending::Status(OutputStatus::BuffersChanged));
            self.pending.push_back(Pending::Status(OutputStatus::Advisory(-3)));
        }
        self.pending.push_back(Pending::Chunk { data, flags, pts_us });
    }
}

impl Default for ScriptedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for ScriptedEncoder {
    fn capabilities(&self) -> Vec<EncoderCapabilities> {
        vec![EncoderCapabilities {
            codec: VideoCodecKind::Avc,
            name: "scripted.avc".to_string(),
            hardware_accelerated: false,
            profile_levels: vec![
                ProfileLevel {
                    profile: Profile::Baseline,
                    level: 31,
                },
                ProfileLevel {
                    profile: Profile::High,
                    level: 41,
                },
            ],
            bitrate_range: 100_000..=20_000_000,
        }]
    }

    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), ReelError> {
        if settings.codec != VideoCodecKind::Avc {
            return Err(ReelError::EncodingError(format!(
                "No scripted encoder for {}",
                settings.codec
            )));
        }
        self.format = Some(synthetic_video_format(
            settings.width,
            settings.height,
            settings.frame_rate,
        ));
        self.probe.borrow_mut().settings = Some(settings.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), ReelError> {
        if self.format.is_none() {
            return Err(ReelError::EncodingError("Encoder not configured".to_string()));
        }
        self.probe.borrow_mut().started = true;
        Ok(())
    }

    fn queue_frame(&mut self, _image: &RgbImage) -> Result<(), ReelError> {
        let frame = {
            let mut probe = self.probe.borrow_mut();
            probe.frames_queued += 1;
            probe.frames_queued - 1
        };
        self.in_flight.push_back(frame);
        while self.in_flight.len() > self.latency {
            if let Some(ready) = self.in_flight.pop_front() {
                self.emit_frame(ready);
            }
        }
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<(), ReelError> {
        self.end_of_input = true;
        self.eos_polls_left = self.empty_polls_before_eos;
        while let Some(frame) = self.in_flight.pop_front() {
            self.emit_frame(frame);
        }
        self.pending.push_back(Pending::Chunk {
            data: Vec::new(),
            flags: ChunkFlags {
                end_of_stream: true,
                ..ChunkFlags::default()
            },
            pts_us: 0,
        });
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<OutputStatus, ReelError> {
        if self.end_of_input && self.eos_polls_left > 0 {
            self.eos_polls_left -= 1;
            return Ok(OutputStatus::TryAgainLater);
        }

        match self.pending.front() {
            None => Ok(OutputStatus::TryAgainLater),
            Some(Pending::Status(_)) => match self.pending.pop_front() {
                Some(Pending::Status(status)) => Ok(status),
                _ => Ok(OutputStatus::TryAgainLater),
            },
            Some(Pending::Chunk { .. }) => {
                let Some(index) = self.pool.iter().position(Option::is_none) else {
                    return Ok(OutputStatus::TryAgainLater);
                };
                let Some(Pending::Chunk { data, flags, pts_us }) = self.pending.pop_front() else {
                    return Ok(OutputStatus::TryAgainLater);
                };
                let info = BufferInfo {
                    offset: 0,
                    size: data.len(),
                    presentation_time_us: pts_us,
                    flags,
                };
                self.pool[index] = Some(data);
                self.probe.borrow_mut().dequeued += 1;
                Ok(OutputStatus::Buffer { index, info })
            }
        }
    }

    fn output_format(&self) -> Option<TrackFormat> {
        if self.format_emitted {
            self.format.clone()
        } else {
            None
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], ReelError> {
        self.pool
            .get(index)
            .and_then(|slot| slot.as_deref())
            .ok_or_else(|| ReelError::EncodingError(format!("Buffer {} is not dequeued", index)))
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), ReelError> {
        match self.pool.get_mut(index).and_then(Option::take) {
            Some(_) => {
                self.probe.borrow_mut().released += 1;
                Ok(())
            }
            None => Err(ReelError::EncodingError(format!(
                "Buffer {} released twice",
                index
            ))),
        }
    }

    fn stop(&mut self) -> Result<(), ReelError> {
        self.probe.borrow_mut().stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.probe.borrow_mut().released_encoder = true;
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Window and fade one segment was started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRecord {
    pub start_time_us: i64,
    pub end_time_us: i64,
    pub fade_duration_us: i64,
}

#[derive(Debug, Default)]
pub struct AudioProbe {
    pub segments: Vec<SegmentRecord>,
    pub track: Option<TrackHandle>,
    pub encode_calls: u64,
    pub samples_written: u64,
    pub started: bool,
    pub stopped: bool,
}

/// Music encoder that writes one fixed-length sample per `encode` step.
pub struct ScriptedAudio {
    probe: Rc<RefCell<AudioProbe>>,
    step_us: i64,
    source_duration_us: Option<i64>,
    fail_start: bool,
    start_time_us: i64,
    end_time_us: i64,
    fade_duration_us: i64,
    track: Option<TrackHandle>,
    listener: Option<Sender<SegmentDecoded>>,
    position_us: i64,
    pts_us: i64,
    segments_decoded: usize,
    awaiting_restart: bool,
    done: bool,
}

impl ScriptedAudio {
    /// `step_us` of audio is produced by every `encode` call.
    pub fn new(step_us: i64) -> Self {
        Self {
            probe: Rc::new(RefCell::new(AudioProbe::default())),
            step_us: step_us.max(1),
            source_duration_us: None,
            fail_start: false,
            start_time_us: 0,
            end_time_us: 0,
            fade_duration_us: 0,
            track: None,
            listener: None,
            position_us: 0,
            pts_us: 0,
            segments_decoded: 0,
            awaiting_restart: false,
            done: false,
        }
    }

    pub fn with_source_duration_us(mut self, duration_us: i64) -> Self {
        self.source_duration_us = Some(duration_us);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn probe(&self) -> Rc<RefCell<AudioProbe>> {
        Rc::clone(&self.probe)
    }

    fn begin_segment(&mut self) {
        self.position_us = self.start_time_us;
        self.awaiting_restart = false;
        self.probe.borrow_mut().segments.push(SegmentRecord {
            start_time_us: self.start_time_us,
            end_time_us: self.end_time_us,
            fade_duration_us: self.fade_duration_us,
        });
    }
}

impl AudioTrackEncoder for ScriptedAudio {
    fn start(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError> {
        if self.fail_start {
            return Err(ReelError::AudioError("Music source unreadable".to_string()));
        }
        let track = writer.add_track(&TrackFormat::Audio(AudioTrackFormat {
            codec: AudioCodecKind::Opus,
            sample_rate: 48_000,
            channels: 2,
        }))?;
        self.track = Some(track);
        {
            let mut probe = self.probe.borrow_mut();
            probe.track = Some(track);
            probe.started = true;
        }
        self.begin_segment();
        Ok(())
    }

    fn encode(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError> {
        self.probe.borrow_mut().encode_calls += 1;
        if self.done {
            return Ok(());
        }
        if self.awaiting_restart {
            // no new window was configured: this was the last segment
            self.done = true;
            return Ok(());
        }
        let track = self
            .track
            .ok_or_else(|| ReelError::AudioError("Audio encoder not started".to_string()))?;

        let step = self.step_us.min(self.end_time_us - self.position_us);
        if step > 0 {
            let payload = [0xFCu8; 8];
            let info = BufferInfo {
                offset: 0,
                size: payload.len(),
                presentation_time_us: self.pts_us,
                flags: ChunkFlags::default(),
            };
            writer.write_sample(track, &payload, &info)?;
            self.position_us += step;
            self.pts_us += step;
            self.probe.borrow_mut().samples_written += 1;
        }

        if self.position_us >= self.end_time_us {
            self.awaiting_restart = true;
            let segment = self.segments_decoded;
            self.segments_decoded += 1;
            if let Some(listener) = &self.listener {
                let _ = listener.send(SegmentDecoded { segment });
            }
        }
        Ok(())
    }

    fn is_encoding_done(&self) -> bool {
        self.done
    }

    fn set_start_time_us(&mut self, start_time_us: i64) {
        self.start_time_us = start_time_us;
    }

    fn set_end_time_us(&mut self, end_time_us: i64) {
        self.end_time_us = end_time_us;
    }

    fn set_fade_duration_us(&mut self, fade_duration_us: i64) {
        self.fade_duration_us = fade_duration_us;
    }

    fn restart_input_decoding(&mut self) -> Result<(), ReelError> {
        if self.track.is_none() {
            return Err(ReelError::InvalidState("Audio encoder not started".to_string()));
        }
        self.begin_segment();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ReelError> {
        self.probe.borrow_mut().stopped = true;
        Ok(())
    }

    fn set_decoding_done_listener(&mut self, listener: Sender<SegmentDecoded>) {
        self.listener = Some(listener);
    }

    fn source_duration_us(&self) -> Option<i64> {
        self.source_duration_us
    }
}
