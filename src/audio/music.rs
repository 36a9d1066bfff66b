//! Looping music track
//!
//! # Spell: MusicTrackEncode
//! ^ Intent: turn windows of a music file into a continuous Opus track that fades out at each window end
//!
//! @MusicEncoder
//!   : (music file, [window]) -> opus packets on one audio track
//!   ! packet timestamps continue across windows
//!   ! gain falls linearly to zero over the last fade_duration of each window
//!   ! one SegmentDecoded per window
//!   ! never writes past the last full Opus frame
//!   - mixing more than one source
//!   - crossfades between windows

use std::path::Path;

use crossbeam_channel::Sender;

use super::decoder::{MusicDecoder, MusicInfo};
use super::encoder::{OpusEncoder, OPUS_SAMPLE_RATE};
use super::resampler::Resampler;
use crate::errors::ReelError;
use crate::recording::{
    AudioCodecKind, AudioTrackEncoder, AudioTrackFormat, BufferInfo, ChunkFlags, ContainerWriter,
    SegmentDecoded, TrackFormat, TrackHandle,
};

pub const DEFAULT_MUSIC_BITRATE: u32 = 128_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MusicState {
    Idle,
    Decoding,
    AwaitingRestart,
    Done,
    Stopped,
}

/// Gain for output frame `frame` of a window `window_frames` long with a `fade_frames` fade-out.
pub fn fade_gain(frame: u64, window_frames: u64, fade_frames: u64) -> f32 {
    if fade_frames == 0 {
        return 1.0;
    }
    let fade_start = window_frames.saturating_sub(fade_frames);
    if frame < fade_start {
        return 1.0;
    }
    let remaining = window_frames.saturating_sub(frame);
    (remaining as f64 / fade_frames as f64).clamp(0.0, 1.0) as f32
}

fn us_to_frames(us: i64) -> u64 {
    (us.max(0) as f64 * OPUS_SAMPLE_RATE as f64 / 1_000_000.0).round() as u64
}

/// [`AudioTrackEncoder`] over a music file: symphonia decode, 48 kHz resample, fade, Opus.
pub struct MusicEncoder {
    decoder: MusicDecoder,
    info: MusicInfo,
    channels: u16,
    bitrate: u32,
    resampler: Resampler,
    opus: Option<OpusEncoder>,
    track: Option<TrackHandle>,
    listener: Option<Sender<SegmentDecoded>>,
    state: MusicState,
    start_time_us: i64,
    end_time_us: i64,
    fade_duration_us: i64,
    /// 48 kHz frames emitted in the current window
    window_position: u64,
    segments_decoded: usize,
    packets_written: u64,
}

impl MusicEncoder {
    /// Open `path` and read its properties; decoding starts with `start`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReelError> {
        let decoder = MusicDecoder::open(path)?;
        let info = decoder.info();
        let channels = info.channels.clamp(1, 2);

        Ok(Self {
            decoder,
            info,
            channels,
            bitrate: DEFAULT_MUSIC_BITRATE,
            resampler: Resampler::new(info.sample_rate, OPUS_SAMPLE_RATE, channels),
            opus: None,
            track: None,
            listener: None,
            state: MusicState::Idle,
            start_time_us: 0,
            end_time_us: info.duration_us.unwrap_or(0),
            fade_duration_us: 0,
            window_position: 0,
            segments_decoded: 0,
            packets_written: 0,
        })
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn info(&self) -> MusicInfo {
        self.info
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    fn begin_window(&mut self, restart: bool) -> Result<(), ReelError> {
        if restart && (self.start_time_us, self.end_time_us) == self.decoder.window_us() {
            self.decoder.restart()?;
        } else {
            self.decoder.start(self.start_time_us, self.end_time_us)?;
        }
        self.resampler.reset();
        self.window_position = 0;
        self.state = MusicState::Decoding;
        log::debug!(
            "Music window {}..{} us, fade {} us",
            self.start_time_us,
            self.end_time_us,
            self.fade_duration_us
        );
        Ok(())
    }

    /// Reduce to the output channel count: mono stays mono, anything wider keeps its first two channels.
    fn fit_channels(&self, samples: Vec<f32>) -> Vec<f32> {
        let source = self.info.channels.max(1) as usize;
        let target = self.channels as usize;
        if source == target {
            return samples;
        }
        samples
            .chunks_exact(source)
            .flat_map(|frame| frame[..target].iter().copied())
            .collect()
    }

    fn apply_fade(&mut self, samples: &mut [f32]) {
        let (start, end) = self.decoder.window_us();
        let window_frames = us_to_frames(end - start);
        let fade_frames = us_to_frames(self.fade_duration_us).min(window_frames);
        let channels = self.channels as usize;

        for frame in samples.chunks_exact_mut(channels) {
            let gain = fade_gain(self.window_position, window_frames, fade_frames);
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
            self.window_position += 1;
        }
    }

    fn write_packets(
        &mut self,
        writer: &mut dyn ContainerWriter,
        samples: &[f32],
    ) -> Result<(), ReelError> {
        let track = self
            .track
            .ok_or_else(|| ReelError::AudioError("Music track not started".to_string()))?;
        let opus = self
            .opus
            .as_mut()
            .ok_or_else(|| ReelError::AudioError("Music encoder not started".to_string()))?;

        for packet in opus.encode(samples)? {
            let info = BufferInfo {
                offset: 0,
                size: packet.data.len(),
                presentation_time_us: packet.timestamp_us,
                flags: ChunkFlags::default(),
            };
            writer.write_sample(track, &packet.data, &info)?;
            self.packets_written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(opus) = self.opus.as_mut() {
            let dropped = opus.discard_partial();
            if dropped > 0 {
                log::debug!("Dropped {} trailing music frames", dropped);
            }
        }
        self.state = MusicState::Done;
        log::info!("Music track done after {} packets", self.packets_written);
    }
}

impl AudioTrackEncoder for MusicEncoder {
    fn start(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError> {
        if self.state != MusicState::Idle {
            return Err(ReelError::InvalidState(
                "Music encoder already started".to_string(),
            ));
        }
        let track = writer.add_track(&TrackFormat::Audio(AudioTrackFormat {
            codec: AudioCodecKind::Opus,
            sample_rate: OPUS_SAMPLE_RATE,
            channels: self.channels,
        }))?;
        self.opus = Some(OpusEncoder::new(self.channels, self.bitrate)?);
        self.track = Some(track);
        log::info!(
            "Music track started: {} Hz {}ch source -> {} kbps Opus",
            self.info.sample_rate,
            self.info.channels,
            self.bitrate / 1000
        );
        self.begin_window(false)
    }

    fn encode(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError> {
        match self.state {
            MusicState::Idle | MusicState::Done | MusicState::Stopped => Ok(()),
            MusicState::AwaitingRestart => {
                // no new window was configured after the last one
                self.finish();
                Ok(())
            }
            MusicState::Decoding => match self.decoder.decode_next()? {
                Some(block) => {
                    let fitted = self.fit_channels(block);
                    let mut samples = self.resampler.process(&fitted);
                    self.apply_fade(&mut samples);
                    self.write_packets(writer, &samples)
                }
                None => {
                    self.state = MusicState::AwaitingRestart;
                    let segment = self.segments_decoded;
                    self.segments_decoded += 1;
                    if let Some(listener) = &self.listener {
                        if listener.send(SegmentDecoded { segment }).is_err() {
                            log::debug!("Segment listener is gone");
                        }
                    }
                    Ok(())
                }
            },
        }
    }

    fn is_encoding_done(&self) -> bool {
        self.state == MusicState::Done
    }

    fn set_start_time_us(&mut self, start_time_us: i64) {
        self.start_time_us = start_time_us;
    }

    fn set_end_time_us(&mut self, end_time_us: i64) {
        self.end_time_us = end_time_us;
    }

    fn set_fade_duration_us(&mut self, fade_duration_us: i64) {
        self.fade_duration_us = fade_duration_us.max(0);
    }

    fn restart_input_decoding(&mut self) -> Result<(), ReelError> {
        match self.state {
            MusicState::Decoding | MusicState::AwaitingRestart => self.begin_window(true),
            other => Err(ReelError::InvalidState(format!(
                "Cannot restart music decoding from {:?}",
                other
            ))),
        }
    }

    fn stop(&mut self) -> Result<(), ReelError> {
        if self.state == MusicState::Stopped {
            return Ok(());
        }
        self.state = MusicState::Stopped;
        self.opus = None;
        Ok(())
    }

    fn set_decoding_done_listener(&mut self, listener: Sender<SegmentDecoded>) {
        self.listener = Some(listener);
    }

    fn source_duration_us(&self) -> Option<i64> {
        self.info.duration_us
    }
}
