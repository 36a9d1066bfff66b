//! Frame muxer
//!
//! Owns the container writer for one recording session. The video track is
//! registered when the encoder reports its output format; from then on every
//! chunk gets a presentation timestamp derived from its position in the
//! stream, never from the encoder.

use super::backend::EncodedChunk;
use super::container::{ContainerStats, ContainerWriter, TrackFormat, TrackHandle};
use crate::assert_invariant;
use crate::errors::ReelError;

const INVARIANT_START_ONCE: &str = "Frame muxer must be started only once";
const INVARIANT_WRITE_AFTER_START: &str = "Video samples must not be written before the muxer starts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    NotStarted,
    Started,
    Stopped,
    Released,
}

pub struct FrameMuxer<W: ContainerWriter> {
    writer: W,
    state: MuxerState,
    video_track: Option<TrackHandle>,
    frame_rate: f64,
    frame_index: u64,
}

impl<W: ContainerWriter> FrameMuxer<W> {
    pub fn new(writer: W, frame_rate: f64) -> Self {
        Self {
            writer,
            state: MuxerState::NotStarted,
            video_track: None,
            frame_rate,
            frame_index: 0,
        }
    }

    /// Register the video track with the encoder's output format and open the session.
    ///
    /// # Panics
    /// Panics if the muxer was already started.
    pub fn start(&mut self, format: &TrackFormat) -> Result<(), ReelError> {
        assert_invariant!(
            self.state == MuxerState::NotStarted,
            INVARIANT_START_ONCE,
            "FrameMuxer::start"
        );

        let track = self.writer.add_track(format)?;
        self.writer.start()?;
        self.video_track = Some(track);
        self.state = MuxerState::Started;
        log::info!("Muxer started, video track {:?}", track);
        Ok(())
    }

    /// Stamp the chunk with the next frame's presentation time and write it.
    ///
    /// # Panics
    /// Panics if the muxer has not been started.
    pub fn write_video_chunk(&mut self, chunk: &mut EncodedChunk<'_>) -> Result<(), ReelError> {
        assert_invariant!(
            self.state == MuxerState::Started,
            INVARIANT_WRITE_AFTER_START,
            "FrameMuxer::write_video_chunk"
        );
        let track = self.video_track.ok_or_else(|| {
            ReelError::MuxingError("Started muxer has no video track".to_string())
        })?;

        chunk.info.presentation_time_us = self.presentation_time_us(self.frame_index);
        self.frame_index += 1;

        self.writer.write_sample(track, chunk.data, &chunk.info)
    }

    /// Presentation time of frame `index`: `index * 1e6 / frame_rate`, rounded to whole microseconds.
    pub fn presentation_time_us(&self, index: u64) -> i64 {
        (index as f64 * 1_000_000.0 / self.frame_rate).round() as i64
    }

    /// Span covered by the frames written so far.
    pub fn track_duration_us(&self) -> i64 {
        self.presentation_time_us(self.frame_index)
    }

    pub fn frames_written(&self) -> u64 {
        self.frame_index
    }

    pub fn is_started(&self) -> bool {
        self.state == MuxerState::Started
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    /// Writer access for the audio track. The writer itself rejects
    /// samples while the session is not running.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Finalize the container. Returns `None` when the session never started.
    pub fn stop(&mut self) -> Result<Option<ContainerStats>, ReelError> {
        if self.state != MuxerState::Started {
            return Ok(None);
        }
        self.state = MuxerState::Stopped;
        let stats = self.writer.stop()?;
        log::info!(
            "Muxer stopped after {} video frames ({:.3}s)",
            self.frame_index,
            self.track_duration_us() as f64 / 1_000_000.0
        );
        Ok(Some(stats))
    }

    /// Free the writer. Safe without a prior `start` and on repeated calls.
    pub fn release(&mut self) {
        if self.state == MuxerState::Released {
            return;
        }
        self.state = MuxerState::Released;
        self.writer.release();
    }
}
