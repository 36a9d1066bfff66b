//! Container writer contract

use serde::{Deserialize, Serialize};

use super::backend::BufferInfo;
use super::config::VideoCodecKind;
use crate::errors::ReelError;

/// Handle returned by `add_track`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodecKind {
    Opus,
}

/// Negotiated video track format
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackFormat {
    pub codec: VideoCodecKind,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub bitrate: u32,
    /// Codec-specific data: SPS and PPS in Annex B form for H.264
    pub codec_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrackFormat {
    pub codec: AudioCodecKind,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackFormat {
    Video(VideoTrackFormat),
    Audio(AudioTrackFormat),
}

impl TrackFormat {
    pub fn is_video(&self) -> bool {
        matches!(self, TrackFormat::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, TrackFormat::Audio(_))
    }
}

/// Summary of a finalized container
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContainerStats {
    pub video_samples: u64,
    pub audio_samples: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
}

/// A single-session, append-only container writer.
///
/// Tracks are added before `start`, samples are written after it, `stop`
/// finalizes. `release` frees the writer and must be safe in any state.
pub trait ContainerWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackHandle, ReelError>;

    fn start(&mut self) -> Result<(), ReelError>;

    /// Write the bytes `info` selects out of `buffer`.
    fn write_sample(
        &mut self,
        track: TrackHandle,
        buffer: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ReelError>;

    fn stop(&mut self) -> Result<ContainerStats, ReelError>;

    fn release(&mut self);
}
