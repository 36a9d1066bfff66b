//! Slideshow recording pipeline
//!
//! Images go through an encoder backend, the drain engine pulls compressed
//! chunks out, the frame muxer stamps them and hands them to a container
//! writer. The recorder drives all of it and interleaves the music track.
//!
//! Concrete collaborators:
//! - openh264 for H.264 encoding (`recording` feature)
//! - muxide for MP4 muxing (`recording` feature)
//!
//! # Example
//! ```rust,ignore
//! use framereel::recording::{Recorder, VideoConfig};
//!
//! let config = VideoConfig::new("slideshow.mp4", 1280, 720).with_frame_rate(30.0);
//! let mut recorder = Recorder::create_mp4(config, 6.0)?;
//! recorder.start()?;
//! for image in &images {
//!     recorder.record(image)?;
//! }
//! let stats = recorder.stop()?;
//! ```

mod audio_track;
mod backend;
mod codec;
mod config;
mod container;
mod drain;
mod loop_plan;
mod muxer;
pub mod nal;
mod recorder;

#[cfg(feature = "recording")]
mod encoder;
#[cfg(feature = "recording")]
mod mp4;

pub use audio_track::{AudioTrackEncoder, SegmentDecoded};
pub use backend::{BufferInfo, ChunkFlags, EncodedChunk, EncoderBackend, EncoderSettings, OutputStatus};
pub use codec::{select_codec_params, CodecParams, EncoderCapabilities, Profile, ProfileLevel};
pub use config::{RecordingQuality, RecordingStats, VideoCodecKind, VideoConfig};
pub use container::{
    AudioCodecKind, AudioTrackFormat, ContainerStats, ContainerWriter, TrackFormat, TrackHandle,
    VideoTrackFormat,
};
pub use drain::{DrainStats, MuxerListener, NoopListener, VideoEncoder, DEFAULT_DRAIN_TIMEOUT};
pub use loop_plan::{AudioLoopPlan, AudioSegmentParams};
pub use muxer::{FrameMuxer, MuxerState};
pub use recorder::{Recorder, RecorderState, DEFAULT_AUDIO_STEPS_PER_FRAME};

#[cfg(feature = "recording")]
pub use encoder::{H264Backend, InputSurface};
#[cfg(feature = "recording")]
pub use mp4::Mp4ContainerWriter;

#[cfg(test)]
mod tests;
