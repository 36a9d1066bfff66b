//! framereel: turn a sequence of still images into an MP4 video
//!
//! Images are pushed through an asynchronous encoder, the compressed chunks
//! are stamped with frame-rate based presentation times and written into a
//! container. An optional music clip is looped over the whole video, each
//! loop fading out at its end.
//!
//! # Features
//! - `recording` (default): H.264 encoding with openh264, MP4 muxing with muxide
//! - `audio`: music decoding with symphonia and Opus encoding with libopus
//! - `full-recording`: both of the above
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! framereel = { version = "0.1", features = ["full-recording"] }
//! ```
//!
//! Then:
//! ```rust,ignore
//! use framereel::{Recorder, VideoConfig};
//!
//! let config = VideoConfig::new("slideshow.mp4", 1280, 720).with_frame_rate(30.0);
//! let mut recorder = Recorder::create_mp4(config, 12.0)?;
//! recorder.set_music_file("song.mp3", 5.0, 0.5)?;
//! recorder.start()?;
//! for image in &images {
//!     recorder.record(image)?;
//! }
//! recorder.drain_remaining_audio()?;
//! let stats = recorder.stop()?;
//! ```
pub mod config;
pub mod errors;
pub mod invariant_ppt;
pub mod recording;

#[cfg(feature = "audio")]
pub mod audio;

// Testing utilities - synthetic data and scripted collaborators
pub mod testing;

// Re-exports for convenience
pub use config::FrameReelConfig;
pub use errors::ReelError;
pub use recording::{
    AudioLoopPlan, AudioTrackEncoder, ContainerWriter, EncoderBackend, Recorder, RecorderState,
    RecordingQuality, RecordingStats, VideoCodecKind, VideoConfig,
};

#[cfg(feature = "recording")]
pub use recording::{H264Backend, Mp4ContainerWriter};

#[cfg(feature = "audio")]
pub use audio::MusicEncoder;
