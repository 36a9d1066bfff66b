//! Testing utilities for framereel
//!
//! Synthetic images and audio plus scripted collaborators, so the whole
//! pipeline can be exercised without an encoder, a file system or music.

pub mod fakes;
pub mod synthetic_data;

pub use fakes::{
    AudioProbe, ContainerEvent, ContainerLog, EncoderProbe, MemoryContainer, RecordedSample,
    ScriptedAudio, ScriptedEncoder, SegmentRecord,
};
pub use synthetic_data::{
    solid_image, synthetic_image, synthetic_parameter_sets, synthetic_sine, synthetic_slice,
    synthetic_video_format, write_wav,
};
