//! Music track for slideshows
//!
//! This module turns a music file into the recording's audio track using:
//! - symphonia for decoding (MP3, AAC, FLAC, WAV, Vorbis)
//! - libopus for encoding
//!
//! Submodules:
//! - `decoder`: windowed file decoding
//! - `resampler`: conversion to 48 kHz
//! - `encoder`: Opus encoding
//! - `music`: the looping [`MusicEncoder`] the recorder drives

mod decoder;
mod encoder;
mod music;
mod resampler;

pub use decoder::{MusicDecoder, MusicInfo};
pub use encoder::{EncodedAudio, OpusEncoder, OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE};
pub use music::{fade_gain, MusicEncoder, DEFAULT_MUSIC_BITRATE};
pub use resampler::Resampler;
