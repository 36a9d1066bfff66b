//! Encoder backend contract
//!
//! Models an asynchronous hardware video encoder: frames go in through an
//! input surface, compressed output comes back through a fixed pool of
//! index-addressed output buffers that the caller must hand back.

use std::time::Duration;

use image::RgbImage;

use super::codec::{EncoderCapabilities, Profile};
use super::config::VideoCodecKind;
use super::container::TrackFormat;
use crate::errors::ReelError;

/// Flags carried by one output buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkFlags {
    /// Codec-specific data (parameter sets), not a picture
    pub codec_config: bool,
    /// Last buffer the encoder will ever produce
    pub end_of_stream: bool,
    pub key_frame: bool,
}

/// Byte range, timestamp and flags of one buffer.
///
/// Used both for encoder output and for samples handed to a container writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: ChunkFlags,
}

impl BufferInfo {
    /// The valid bytes of `buffer` described by this info.
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> Result<&'a [u8], ReelError> {
        let end = self
            .offset
            .checked_add(self.size)
            .filter(|end| *end <= buffer.len())
            .ok_or_else(|| {
                ReelError::MuxingError(format!(
                    "Sample range {}..{} exceeds buffer of {} bytes",
                    self.offset,
                    self.offset.saturating_add(self.size),
                    buffer.len()
                ))
            })?;
        Ok(&buffer[self.offset..end])
    }
}

/// One compressed chunk on loan from the encoder's buffer pool
#[derive(Debug)]
pub struct EncodedChunk<'a> {
    pub data: &'a [u8],
    pub info: BufferInfo,
}

/// Result of polling the encoder's output queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing ready within the timeout
    TryAgainLater,
    /// The output format is now known; read it with `output_format()`
    FormatChanged,
    /// The output buffer set was reallocated
    BuffersChanged,
    /// Any other informational status
    Advisory(i32),
    /// Buffer `index` holds a chunk and must be released after use
    Buffer { index: usize, info: BufferInfo },
}

/// Encoder configuration derived from a `VideoConfig`
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub codec: VideoCodecKind,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub frame_rate: f64,
    pub key_frame_period: u64,
    pub profile: Option<Profile>,
    pub level: Option<u32>,
}

/// An asynchronous video encoder driven by the drain engine.
pub trait EncoderBackend {
    /// Encoders this backend can instantiate
    fn capabilities(&self) -> Vec<EncoderCapabilities>;

    /// Accept the configuration. Fails if no encoder exists for the codec.
    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), ReelError>;

    fn start(&mut self) -> Result<(), ReelError>;

    /// Render one image onto the input surface and submit it.
    fn queue_frame(&mut self, image: &RgbImage) -> Result<(), ReelError>;

    fn signal_end_of_input(&mut self) -> Result<(), ReelError>;

    /// Poll the output queue, waiting at most `timeout`.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus, ReelError>;

    /// Negotiated output format, available once `FormatChanged` was reported
    fn output_format(&self) -> Option<TrackFormat>;

    /// Contents of a dequeued buffer that has not been released yet
    fn output_buffer(&self, index: usize) -> Result<&[u8], ReelError>;

    /// Hand a dequeued buffer back to the pool.
    fn release_output_buffer(&mut self, index: usize) -> Result<(), ReelError>;

    fn stop(&mut self) -> Result<(), ReelError>;

    /// Free the encoder and its input surface. Must tolerate repeated calls.
    fn release(&mut self);
}
