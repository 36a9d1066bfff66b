//! Audio collaborator contract
//!
//! The orchestrator never touches decoded or encoded audio itself. It drives
//! an [`AudioTrackEncoder`] that reads a music source over a time window,
//! encodes it and writes its own samples into the shared container.

use crossbeam_channel::Sender;

use super::container::ContainerWriter;
use crate::errors::ReelError;

/// Sent once per segment when the decoder has consumed its whole window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDecoded {
    /// Zero-based count of segments this encoder has decoded so far
    pub segment: usize,
}

/// Encodes one music source into the container's audio track, one segment at a time.
///
/// Call order: `set_*` for the first window, `start` (during the muxer's
/// pre-start notification, so the track can still be added), then `encode`
/// steps. When a segment finishes decoding the encoder sends
/// [`SegmentDecoded`]; the owner either reconfigures the window and calls
/// `restart_input_decoding`, or lets the encoder run dry.
pub trait AudioTrackEncoder {
    /// Open the source, add the audio track to `writer` and begin decoding the first window.
    fn start(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError>;

    /// One bounded unit of work: decode, encode and write whatever is ready.
    fn encode(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError>;

    /// True once the final segment has been fully encoded and written
    fn is_encoding_done(&self) -> bool;

    fn set_start_time_us(&mut self, start_time_us: i64);

    fn set_end_time_us(&mut self, end_time_us: i64);

    fn set_fade_duration_us(&mut self, fade_duration_us: i64);

    /// Decode the configured window again from the same source.
    fn restart_input_decoding(&mut self) -> Result<(), ReelError>;

    /// Stop and free decoder and encoder. Must be safe without `start`.
    fn stop(&mut self) -> Result<(), ReelError>;

    /// Register where segment completions are reported.
    fn set_decoding_done_listener(&mut self, listener: Sender<SegmentDecoded>);

    /// Length of the source, when the encoder knows it before `start`
    fn source_duration_us(&self) -> Option<i64> {
        None
    }
}
