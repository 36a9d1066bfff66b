//! Opus audio encoder
//!
//! # Spell: AudioEncodeOpus
//! ^ Intent: encode 48 kHz PCM into raw Opus packets for the MP4 audio track
//!
//! @OpusEncoder
//!
//! - pcm_samples -> opus_packet
//! - accepts_f32_pcm
//! - operates_at_48khz
//! - timestamps_continue_across_calls
//! - partial_frame_is_dropped_not_padded
//! - no hidden_resampling
//! - no changing_channel_count

use crate::errors::ReelError;

/// Opus frame size in samples at 48kHz (20 ms).
pub const OPUS_FRAME_SAMPLES: usize = 960;

pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// OPUS_APPLICATION_AUDIO: tuned for music
const OPUS_APPLICATION_AUDIO: i32 = 2049;

const MAX_PACKET_BYTES: usize = 4000;

/// One encoded Opus packet
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub data: Vec<u8>,
    /// Presentation time in microseconds since the first sample
    pub timestamp_us: i64,
    pub duration_us: i64,
}

/// PCM to Opus, 20 ms at a time.
///
/// The libopus state is owned exclusively; the type is neither `Clone` nor `Sync`.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    /// Samples waiting for a complete frame
    sample_buffer: Vec<f32>,
    /// Sample frames encoded so far, the timestamp source
    frames_encoded: u64,
}

// SAFETY: the libopus encoder is only touched through &mut self, never shared.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    /// `channels` must be 1 or 2; `bitrate` is in bits per second.
    pub fn new(channels: u16, bitrate: u32) -> Result<Self, ReelError> {
        if channels != 1 && channels != 2 {
            return Err(ReelError::AudioError(
                "Opus supports only mono (1) or stereo (2) channels".to_string(),
            ));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                OPUS_SAMPLE_RATE as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(ReelError::AudioError(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(ReelError::AudioError(format!(
                "Failed to set Opus bitrate: error code {}",
                result
            )));
        }

        Ok(Self {
            encoder,
            channels,
            sample_buffer: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
            frames_encoded: 0,
        })
    }

    /// Buffer interleaved samples and encode every complete frame.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Vec<EncodedAudio>, ReelError> {
        self.sample_buffer.extend_from_slice(samples);

        let samples_per_frame = OPUS_FRAME_SAMPLES * self.channels as usize;
        let frame_duration_us = (OPUS_FRAME_SAMPLES as i64 * 1_000_000) / OPUS_SAMPLE_RATE as i64;
        let mut packets = Vec::new();

        while self.sample_buffer.len() >= samples_per_frame {
            let frame: Vec<f32> = self.sample_buffer.drain(..samples_per_frame).collect();

            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    frame.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            if len < 0 {
                return Err(ReelError::AudioError(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }
            output.truncate(len as usize);

            let timestamp_us =
                (self.frames_encoded as i64 * 1_000_000) / OPUS_SAMPLE_RATE as i64;
            packets.push(EncodedAudio {
                data: output,
                timestamp_us,
                duration_us: frame_duration_us,
            });
            self.frames_encoded += OPUS_FRAME_SAMPLES as u64;
        }

        Ok(packets)
    }

    /// Drop samples that do not fill a frame; returns how many sample frames were dropped.
    ///
    /// Padding them out would make the audio track outlast the video.
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.sample_buffer.len() / self.channels as usize;
        self.sample_buffer.clear();
        dropped
    }

    /// Sample frames waiting for a complete Opus frame
    pub fn pending_frames(&self) -> usize {
        self.sample_buffer.len() / self.channels as usize
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe {
                libopus_sys::opus_encoder_destroy(self.encoder);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        assert!(OpusEncoder::new(2, 128_000).is_ok());
    }

    #[test]
    fn test_encoder_rejects_wrong_channels() {
        assert!(OpusEncoder::new(5, 128_000).is_err());
    }

    #[test]
    fn test_encode_full_frame() {
        let mut encoder = OpusEncoder::new(2, 128_000).unwrap();
        let packets = encoder.encode(&vec![0.0f32; OPUS_FRAME_SAMPLES * 2]).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].data.is_empty());
        assert_eq!(packets[0].duration_us, 20_000);
    }

    #[test]
    fn test_timestamps_continue_across_calls() {
        let mut encoder = OpusEncoder::new(1, 96_000).unwrap();
        let first = encoder.encode(&vec![0.0f32; OPUS_FRAME_SAMPLES + 100]).unwrap();
        let second = encoder.encode(&vec![0.0f32; OPUS_FRAME_SAMPLES]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].timestamp_us, 0);
        assert_eq!(second[0].timestamp_us, 20_000);
        assert_eq!(encoder.pending_frames(), 100);
    }

    #[test]
    fn test_partial_frame_is_discarded() {
        let mut encoder = OpusEncoder::new(2, 128_000).unwrap();
        assert!(encoder.encode(&[0.0f32; 100]).unwrap().is_empty());
        assert_eq!(encoder.discard_partial(), 50);
        assert_eq!(encoder.pending_frames(), 0);
        assert_eq!(encoder.frames_encoded(), 0);
    }
}
