//! Synthetic slideshow data
//!
//! Deterministic images and sample buffers so the pipeline can be driven
//! offline, without real photos or music files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::{Rgb, RgbImage};

use crate::recording::{TrackFormat, VideoCodecKind, VideoTrackFormat};

/// A gradient image that shifts with `frame_number`.
///
/// Every frame differs from its neighbours so temporal prediction in the
/// encoder has something to do.
pub fn synthetic_image(frame_number: u64, width: u32, height: u32) -> RgbImage {
    let base = (frame_number % 256) as u8;
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            base.wrapping_add((x % 256) as u8),
            base.wrapping_add((y % 256) as u8),
            base.wrapping_add(((x + y) % 256) as u8),
        ])
    })
}

/// A flat image of one colour, the usual shape of a title card.
pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(rgb))
}

/// H.264 track format with a fake but well-formed SPS/PPS pair.
pub fn synthetic_video_format(width: u32, height: u32, frame_rate: f64) -> TrackFormat {
    TrackFormat::Video(VideoTrackFormat {
        codec: VideoCodecKind::Avc,
        width,
        height,
        frame_rate,
        bitrate: 3_000_000,
        codec_data: synthetic_parameter_sets(),
    })
}

/// Annex B SPS followed by PPS.
pub fn synthetic_parameter_sets() -> Vec<u8> {
    vec![
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, // SPS
        0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
    ]
}

/// Annex B access unit holding one slice NAL of the given type (5 = IDR, 1 = non-IDR).
pub fn synthetic_slice(nal_type: u8, payload_len: usize, fill: u8) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x01, 0x60 | (nal_type & 0x1F)];
    data.extend(std::iter::repeat(fill).take(payload_len));
    data
}

/// Interleaved 440 Hz sine, `frames` sample frames long.
pub fn synthetic_sine(frames: usize, sample_rate: u32, channels: usize) -> Vec<f32> {
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = i as f64 / sample_rate as f64;
        let value = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.5;
        samples.extend(std::iter::repeat(value).take(channels));
    }
    samples
}

/// Write interleaved samples as a 16-bit PCM WAV file.
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    samples: &[f32],
) -> std::io::Result<()> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = BufWriter::new(File::create(path)?);

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_len).to_le_bytes())?;
    out.write_all(b"WAVEfmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&(sample_rate * block_align as u32).to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&16u16.to_le_bytes())?;
    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()
}
