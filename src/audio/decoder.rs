//! Music file decoding via symphonia
//!
//! # Spell: MusicWindowDecode
//! ^ Intent: read one time window of a music file as interleaved f32, any number of times
//!
//! @MusicDecoder
//!   : (path, start_us, end_us) -> [f32 interleaved]
//!   ! window clamped to [0, duration]
//!   ! start > end is rejected
//!   ! restart replays the same window from the same source
//!   - resampling
//!   - channel mixing

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::errors::ReelError;

/// Properties of the opened music track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Length of the track, when the container reports it
    pub duration_us: Option<i64>,
}

/// Decodes a window of a music file, packet by packet.
pub struct MusicDecoder {
    path: PathBuf,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    info: MusicInfo,
    start_us: i64,
    end_us: i64,
    done: bool,
}

impl MusicDecoder {
    /// Probe the file and prepare a decoder for its first audio track.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReelError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            ReelError::IoError(format!("Failed to open music file {}: {}", path.display(), e))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| ReelError::AudioError(format!("Unsupported music format: {}", e)))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| ReelError::AudioError("No audio track in music file".to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| ReelError::AudioError("Music track has no sample rate".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| ReelError::AudioError("Music track has no channel layout".to_string()))?;
        let duration_us = params
            .n_frames
            .map(|frames| (frames as f64 * 1_000_000.0 / sample_rate as f64).round() as i64);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| ReelError::AudioError(format!("Unsupported music codec: {}", e)))?;

        log::debug!(
            "Opened music {}: {} Hz, {} channels, {:?} us",
            path.display(),
            sample_rate,
            channels,
            duration_us
        );

        Ok(Self {
            path,
            reader,
            decoder,
            track_id,
            time_base: params.time_base,
            info: MusicInfo {
                sample_rate,
                channels,
                duration_us,
            },
            start_us: 0,
            end_us: duration_us.unwrap_or(i64::MAX),
            done: true,
        })
    }

    pub fn info(&self) -> MusicInfo {
        self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current window after clamping
    pub fn window_us(&self) -> (i64, i64) {
        (self.start_us, self.end_us)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Position the decoder at `start_us` and decode up to `end_us`.
    pub fn start(&mut self, start_us: i64, end_us: i64) -> Result<(), ReelError> {
        let limit = self.info.duration_us.unwrap_or(i64::MAX);
        let start = start_us.clamp(0, limit);
        let end = end_us.clamp(0, limit);
        if start > end {
            return Err(ReelError::AudioError(format!(
                "Music window start {} us is after end {} us",
                start, end
            )));
        }
        self.start_us = start;
        self.end_us = end;
        self.rewind()
    }

    /// Decode the current window again.
    pub fn restart(&mut self) -> Result<(), ReelError> {
        self.rewind()
    }

    fn rewind(&mut self) -> Result<(), ReelError> {
        let seek_to = SeekTo::Time {
            time: Time::from(self.start_us as f64 / 1_000_000.0),
            track_id: Some(self.track_id),
        };
        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| ReelError::AudioError(format!("Failed to seek music: {}", e)))?;
        self.decoder.reset();
        self.done = self.start_us >= self.end_us;
        Ok(())
    }

    fn timestamp_us(&self, ts: u64) -> i64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                ((time.seconds as f64 + time.frac) * 1_000_000.0).round() as i64
            }
            None => (ts as f64 * 1_000_000.0 / self.info.sample_rate as f64).round() as i64,
        }
    }

    /// Next block of interleaved samples inside the window, `None` once the window is exhausted.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, ReelError> {
        while !self.done {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.done = true;
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.done = true;
                    break;
                }
                Err(e) => return Err(ReelError::AudioError(format!("Music read failed: {}", e))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let packet_start_us = self.timestamp_us(packet.ts());
            if packet_start_us >= self.end_us {
                self.done = true;
                break;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::warn!("Skipping corrupt music packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(ReelError::AudioError(format!("Music decode failed: {}", e))),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            let channels = spec.channels.count().max(1);
            let rate = spec.rate.max(1) as f64;
            let to_frames = |us: i64| ((us as f64) * rate / 1_000_000.0).round().max(0.0) as usize;

            let skip = to_frames(self.start_us - packet_start_us).min(frames);
            let keep_end = to_frames(self.end_us - packet_start_us).min(frames);
            if keep_end <= skip {
                continue;
            }
            if keep_end < frames {
                self.done = true;
            }
            let samples = &buffer.samples()[skip * channels..keep_end * channels];
            return Ok(Some(samples.to_vec()));
        }
        Ok(None)
    }
}
