//! H.264 encoder backend using openh264
//!
//! openh264 encodes synchronously, one access unit per input frame. This
//! backend puts that output behind the asynchronous buffer-queue contract:
//! encoded data waits in a pending queue until a slot of the fixed output
//! pool is free, and a slot stays taken until the caller releases it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use super::backend::{BufferInfo, ChunkFlags, EncoderBackend, EncoderSettings, OutputStatus};
use super::codec::{EncoderCapabilities, Profile, ProfileLevel};
use super::config::VideoCodecKind;
use super::container::{TrackFormat, VideoTrackFormat};
use super::nal;
use crate::errors::ReelError;

/// Output slots handed out before the caller must release one
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Fixed-size canvas every submitted image is drawn onto.
///
/// Images larger than the canvas are cropped, smaller ones leave the rest black.
pub struct InputSurface {
    canvas: RgbImage,
}

impl InputSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbImage::new(width, height),
        }
    }

    pub fn draw(&mut self, image: &RgbImage) {
        if image.dimensions() == self.canvas.dimensions() {
            self.canvas.copy_from_slice(image.as_raw());
            return;
        }
        for pixel in self.canvas.pixels_mut() {
            pixel.0 = [0, 0, 0];
        }
        imageops::replace(&mut self.canvas, image, 0, 0);
    }

    pub fn to_yuv420(&self) -> Vec<u8> {
        rgb_to_yuv420(self.canvas.as_raw(), self.canvas.width(), self.canvas.height())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }
}

enum Pending {
    FormatChanged,
    Chunk {
        data: Vec<u8>,
        flags: ChunkFlags,
        pts_us: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
    Released,
}

/// openh264 behind the [`EncoderBackend`] contract
pub struct H264Backend {
    encoder: Option<Encoder>,
    surface: Option<InputSurface>,
    settings: Option<EncoderSettings>,
    state: BackendState,
    pool: Vec<Option<Vec<u8>>>,
    pending: VecDeque<Pending>,
    format: Option<TrackFormat>,
    clock: Option<Instant>,
    frames_encoded: u64,
    end_of_input: bool,
}

impl H264Backend {
    pub fn new() -> Self {
        Self::with_pool_size(DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(slots: usize) -> Self {
        Self {
            encoder: None,
            surface: None,
            settings: None,
            state: BackendState::Unconfigured,
            pool: vec![None; slots.max(1)],
            pending: VecDeque::new(),
            format: None,
            clock: None,
            frames_encoded: 0,
            end_of_input: false,
        }
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    fn wall_clock_us(&self) -> i64 {
        self.clock
            .map(|start| start.elapsed().as_micros() as i64)
            .unwrap_or(0)
    }

    fn accept_access_unit(&mut self, data: Vec<u8>, key_frame: bool) -> Result<(), ReelError> {
        let pts_us = self.wall_clock_us();

        if self.format.is_none() {
            let (codec_data, picture) = nal::split_parameter_sets(&data);
            if codec_data.is_empty() {
                return Err(ReelError::EncodingError(
                    "First access unit carries no SPS/PPS".to_string(),
                ));
            }
            let settings = self
                .settings
                .as_ref()
                .ok_or_else(|| ReelError::EncodingError("Encoder not configured".to_string()))?;
            self.format = Some(TrackFormat::Video(VideoTrackFormat {
                codec: VideoCodecKind::Avc,
                width: settings.width,
                height: settings.height,
                frame_rate: settings.frame_rate,
                bitrate: settings.bitrate,
                codec_data: codec_data.clone(),
            }));

            self.pending.push_back(Pending::FormatChanged);
            self.pending.push_back(Pending::Chunk {
                data: codec_data,
                flags: ChunkFlags {
                    codec_config: true,
                    ..ChunkFlags::default()
                },
                pts_us,
            });
            self.pending.push_back(Pending::Chunk {
                data: picture,
                flags: ChunkFlags {
                    key_frame: true,
                    ..ChunkFlags::default()
                },
                pts_us,
            });
            return Ok(());
        }

        self.pending.push_back(Pending::Chunk {
            data,
            flags: ChunkFlags {
                key_frame,
                ..ChunkFlags::default()
            },
            pts_us,
        });
        Ok(())
    }
}

impl Default for H264Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for H264Backend {
    fn capabilities(&self) -> Vec<EncoderCapabilities> {
        vec![EncoderCapabilities {
            codec: VideoCodecKind::Avc,
            name: "openh264".to_string(),
            hardware_accelerated: false,
            profile_levels: [30, 31, 32, 40, 41, 42, 50, 51, 52]
                .into_iter()
                .map(|level| ProfileLevel {
                    profile: Profile::ConstrainedBaseline,
                    level,
                })
                .collect(),
            bitrate_range: 64_000..=40_000_000,
        }]
    }

    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), ReelError> {
        if settings.codec != VideoCodecKind::Avc {
            return Err(ReelError::EncodingError(format!(
                "No encoder available for {} ({})",
                settings.codec,
                settings.codec.mime_type()
            )));
        }
        if settings.width == 0 || settings.height == 0 || settings.width % 2 != 0 || settings.height % 2 != 0 {
            return Err(ReelError::EncodingError(format!(
                "Frame size {}x{} must be non-zero and even",
                settings.width, settings.height
            )));
        }

        // openh264 picks up dimensions from the YUV source; bitrate and
        // frame rate are rate-control hints
        let encoder = Encoder::new()
            .map_err(|e| ReelError::EncodingError(format!("Failed to create encoder: {}", e)))?;

        log::debug!(
            "openh264 configured {}x{}, profile {:?} level {:?}, key frame every {} frames",
            settings.width,
            settings.height,
            settings.profile,
            settings.level,
            settings.key_frame_period
        );
        self.encoder = Some(encoder);
        self.surface = Some(InputSurface::new(settings.width, settings.height));
        self.settings = Some(settings.clone());
        self.state = BackendState::Configured;
        Ok(())
    }

    fn start(&mut self) -> Result<(), ReelError> {
        if self.state != BackendState::Configured {
            return Err(ReelError::EncodingError(format!(
                "Encoder cannot start from {:?}",
                self.state
            )));
        }
        self.clock = Some(Instant::now());
        self.state = BackendState::Running;
        Ok(())
    }

    fn queue_frame(&mut self, image: &RgbImage) -> Result<(), ReelError> {
        if self.state != BackendState::Running || self.end_of_input {
            return Err(ReelError::EncodingError(
                "Encoder is not accepting input".to_string(),
            ));
        }
        let period = self
            .settings
            .as_ref()
            .map(|s| s.key_frame_period)
            .unwrap_or(1);
        let (surface, encoder) = match (self.surface.as_mut(), self.encoder.as_mut()) {
            (Some(surface), Some(encoder)) => (surface, encoder),
            _ => return Err(ReelError::EncodingError("Encoder released".to_string())),
        };

        surface.draw(image);
        let (width, height) = surface.dimensions();
        let yuv = YUVBuffer::from_vec(surface.to_yuv420(), width as usize, height as usize);

        if self.frames_encoded > 0 && self.frames_encoded % period == 0 {
            encoder.force_intra_frame();
        }
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| ReelError::EncodingError(format!("Encoding failed: {}", e)))?;
        let key_frame = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();
        self.frames_encoded += 1;

        if data.is_empty() {
            // rate control skipped the frame
            log::debug!("Encoder skipped frame {}", self.frames_encoded - 1);
            return Ok(());
        }
        self.accept_access_unit(data, key_frame)
    }

    fn signal_end_of_input(&mut self) -> Result<(), ReelError> {
        if self.end_of_input {
            return Ok(());
        }
        self.end_of_input = true;
        let pts_us = self.wall_clock_us();
        self.pending.push_back(Pending::Chunk {
            data: Vec::new(),
            flags: ChunkFlags {
                end_of_stream: true,
                ..ChunkFlags::default()
            },
            pts_us,
        });
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus, ReelError> {
        let Some(front) = self.pending.front() else {
            // synchronous encoder: nothing will appear while we wait
            if self.end_of_input {
                std::thread::sleep(timeout);
            }
            return Ok(OutputStatus::TryAgainLater);
        };

        if matches!(front, Pending::FormatChanged) {
            self.pending.pop_front();
            return Ok(OutputStatus::FormatChanged);
        }

        let Some(index) = self.pool.iter().position(Option::is_none) else {
            return Ok(OutputStatus::TryAgainLater);
        };
        match self.pending.pop_front() {
            Some(Pending::Chunk { data, flags, pts_us }) => {
                let info = BufferInfo {
                    offset: 0,
                    size: data.len(),
                    presentation_time_us: pts_us,
                    flags,
                };
                self.pool[index] = Some(data);
                Ok(OutputStatus::Buffer { index, info })
            }
            _ => Ok(OutputStatus::TryAgainLater),
        }
    }

    fn output_format(&self) -> Option<TrackFormat> {
        self.format.clone()
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], ReelError> {
        self.pool
            .get(index)
            .and_then(|slot| slot.as_deref())
            .ok_or_else(|| ReelError::EncodingError(format!("Output buffer {} is not held", index)))
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<(), ReelError> {
        match self.pool.get_mut(index).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(ReelError::EncodingError(format!(
                "Output buffer {} is not held",
                index
            ))),
        }
    }

    fn stop(&mut self) -> Result<(), ReelError> {
        if self.state == BackendState::Running {
            self.state = BackendState::Stopped;
        }
        self.pending.clear();
        Ok(())
    }

    fn release(&mut self) {
        if self.state == BackendState::Released {
            return;
        }
        self.state = BackendState::Released;
        self.encoder = None;
        self.surface = None;
        self.pending.clear();
        for slot in self.pool.iter_mut() {
            *slot = None;
        }
        log::debug!("openh264 encoder released after {} frames", self.frames_encoded);
    }
}

/// Convert RGB24 to YUV420 planar format (BT.601)
pub(crate) fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for (row, line) in rgb.chunks_exact(w * 3).take(h).enumerate() {
        for (col, px) in line.chunks_exact(3).enumerate() {
            let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[row * w + col] = y_val.clamp(0, 255) as u8;

            // top-left pixel of each 2x2 block carries the chroma
            if row % 2 == 0 && col % 2 == 0 && col / 2 < w / 2 && row / 2 < h / 2 {
                let uv_idx = (row / 2) * (w / 2) + (col / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}
