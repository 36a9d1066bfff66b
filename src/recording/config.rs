//! Recording configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::codec::{select_codec_params, EncoderCapabilities};
use super::backend::EncoderSettings;

/// Video codecs a recording can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodecKind {
    H263,
    Avc,
    Hevc,
}

impl VideoCodecKind {
    /// MIME type used when describing the track
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodecKind::H263 => "video/3gpp",
            VideoCodecKind::Avc => "video/avc",
            VideoCodecKind::Hevc => "video/hevc",
        }
    }
}

impl std::fmt::Display for VideoCodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodecKind::H263 => write!(f, "H.263"),
            VideoCodecKind::Avc => write!(f, "H.264"),
            VideoCodecKind::Hevc => write!(f, "H.265"),
        }
    }
}

impl std::str::FromStr for VideoCodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h263" | "h.263" => Ok(VideoCodecKind::H263),
            "h264" | "h.264" | "avc" => Ok(VideoCodecKind::Avc),
            "h265" | "h.265" | "hevc" => Ok(VideoCodecKind::Hevc),
            _ => Err(format!("Unknown video codec: {}", s)),
        }
    }
}

/// Quality presets for slideshow output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingQuality {
    /// 720p, lower bitrate - previews and messaging apps
    Low,
    /// 1080p at the default bitrate
    Medium,
    /// 1080p with a generous bitrate
    High,
    /// Custom settings
    Custom,
}

impl RecordingQuality {
    /// Recommended bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        match self {
            RecordingQuality::Low => 1_500_000,
            RecordingQuality::Medium => 3_000_000,
            RecordingQuality::High => 8_000_000,
            RecordingQuality::Custom => 3_000_000,
        }
    }

    /// Recommended resolution (width, height)
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            RecordingQuality::Low => (1280, 720),
            RecordingQuality::Medium => (1920, 1080),
            RecordingQuality::High => (1920, 1080),
            RecordingQuality::Custom => (1280, 720),
        }
    }

    pub fn fps(&self) -> f64 {
        30.0
    }
}

impl Default for RecordingQuality {
    fn default() -> Self {
        RecordingQuality::Medium
    }
}

/// Description of the video to produce.
///
/// Built once by the caller and never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Output container path
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub codec: VideoCodecKind,
    /// Target bitrate in bits per second, clamped to the encoder's range at configure time
    pub bitrate: u32,
    /// Frames per second
    pub frame_rate: f64,
    /// Seconds between forced key frames
    pub key_frame_interval: f64,
    pub quality: RecordingQuality,
    /// Enable fast-start (moov before mdat)
    pub fast_start: bool,
    /// Optional title metadata
    pub title: Option<String>,
}

impl VideoConfig {
    pub fn new<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            width,
            height,
            codec: VideoCodecKind::Avc,
            bitrate: 3_000_000,
            frame_rate: 30.0,
            key_frame_interval: 1.0,
            quality: RecordingQuality::Custom,
            fast_start: true,
            title: None,
        }
    }

    /// Create configuration from a quality preset
    pub fn from_quality<P: AsRef<Path>>(path: P, quality: RecordingQuality) -> Self {
        let (width, height) = quality.resolution();
        Self {
            frame_rate: quality.fps(),
            bitrate: quality.bitrate(),
            quality,
            ..Self::new(path, width, height)
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_codec(mut self, codec: VideoCodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_key_frame_interval(mut self, seconds: f64) -> Self {
        self.key_frame_interval = seconds;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_fast_start(mut self, enabled: bool) -> Self {
        self.fast_start = enabled;
        self
    }

    /// Nominal duration of one frame in microseconds.
    pub fn frame_time_us(&self) -> f64 {
        1_000_000.0 / self.frame_rate
    }

    /// Number of frames between forced key frames (at least one).
    pub fn key_frame_period(&self) -> u64 {
        let frames = (self.key_frame_interval * self.frame_rate).round();
        if frames.is_finite() && frames >= 1.0 {
            frames as u64
        } else {
            1
        }
    }

    /// Derive the encoder configuration, negotiating profile, level and
    /// bitrate against what the encoder reports it can do.
    pub fn encoder_settings(&self, available: &[EncoderCapabilities]) -> EncoderSettings {
        let params = select_codec_params(self.codec, self.bitrate, available);
        EncoderSettings {
            codec: self.codec,
            width: self.width,
            height: self.height,
            bitrate: params.bitrate,
            frame_rate: self.frame_rate,
            key_frame_period: self.key_frame_period(),
            profile: params.profile,
            level: params.level,
        }
    }
}

/// Statistics returned after a recording stops
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Video samples written to the container
    pub video_frames: u64,
    /// Audio samples written to the container
    pub audio_samples: u64,
    /// Duration of the finished container in seconds
    pub duration_secs: f64,
    /// Total bytes written to the file (zero for in-memory writers)
    pub bytes_written: u64,
    /// Number of music loops that were scheduled
    pub audio_loops: usize,
    pub output_path: String,
}

impl RecordingStats {
    /// Average bitrate achieved
    pub fn avg_bitrate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.bytes_written as f64 * 8.0) / self.duration_secs
        } else {
            0.0
        }
    }
}
