//! Configuration management for framereel
//!
//! Provides loading, saving and validation of recording defaults: the video
//! stream, the music loop and how audio work is paced against video frames.

use crate::errors::ReelError;
use crate::recording::{VideoCodecKind, VideoConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReelConfig {
    pub video: VideoSection,
    pub music: MusicSection,
    pub pacing: PacingSection,
}

/// Output video stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSection {
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub fps: f64,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub codec: VideoCodecKind,
    /// Seconds between forced key frames
    pub key_frame_interval: f64,
    /// Write the moov box ahead of the media data
    pub fast_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Music loop defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicSection {
    /// Loop point in seconds
    pub end_position: f64,
    /// Fade-out at the end of every loop but the last, in seconds
    pub fade_duration: f64,
}

/// Interleaving of audio and video work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSection {
    /// Audio encode steps after each recorded frame
    pub audio_steps_per_frame: usize,
    /// Encoder output poll timeout in milliseconds
    pub drain_timeout_ms: u64,
}

impl Default for FrameReelConfig {
    fn default() -> Self {
        Self {
            video: VideoSection {
                width: 1280,
                height: 720,
                fps: 30.0,
                bitrate: 3_000_000,
                codec: VideoCodecKind::Avc,
                key_frame_interval: 1.0,
                fast_start: true,
                title: None,
            },
            music: MusicSection {
                end_position: 30.0,
                fade_duration: 0.5,
            },
            pacing: PacingSection {
                audio_steps_per_frame: crate::recording::DEFAULT_AUDIO_STEPS_PER_FRAME,
                drain_timeout_ms: crate::recording::DEFAULT_DRAIN_TIMEOUT.as_millis() as u64,
            },
        }
    }
}

impl FrameReelConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ReelError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ReelError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: FrameReelConfig = toml::from_str(&contents)
            .map_err(|e| ReelError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ReelError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ReelError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ReelError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ReelError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("framereel.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ReelError> {
        let invalid = |msg: &str| -> Result<(), ReelError> {
            Err(ReelError::ConfigError(msg.to_string()))
        };

        if self.video.width == 0 || self.video.height == 0 {
            return invalid("Invalid video resolution");
        }
        if self.video.width % 2 != 0 || self.video.height % 2 != 0 {
            return invalid("Video width and height must be even");
        }
        if !self.video.fps.is_finite() || self.video.fps <= 0.0 || self.video.fps > 240.0 {
            return invalid("Invalid FPS (must be above 0 and at most 240)");
        }
        if self.video.bitrate == 0 {
            return invalid("Bitrate must be positive");
        }
        if !self.video.key_frame_interval.is_finite() || self.video.key_frame_interval <= 0.0 {
            return invalid("Key frame interval must be positive");
        }

        if !self.music.end_position.is_finite() || self.music.end_position <= 0.0 {
            return invalid("Music end position must be positive");
        }
        if !self.music.fade_duration.is_finite() || self.music.fade_duration < 0.0 {
            return invalid("Music fade duration must not be negative");
        }

        if self.pacing.audio_steps_per_frame == 0 {
            return invalid("Audio steps per frame must be at least 1");
        }

        Ok(())
    }

    /// Video configuration for a recording written to `path`
    pub fn video_config<P: AsRef<Path>>(&self, path: P) -> VideoConfig {
        let mut config = VideoConfig::new(path, self.video.width, self.video.height)
            .with_frame_rate(self.video.fps)
            .with_bitrate(self.video.bitrate)
            .with_codec(self.video.codec)
            .with_key_frame_interval(self.video.key_frame_interval)
            .with_fast_start(self.video.fast_start);
        if let Some(title) = &self.video.title {
            config = config.with_title(title.clone());
        }
        config
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.pacing.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FrameReelConfig::default();
        assert_eq!(config.video.width, 1280);
        assert_eq!(config.video.fps, 30.0);
        assert_eq!(config.pacing.audio_steps_per_frame, 2);
        assert_eq!(config.pacing.drain_timeout_ms, 10);
    }

    #[test]
    fn test_config_validation() {
        let config = FrameReelConfig::default();
        assert!(config.validate().is_ok());

        let mut bad_config = config.clone();
        bad_config.video.width = 0;
        assert!(bad_config.validate().is_err());

        let mut odd = FrameReelConfig::default();
        odd.video.height = 721;
        assert!(odd.validate().is_err());

        let mut bad_music = FrameReelConfig::default();
        bad_music.music.fade_duration = -1.0;
        assert!(matches!(
            bad_music.validate(),
            Err(ReelError::ConfigError(_))
        ));

        let mut bad_pacing = FrameReelConfig::default();
        bad_pacing.pacing.audio_steps_per_frame = 0;
        assert!(bad_pacing.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("framereel.toml");

        let mut config = FrameReelConfig::default();
        config.video.title = Some("Holiday".to_string());
        config.music.end_position = 12.5;
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = FrameReelConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.video.fps, config.video.fps);
        assert_eq!(loaded.video.title.as_deref(), Some("Holiday"));
        assert_eq!(loaded.music.end_position, 12.5);
    }

    #[test]
    fn test_config_toml_format() {
        let config = FrameReelConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[video]"));
        assert!(toml_string.contains("[music]"));
        assert!(toml_string.contains("[pacing]"));
        assert!(toml_string.contains("codec = \"avc\""));
        assert!(toml_string.contains("audio_steps_per_frame"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = FrameReelConfig::load_from_file("nonexistent_file.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().video.fps, 30.0);
    }

    #[test]
    fn test_unparseable_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[video\nwidth = ").unwrap();
        assert!(matches!(
            FrameReelConfig::load_from_file(&path),
            Err(ReelError::ConfigError(_))
        ));
    }

    #[test]
    fn test_video_config_from_sections() {
        let mut config = FrameReelConfig::default();
        config.video.title = Some("Reel".to_string());
        config.video.key_frame_interval = 2.0;
        let video = config.video_config("out.mp4");
        assert_eq!(video.path, PathBuf::from("out.mp4"));
        assert_eq!((video.width, video.height), (1280, 720));
        assert_eq!(video.key_frame_period(), 60);
        assert_eq!(video.title.as_deref(), Some("Reel"));
        assert_eq!(config.drain_timeout(), Duration::from_millis(10));
    }
}
