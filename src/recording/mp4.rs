//! MP4 container writer using muxide

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use muxide::api::{AudioCodec, Metadata, Muxer, MuxerBuilder, VideoCodec};

use super::backend::BufferInfo;
use super::config::VideoCodecKind;
use super::container::{
    AudioCodecKind, AudioTrackFormat, ContainerStats, ContainerWriter, TrackFormat, TrackHandle,
    VideoTrackFormat,
};
use super::nal;
use crate::errors::ReelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Started,
    Stopped,
    Released,
}

/// Writes one video track and an optional Opus track into an MP4 file.
pub struct Mp4ContainerWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    muxer: Option<Muxer<BufWriter<File>>>,
    fast_start: bool,
    title: Option<String>,
    tracks: Vec<TrackFormat>,
    state: SessionState,
    first_video_pts: Option<f64>,
    held_audio: Vec<(f64, Vec<u8>)>,
}

impl Mp4ContainerWriter {
    /// Create the output file. Nothing is written until `start`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        fast_start: bool,
        title: Option<String>,
    ) -> Result<Self, ReelError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            ReelError::IoError(format!("Failed to create {}: {}", path.display(), e))
        })?;

        Ok(Self {
            path,
            file: Some(BufWriter::new(file)),
            muxer: None,
            fast_start,
            title,
            tracks: Vec::new(),
            state: SessionState::Created,
            first_video_pts: None,
            held_audio: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn video_format(&self) -> Option<&VideoTrackFormat> {
        self.tracks.iter().find_map(|t| match t {
            TrackFormat::Video(v) => Some(v),
            _ => None,
        })
    }

    fn audio_format(&self) -> Option<&AudioTrackFormat> {
        self.tracks.iter().find_map(|t| match t {
            TrackFormat::Audio(a) => Some(a),
            _ => None,
        })
    }

    fn muxer_mut(&mut self) -> Result<&mut Muxer<BufWriter<File>>, ReelError> {
        match (self.state, self.muxer.as_mut()) {
            (SessionState::Started, Some(muxer)) => Ok(muxer),
            _ => Err(ReelError::MuxingError(format!(
                "Cannot write samples while the session is {:?}",
                self.state
            ))),
        }
    }

    fn write_video(&mut self, data: &[u8], info: &BufferInfo) -> Result<(), ReelError> {
        let pts = info.presentation_time_us as f64 / 1_000_000.0;
        let first = self.first_video_pts.is_none();

        let with_csd;
        let payload = if first && info.flags.key_frame && !nal::contains_sps(data) {
            let codec_data = self
                .video_format()
                .map(|v| v.codec_data.clone())
                .unwrap_or_default();
            with_csd = [codec_data.as_slice(), data].concat();
            with_csd.as_slice()
        } else {
            data
        };

        self.muxer_mut()?
            .write_video(pts, payload, info.flags.key_frame)
            .map_err(|e| ReelError::MuxingError(format!("Failed to write video sample: {}", e)))?;

        if first {
            self.first_video_pts = Some(pts);
            self.flush_held_audio(pts)?;
        }
        Ok(())
    }

    fn write_audio(&mut self, data: &[u8], info: &BufferInfo) -> Result<(), ReelError> {
        let pts = info.presentation_time_us as f64 / 1_000_000.0;
        match self.first_video_pts {
            Some(first_video) => self.write_audio_at(pts.max(first_video), data),
            None => {
                self.held_audio.push((pts, data.to_vec()));
                Ok(())
            }
        }
    }

    fn write_audio_at(&mut self, pts: f64, data: &[u8]) -> Result<(), ReelError> {
        self.muxer_mut()?
            .write_audio(pts, data)
            .map_err(|e| ReelError::MuxingError(format!("Failed to write audio sample: {}", e)))
    }

    fn flush_held_audio(&mut self, first_video: f64) -> Result<(), ReelError> {
        if self.held_audio.is_empty() {
            return Ok(());
        }
        log::debug!("Writing {} audio samples held for the first video frame", self.held_audio.len());
        for (pts, data) in std::mem::take(&mut self.held_audio) {
            self.write_audio_at(pts.max(first_video), &data)?;
        }
        Ok(())
    }
}

impl ContainerWriter for Mp4ContainerWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackHandle, ReelError> {
        if self.state != SessionState::Created {
            return Err(ReelError::MuxingError(
                "Tracks must be added before the session starts".to_string(),
            ));
        }
        match format {
            TrackFormat::Video(video) => {
                if video.codec != VideoCodecKind::Avc {
                    return Err(ReelError::MuxingError(format!(
                        "MP4 writer only supports H.264 video, got {}",
                        video.codec
                    )));
                }
                if self.video_format().is_some() {
                    return Err(ReelError::MuxingError("Video track already added".to_string()));
                }
            }
            TrackFormat::Audio(_) => {
                if self.audio_format().is_some() {
                    return Err(ReelError::MuxingError("Audio track already added".to_string()));
                }
            }
        }
        self.tracks.push(format.clone());
        Ok(TrackHandle(self.tracks.len() - 1))
    }

    fn start(&mut self) -> Result<(), ReelError> {
        if self.state != SessionState::Created {
            return Err(ReelError::MuxingError("Session already started".to_string()));
        }
        let video = self
            .video_format()
            .cloned()
            .ok_or_else(|| ReelError::MuxingError("No video track added".to_string()))?;
        let audio = self.audio_format().cloned();
        let writer = self
            .file
            .take()
            .ok_or_else(|| ReelError::MuxingError("Output file already closed".to_string()))?;

        let mut builder = MuxerBuilder::new(writer)
            .video(VideoCodec::H264, video.width, video.height, video.frame_rate)
            .with_fast_start(self.fast_start);

        if let Some(audio) = &audio {
            match audio.codec {
                AudioCodecKind::Opus => {
                    builder = builder.audio(AudioCodec::Opus, audio.sample_rate, audio.channels);
                }
            }
        }

        let metadata = match &self.title {
            Some(title) => Metadata::new().with_title(title).with_current_time(),
            None => Metadata::new().with_current_time(),
        };
        builder = builder.with_metadata(metadata);

        let muxer = builder
            .build()
            .map_err(|e| ReelError::MuxingError(format!("Failed to create muxer: {}", e)))?;
        self.muxer = Some(muxer);
        self.state = SessionState::Started;
        log::debug!(
            "MP4 session started: {}x{} video{}",
            video.width,
            video.height,
            if audio.is_some() { " + Opus audio" } else { "" }
        );
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackHandle,
        buffer: &[u8],
        info: &BufferInfo,
    ) -> Result<(), ReelError> {
        let data = info.slice(buffer)?;
        match self.tracks.get(track.0) {
            Some(TrackFormat::Video(_)) => self.write_video(data, info),
            Some(TrackFormat::Audio(_)) => self.write_audio(data, info),
            None => Err(ReelError::MuxingError(format!("Unknown track {:?}", track))),
        }
    }

    fn stop(&mut self) -> Result<ContainerStats, ReelError> {
        if self.state != SessionState::Started {
            return Err(ReelError::MuxingError("Session is not running".to_string()));
        }
        self.state = SessionState::Stopped;
        if !self.held_audio.is_empty() {
            log::warn!(
                "Dropping {} audio samples: no video frame was written",
                self.held_audio.len()
            );
            self.held_audio.clear();
        }

        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| ReelError::MuxingError("Muxer missing".to_string()))?;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| ReelError::MuxingError(format!("Failed to finalize recording: {}", e)))?;

        Ok(ContainerStats {
            video_samples: stats.video_frames,
            audio_samples: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        })
    }

    fn release(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        let never_started = self.state == SessionState::Created;
        if self.state == SessionState::Started {
            log::warn!("Releasing unfinished MP4 session: {}", self.path.display());
        }
        self.state = SessionState::Released;
        self.file = None;
        self.muxer = None;

        if never_started {
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!("Failed to remove unused output {}: {}", self.path.display(), e);
            } else {
                log::debug!("Removed unused output {}", self.path.display());
            }
        }
    }
}

impl Drop for Mp4ContainerWriter {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::backend::ChunkFlags;
    use crate::testing::{synthetic_slice, synthetic_video_format};
    use tempfile::tempdir;

    fn info(size: usize, pts_us: i64, key_frame: bool) -> BufferInfo {
        BufferInfo {
            offset: 0,
            size,
            presentation_time_us: pts_us,
            flags: ChunkFlags {
                key_frame,
                ..ChunkFlags::default()
            },
        }
    }

    #[test]
    fn release_without_start_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unused.mp4");
        let mut writer = Mp4ContainerWriter::create(&path, true, None).unwrap();
        assert!(path.exists());

        writer.release();
        writer.release();
        assert!(!path.exists());
    }

    #[test]
    fn create_fails_for_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.mp4");
        assert!(matches!(
            Mp4ContainerWriter::create(&path, true, None),
            Err(ReelError::IoError(_))
        ));
    }

    #[test]
    fn tracks_are_rejected_after_start() {
        let dir = tempdir().unwrap();
        let mut writer =
            Mp4ContainerWriter::create(dir.path().join("a.mp4"), true, None).unwrap();
        let video = writer.add_track(&synthetic_video_format(64, 64, 30.0)).unwrap();
        assert_eq!(video, TrackHandle(0));
        writer.start().unwrap();

        let audio = TrackFormat::Audio(AudioTrackFormat {
            codec: AudioCodecKind::Opus,
            sample_rate: 48_000,
            channels: 2,
        });
        assert!(writer.add_track(&audio).is_err());
    }

    #[test]
    fn audio_before_first_video_is_held() {
        let dir = tempdir().unwrap();
        let mut writer =
            Mp4ContainerWriter::create(dir.path().join("b.mp4"), false, Some("held".into())).unwrap();
        let audio = writer
            .add_track(&TrackFormat::Audio(AudioTrackFormat {
                codec: AudioCodecKind::Opus,
                sample_rate: 48_000,
                channels: 2,
            }))
            .unwrap();
        let video = writer.add_track(&synthetic_video_format(64, 64, 30.0)).unwrap();
        writer.start().unwrap();

        let packet = [0xFCu8, 0xFF, 0xFE];
        writer.write_sample(audio, &packet, &info(3, 0, false)).unwrap();
        writer.write_sample(audio, &packet, &info(3, 20_000, false)).unwrap();
        assert_eq!(writer.held_audio.len(), 2);
        assert!(writer.first_video_pts.is_none());
        assert_eq!(video, TrackHandle(1));
    }

    #[test]
    fn samples_outside_a_session_are_rejected() {
        let dir = tempdir().unwrap();
        let mut writer =
            Mp4ContainerWriter::create(dir.path().join("c.mp4"), true, None).unwrap();
        let video = writer.add_track(&synthetic_video_format(64, 64, 30.0)).unwrap();
        let frame = synthetic_slice(nal::NAL_IDR, 8, 0x11);
        assert!(writer.write_sample(video, &frame, &info(frame.len(), 0, true)).is_err());
        assert!(writer.stop().is_err());
    }
}
