//! Encoder drain engine
//!
//! # Spell: VideoEncodeDrain
//! ^ Intent: observe every compressed chunk exactly once, in order, without stalling the encoder
//!
//! @VideoEncoder
//!   : (VideoConfig, EncoderBackend, ContainerWriter) -> VideoEncoder
//!   ! format_ready_fires_once
//!   ! muxer_started_before_first_sample
//!   ! every_dequeued_buffer_released_once
//!   ! finish_blocks_until_end_of_stream
//!   ! release_is_idempotent
//!   - background_threads
//!   - trusting_encoder_timestamps

use std::time::Duration;

use image::RgbImage;

use super::backend::{BufferInfo, EncodedChunk, EncoderBackend, OutputStatus};
use super::config::VideoConfig;
use super::container::{ContainerStats, ContainerWriter};
use super::muxer::FrameMuxer;
use crate::assert_invariant;
use crate::errors::ReelError;

/// Default wait per output poll (10 ms)
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

pub(crate) const INVARIANT_FORMAT_ONCE: &str = "Encoder output format must change only once";
pub(crate) const INVARIANT_MUXER_STARTED: &str = "Muxer must be started before the first sample";

/// Notified synchronously when the encoder's output format becomes known,
/// immediately before the muxer starts.
///
/// This is the only moment tracks other than video can be added to the
/// container.
pub trait MuxerListener {
    fn on_muxer_pre_start(&mut self, writer: &mut dyn ContainerWriter) -> Result<(), ReelError>;
}

/// Listener for recordings without extra tracks
pub struct NoopListener;

impl MuxerListener for NoopListener {
    fn on_muxer_pre_start(&mut self, _writer: &mut dyn ContainerWriter) -> Result<(), ReelError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainMode {
    /// Stop at the first empty poll
    NonBlocking,
    /// Poll until the end-of-stream chunk arrives
    UntilEndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Created,
    Running,
    Finished,
    Released,
}

/// Chunk counters for one engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub frames_submitted: u64,
    pub chunks_muxed: u64,
    pub config_chunks: u64,
    pub buffers_released: u64,
    pub format_changes: u64,
}

/// Drives an encoder backend and feeds its output into a frame muxer.
pub struct VideoEncoder<B: EncoderBackend, W: ContainerWriter> {
    config: VideoConfig,
    backend: B,
    muxer: Option<FrameMuxer<W>>,
    state: EngineState,
    drain_timeout: Duration,
    stats: DrainStats,
}

impl<B: EncoderBackend, W: ContainerWriter> VideoEncoder<B, W> {
    pub fn new(config: VideoConfig, backend: B, writer: W) -> Self {
        let muxer = FrameMuxer::new(writer, config.frame_rate);
        Self {
            config,
            backend,
            muxer: Some(muxer),
            state: EngineState::Created,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            stats: DrainStats::default(),
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn set_drain_timeout(&mut self, timeout: Duration) {
        self.drain_timeout = timeout;
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Configure and start the encoder.
    pub fn start(&mut self) -> Result<(), ReelError> {
        if self.state != EngineState::Created {
            return Err(ReelError::InvalidState(
                "Video encoder can only be started once".to_string(),
            ));
        }

        let settings = self.config.encoder_settings(&self.backend.capabilities());
        log::info!(
            "Starting {} encoder {}x{} @ {} fps, {} bps",
            settings.codec,
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.bitrate
        );

        self.backend.configure(&settings)?;
        self.backend.start()?;
        self.state = EngineState::Running;
        Ok(())
    }

    /// Submit one image, then drain whatever output is ready without waiting.
    pub fn submit_frame(
        &mut self,
        image: &RgbImage,
        listener: &mut dyn MuxerListener,
    ) -> Result<(), ReelError> {
        self.ensure_running()?;
        self.backend.queue_frame(image)?;
        self.stats.frames_submitted += 1;
        self.drain(DrainMode::NonBlocking, listener)
    }

    /// Signal end of input and block until the encoder has flushed everything.
    pub fn finish(&mut self, listener: &mut dyn MuxerListener) -> Result<(), ReelError> {
        self.ensure_running()?;
        self.backend.signal_end_of_input()?;
        self.drain(DrainMode::UntilEndOfStream, listener)?;
        self.state = EngineState::Finished;
        log::debug!("Encoder flushed: {:?}", self.stats);
        Ok(())
    }

    /// Stop the encoder, free its surface and finalize the container.
    ///
    /// Safe after a failed `start` and on repeated calls; the second call
    /// returns `Ok(None)`.
    pub fn release(&mut self) -> Result<Option<ContainerStats>, ReelError> {
        if self.state == EngineState::Released {
            return Ok(None);
        }
        let was_running = matches!(self.state, EngineState::Running | EngineState::Finished);
        self.state = EngineState::Released;

        if was_running {
            if let Err(e) = self.backend.stop() {
                log::warn!("Encoder stop failed during release: {}", e);
            }
        }
        self.backend.release();

        let Some(mut muxer) = self.muxer.take() else {
            return Ok(None);
        };
        let stopped = muxer.stop();
        muxer.release();
        stopped
    }

    /// Container writer, once the muxer session is running.
    pub fn container_mut(&mut self) -> Option<&mut W> {
        self.muxer
            .as_mut()
            .filter(|m| m.is_started())
            .map(|m| m.writer_mut())
    }

    pub fn muxer(&self) -> Option<&FrameMuxer<W>> {
        self.muxer.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn stats(&self) -> DrainStats {
        self.stats
    }

    fn ensure_running(&self) -> Result<(), ReelError> {
        if self.state == EngineState::Running {
            Ok(())
        } else {
            Err(ReelError::InvalidState(format!(
                "Video encoder is not running ({:?})",
                self.state
            )))
        }
    }

    fn drain(&mut self, mode: DrainMode, listener: &mut dyn MuxerListener) -> Result<(), ReelError> {
        loop {
            match self.backend.dequeue_output(self.drain_timeout)? {
                OutputStatus::TryAgainLater => {
                    if mode == DrainMode::NonBlocking {
                        break;
                    }
                }
                OutputStatus::BuffersChanged => {
                    // buffers are looked up by index on every chunk, nothing cached to refresh
                    log::debug!("Encoder output buffers changed");
                }
                OutputStatus::FormatChanged => self.on_format_changed(listener)?,
                OutputStatus::Advisory(code) => {
                    log::debug!("Ignoring encoder status {}", code);
                }
                OutputStatus::Buffer { index, info } => {
                    let forwarded = self.forward_chunk(index, info);
                    let released = self.backend.release_output_buffer(index);
                    self.stats.buffers_released += 1;
                    forwarded?;
                    released?;

                    if info.flags.end_of_stream {
                        log::debug!("End of stream reached");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn on_format_changed(&mut self, listener: &mut dyn MuxerListener) -> Result<(), ReelError> {
        self.stats.format_changes += 1;
        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| ReelError::InvalidState("Muxer already released".to_string()))?;

        assert_invariant!(
            !muxer.is_started(),
            INVARIANT_FORMAT_ONCE,
            "VideoEncoder::drain"
        );

        let format = self.backend.output_format().ok_or_else(|| {
            ReelError::EncodingError("Format changed but no output format available".to_string())
        })?;
        log::info!("Encoder output format ready: {:?}", format);

        listener.on_muxer_pre_start(muxer.writer_mut())?;
        muxer.start(&format)
    }

    fn forward_chunk(&mut self, index: usize, mut info: BufferInfo) -> Result<(), ReelError> {
        if info.flags.codec_config {
            // parameter sets already travelled with the output format
            self.stats.config_chunks += 1;
            info.size = 0;
        }
        if info.size == 0 {
            return Ok(());
        }

        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| ReelError::InvalidState("Muxer already released".to_string()))?;
        assert_invariant!(
            muxer.is_started(),
            INVARIANT_MUXER_STARTED,
            "VideoEncoder::drain"
        );

        let buffer = self.backend.output_buffer(index)?;
        let mut chunk = EncodedChunk { data: buffer, info };
        muxer.write_video_chunk(&mut chunk)?;
        self.stats.chunks_muxed += 1;
        Ok(())
    }
}
