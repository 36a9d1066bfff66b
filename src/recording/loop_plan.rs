//! Audio loop and fade schedule
//!
//! # Spell: AudioLoopPlan
//! ^ Intent: fill a video of known length with a music clip looped end to end, fading out where each loop ends
//!
//! @AudioLoopPlan
//!   : (music_end_position, video_duration) -> [loop_duration]
//!   ! sum(loops) == video_duration
//!   ! only the last loop may be shorter than music_end_position
//!   ! final loop fades 2.0 s when video_duration > 5 s, else 1.0 s
//!   - crossfades
//!   - loops longer than the video

use crate::errors::ReelError;

/// Final fade used for videos longer than [`LONG_VIDEO_THRESHOLD_SECS`]
pub const LONG_VIDEO_FINAL_FADE_SECS: f64 = 2.0;
/// Final fade used for short videos
pub const SHORT_VIDEO_FINAL_FADE_SECS: f64 = 1.0;
pub const LONG_VIDEO_THRESHOLD_SECS: f64 = 5.0;

/// Timing handed to the audio encoder before one loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSegmentParams {
    pub start_time_us: i64,
    pub end_time_us: i64,
    pub fade_duration_us: i64,
}

/// Ordered loop durations, in seconds, summing to the video duration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioLoopPlan {
    loops: Vec<f64>,
    video_duration: f64,
}

impl AudioLoopPlan {
    /// Split `video_duration` into whole loops of `music_end_position` seconds plus a remainder.
    pub fn new(music_end_position: f64, video_duration: f64) -> Result<Self, ReelError> {
        if !music_end_position.is_finite() || secs_to_us(music_end_position) <= 0 {
            return Err(ReelError::InvalidSchedule(format!(
                "music end position must be at least 1 us, got {}",
                music_end_position
            )));
        }
        if !video_duration.is_finite() || video_duration <= 0.0 {
            return Err(ReelError::InvalidSchedule(format!(
                "video duration must be positive, got {}",
                video_duration
            )));
        }

        let exact_loops = (video_duration / music_end_position).floor() as usize;
        let remainder = video_duration - exact_loops as f64 * music_end_position;

        // a remainder that rounds to 0 us (or to a whole clip) is float residue
        let remainder_us = secs_to_us(remainder);
        let mut loops = vec![music_end_position; exact_loops];
        if remainder_us >= secs_to_us(music_end_position) {
            loops.push(music_end_position);
        } else if remainder_us > 0 {
            loops.push(remainder);
        }

        log::debug!(
            "Audio loop plan: {} loops for {:.3}s of video ({:.3}s clip)",
            loops.len(),
            video_duration,
            music_end_position
        );
        Ok(Self {
            loops,
            video_duration,
        })
    }

    pub fn loops(&self) -> &[f64] {
        &self.loops
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn video_duration(&self) -> f64 {
        self.video_duration
    }

    pub fn total_duration(&self) -> f64 {
        self.loops.iter().sum()
    }

    /// Fade for loop `index`, in seconds.
    pub fn fade_secs(&self, index: usize, music_fade_duration: f64) -> f64 {
        if index + 1 == self.loops.len() {
            if self.video_duration > LONG_VIDEO_THRESHOLD_SECS {
                LONG_VIDEO_FINAL_FADE_SECS
            } else {
                SHORT_VIDEO_FINAL_FADE_SECS
            }
        } else if music_fade_duration > 0.0 {
            music_fade_duration
        } else {
            0.0
        }
    }

    /// Encoder timing for loop `index`, `None` past the end of the plan.
    pub fn segment_params(&self, index: usize, music_fade_duration: f64) -> Option<AudioSegmentParams> {
        let duration = *self.loops.get(index)?;
        Some(AudioSegmentParams {
            start_time_us: 0,
            end_time_us: secs_to_us(duration),
            fade_duration_us: secs_to_us(self.fade_secs(index, music_fade_duration)),
        })
    }
}

fn secs_to_us(secs: f64) -> i64 {
    (secs * 1_000_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_seconds_of_video_over_five_second_clip() {
        let plan = AudioLoopPlan::new(5.0, 12.0).unwrap();
        assert_eq!(plan.loops(), &[5.0, 5.0, 2.0]);

        let fades: Vec<i64> = (0..plan.len())
            .map(|i| plan.segment_params(i, 0.0).unwrap().fade_duration_us)
            .collect();
        assert_eq!(fades, vec![0, 0, 2_000_000]);
        assert_eq!(plan.segment_params(2, 0.0).unwrap().end_time_us, 2_000_000);
    }

    #[test]
    fn short_video_gets_one_partial_loop() {
        let plan = AudioLoopPlan::new(5.0, 3.0).unwrap();
        assert_eq!(plan.loops(), &[3.0]);
        let params = plan.segment_params(0, 0.5).unwrap();
        assert_eq!(params.start_time_us, 0);
        assert_eq!(params.end_time_us, 3_000_000);
        assert_eq!(params.fade_duration_us, 1_000_000);
    }

    #[test]
    fn caller_fade_applies_to_all_but_last_loop() {
        let plan = AudioLoopPlan::new(4.0, 10.0).unwrap();
        assert_eq!(plan.segment_params(0, 0.75).unwrap().fade_duration_us, 750_000);
        assert_eq!(plan.segment_params(1, 0.75).unwrap().fade_duration_us, 750_000);
        assert_eq!(plan.segment_params(2, 0.75).unwrap().fade_duration_us, 2_000_000);
        assert!(plan.segment_params(3, 0.75).is_none());
    }

    #[test]
    fn exact_multiple_has_no_remainder_loop() {
        let plan = AudioLoopPlan::new(2.5, 10.0).unwrap();
        assert_eq!(plan.loops(), &[2.5, 2.5, 2.5, 2.5]);
        assert_eq!(plan.total_duration(), 10.0);
    }

    #[test]
    fn float_residue_does_not_add_an_empty_loop() {
        for (music, video) in [(2.4, 7.2), (2.3, 6.9), (2.8, 8.4), (4.1, 12.3)] {
            let plan = AudioLoopPlan::new(music, video).unwrap();
            assert_eq!(plan.loops(), &[music, music, music], "{}s over {}s", video, music);
        }

        let plan = AudioLoopPlan::new(2.4, 7.2).unwrap();
        let params: Vec<AudioSegmentParams> = (0..plan.len())
            .map(|i| plan.segment_params(i, 0.0).unwrap())
            .collect();
        assert!(params.iter().all(|p| p.end_time_us == 2_400_000));
        let fades: Vec<i64> = params.iter().map(|p| p.fade_duration_us).collect();
        assert_eq!(fades, vec![0, 0, 2_000_000]);
    }

    #[test]
    fn five_second_video_is_short() {
        let plan = AudioLoopPlan::new(10.0, 5.0).unwrap();
        assert_eq!(plan.fade_secs(0, 0.0), SHORT_VIDEO_FINAL_FADE_SECS);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        for (music, video) in [(0.0, 10.0), (-1.0, 10.0), (1e-9, 10.0), (f64::NAN, 10.0), (5.0, 0.0), (5.0, f64::INFINITY)] {
            assert!(matches!(
                AudioLoopPlan::new(music, video),
                Err(ReelError::InvalidSchedule(_))
            ));
        }
    }
}
