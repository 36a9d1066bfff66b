//! Streaming linear-interpolation resampler
//!
//! Music files arrive at whatever rate they were mastered at; Opus wants
//! 48 kHz. Linear interpolation is plenty for a background bed.

/// Converts interleaved audio between sample rates across consecutive chunks.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Input frames advanced per output frame
    step: f64,
    /// Position of the next output frame, relative to the current chunk.
    /// -1.0 addresses the last frame of the previous chunk.
    position: f64,
    last_frame: Vec<f32>,
    primed: bool,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate,
            to_rate,
            channels: channels as usize,
            step: from_rate as f64 / to_rate.max(1) as f64,
            position: 0.0,
            last_frame: vec![0.0; channels as usize],
            primed: false,
        }
    }

    /// Resample one chunk of interleaved samples.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels;
        if ch == 0 || input.len() < ch {
            return Vec::new();
        }
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        let frames = input.len() / ch;
        let frame_at = |i: isize, c: usize, last: &[f32]| -> f32 {
            if i < 0 {
                last[c]
            } else {
                input[i as usize * ch + c]
            }
        };

        if !self.primed {
            // first chunk: start exactly on frame 0
            self.primed = true;
            self.position = 0.0;
        }

        let mut output = Vec::with_capacity(((frames as f64 / self.step).ceil() as usize + 1) * ch);
        // interpolation needs frame idx + 1, so stop before the last input frame
        while self.position < (frames - 1) as f64 {
            let idx = self.position.floor();
            let frac = (self.position - idx) as f32;
            let idx = idx as isize;
            for c in 0..ch {
                let a = frame_at(idx, c, &self.last_frame);
                let b = frame_at(idx + 1, c, &self.last_frame);
                output.push(a + (b - a) * frac);
            }
            self.position += self.step;
        }

        self.position -= frames as f64;
        self.last_frame
            .copy_from_slice(&input[(frames - 1) * ch..frames * ch]);
        output
    }

    /// Forget stream state; the next chunk starts a new stream.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last_frame.fill(0.0);
        self.primed = false;
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }
}
