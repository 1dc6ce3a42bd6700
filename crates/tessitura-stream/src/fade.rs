//! Linear fades applied at playback boundaries.

/// Frames of the short fade applied where playback starts and ends, hiding
/// the discontinuity of a seek or a cut.
pub const FADE_FRAMES: u64 = 32;

/// Fade-in and fade-out envelope over a playback of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeEnvelope {
    fade_in: u64,
    fade_out: u64,
    length: u64,
}

impl FadeEnvelope {
    /// Envelope over `length` frames. Requested fades shorter than
    /// [`FADE_FRAMES`] are lengthened to it.
    pub fn new(length: u64, fade_in: u64, fade_out: u64) -> Self {
        Self {
            fade_in: fade_in.max(FADE_FRAMES),
            fade_out: fade_out.max(FADE_FRAMES),
            length,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Gain at playback frame `frame`.
    #[inline]
    pub fn gain(&self, frame: u64) -> f32 {
        if frame >= self.length {
            return 0.0;
        }
        let mut gain = 1.0f32;
        if frame < self.fade_in {
            gain = frame as f32 / self.fade_in as f32;
        }
        let remaining = self.length - frame;
        if remaining <= self.fade_out {
            gain = gain.min((remaining - 1) as f32 / self.fade_out as f32);
        }
        gain
    }

    /// Whether every frame in `[start, start + frames)` plays at unity.
    #[inline]
    pub fn is_unity(&self, start: u64, frames: u64) -> bool {
        start >= self.fade_in && start + frames + self.fade_out <= self.length
    }

    /// Apply the envelope in place to a block starting at `start`.
    pub fn apply(&self, start: u64, samples: &mut [f32]) {
        if self.is_unity(start, samples.len() as u64) {
            return;
        }
        for (i, s) in samples.iter_mut().enumerate() {
            *s *= self.gain(start + i as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_are_silent() {
        let env = FadeEnvelope::new(1000, 0, 0);
        assert_eq!(env.gain(0), 0.0);
        assert_eq!(env.gain(999), 0.0);
        assert_eq!(env.gain(1000), 0.0);
        assert_eq!(env.gain(500), 1.0);
        assert!((env.gain(16) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ramps_are_monotonic() {
        let env = FadeEnvelope::new(10_000, 200, 400);
        for f in 1..200 {
            assert!(env.gain(f) >= env.gain(f - 1));
        }
        for f in 9_601..10_000 {
            assert!(env.gain(f) <= env.gain(f - 1));
        }
        assert!(env.is_unity(200, 9_400));
        assert!(!env.is_unity(199, 10));
    }

    #[test]
    fn test_apply() {
        let env = FadeEnvelope::new(128, 0, 0);
        let mut block = vec![1.0; 128];
        env.apply(0, &mut block);
        assert_eq!(block[0], 0.0);
        assert_eq!(block[64], 1.0);
        assert_eq!(block[127], 0.0);
    }
}
