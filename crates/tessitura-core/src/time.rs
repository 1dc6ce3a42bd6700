//! Frame and wall-clock time conversion.

use std::time::Duration;

/// Frames spanning `duration` at `sample_rate`, rounded to the nearest frame.
#[inline]
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    let nanos = duration.as_nanos() * sample_rate as u128;
    ((nanos + 500_000_000) / 1_000_000_000) as u64
}

/// Wall-clock span of `frames` at `sample_rate`.
#[inline]
pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(duration_to_frames(Duration::from_secs(2), 48_000), 96_000);
        assert_eq!(duration_to_frames(Duration::from_millis(10), 44_100), 441);
        assert_eq!(frames_to_duration(48_000, 48_000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(1, 0), Duration::ZERO);

        let frames = 123_457;
        let back = duration_to_frames(frames_to_duration(frames, 44_100), 44_100);
        assert_eq!(back, frames);
    }
}
