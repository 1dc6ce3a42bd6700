//! Tolerance constants for audio testing.

/// Floating point rounding errors (passthrough, exact gain).
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Gains derived through dB conversion and pan laws.
pub const GAIN_EPSILON: f32 = 1e-4;

/// Silence threshold (~-80dB).
pub const SILENCE_THRESHOLD: f32 = 0.0001;

/// Samples at each end of a playback inside the boundary fade.
pub const FADE_MARGIN: usize = 64;
