//! Gain and pan law.
//!
//! Pan runs from -1.0 (hard left) through 0.0 (centre) to 1.0 (hard right).

use crate::lockfree::AtomicFloat;
use serde::{Deserialize, Serialize};

/// Levels at or below this are treated as silence.
pub const MIN_DB: f32 = -96.0;

/// Convert a level in dB to a linear gain factor.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    if db <= MIN_DB {
        0.0
    } else {
        10.0f32.powf(db / 20.0)
    }
}

/// Convert a linear gain factor to dB, clamped at [`MIN_DB`].
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        MIN_DB
    } else {
        (20.0 * gain.log10()).max(MIN_DB)
    }
}

/// How pan position maps to left/right gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PanLaw {
    /// Equal power: -3 dB per side at centre.
    #[default]
    ConstantPower,
    /// Linear crossfade: -6 dB per side at centre.
    Linear,
    /// Unity at centre, the far side attenuates as pan moves away.
    Balance,
}

/// Left/right gain factors for `pan` under `law`.
pub fn pan_gains(pan: f32, law: PanLaw) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    match law {
        PanLaw::ConstantPower => {
            let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
            (angle.cos(), angle.sin())
        }
        PanLaw::Linear => ((1.0 - pan) * 0.5, (1.0 + pan) * 0.5),
        PanLaw::Balance => ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0)),
    }
}

/// Resolved left/right gain pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGain {
    pub left: f32,
    pub right: f32,
}

impl StereoGain {
    pub const UNITY: StereoGain = StereoGain {
        left: 1.0,
        right: 1.0,
    };

    pub const SILENT: StereoGain = StereoGain {
        left: 0.0,
        right: 0.0,
    };

    /// Gain pair for a dB level and pan position.
    pub fn from_level(db: f32, pan: f32, law: PanLaw) -> Self {
        let gain = db_to_gain(db);
        let (l, r) = pan_gains(pan, law);
        Self {
            left: gain * l,
            right: gain * r,
        }
    }
}

impl Default for StereoGain {
    fn default() -> Self {
        Self::UNITY
    }
}

/// Gain pair written by the control thread and read by mixers.
#[derive(Debug)]
pub struct AtomicStereoGain {
    left: AtomicFloat,
    right: AtomicFloat,
}

impl AtomicStereoGain {
    pub fn new(gain: StereoGain) -> Self {
        Self {
            left: AtomicFloat::new(gain.left),
            right: AtomicFloat::new(gain.right),
        }
    }

    #[inline]
    pub fn get(&self) -> StereoGain {
        StereoGain {
            left: self.left.get(),
            right: self.right.get(),
        }
    }

    pub fn set(&self, gain: StereoGain) {
        self.left.set(gain.left);
        self.right.set(gain.right);
    }
}

impl Default for AtomicStereoGain {
    fn default() -> Self {
        Self::new(StereoGain::UNITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_to_gain() {
        assert_relative_eq!(db_to_gain(0.0), 1.0);
        assert_relative_eq!(db_to_gain(-6.0), 0.501_187, epsilon = 1e-5);
        assert_eq!(db_to_gain(MIN_DB), 0.0);
        assert_relative_eq!(gain_to_db(1.0), 0.0);
        assert_eq!(gain_to_db(0.0), MIN_DB);
    }

    #[test]
    fn test_constant_power_centre_and_extremes() {
        let (l, r) = pan_gains(0.0, PanLaw::ConstantPower);
        assert_relative_eq!(l, std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_relative_eq!(l, r, epsilon = 1e-6);

        let (l, r) = pan_gains(-1.0, PanLaw::ConstantPower);
        assert_relative_eq!(l, 1.0, epsilon = 1e-6);
        assert!(r.abs() < 1e-6);

        let (l, r) = pan_gains(1.0, PanLaw::ConstantPower);
        assert!(l.abs() < 1e-6);
        assert_relative_eq!(r, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_constant_power_preserves_power() {
        for i in -10..=10 {
            let (l, r) = pan_gains(i as f32 / 10.0, PanLaw::ConstantPower);
            assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_linear_and_balance() {
        assert_eq!(pan_gains(0.0, PanLaw::Linear), (0.5, 0.5));
        assert_eq!(pan_gains(0.0, PanLaw::Balance), (1.0, 1.0));
        assert_eq!(pan_gains(-1.0, PanLaw::Balance), (1.0, 0.0));
        assert_eq!(pan_gains(5.0, PanLaw::Linear), (0.0, 1.0));
    }

    #[test]
    fn test_atomic_gain_roundtrip() {
        let gain = AtomicStereoGain::default();
        assert_eq!(gain.get(), StereoGain::UNITY);
        let g = StereoGain::from_level(0.0, -1.0, PanLaw::Linear);
        gain.set(g);
        assert_eq!(gain.get(), StereoGain { left: 1.0, right: 0.0 });
    }
}
