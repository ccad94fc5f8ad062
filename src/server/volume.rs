//! Server volume representation
//!
//! Volumes are integers where [`Volume::NORM`] is unity gain. Conversion to
//! and from linear amplitude uses the cubic software-volume curve.

use crate::constants::MAX_CHANNELS;

/// Software volume; `NORM` is 100%
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Volume(pub u32);

impl Volume {
    pub const MUTED: Volume = Volume(0);
    pub const NORM: Volume = Volume(0x10000);
    /// Largest volume the server accepts
    pub const MAX: Volume = Volume(u32::MAX / 2);

    pub fn from_linear(amplitude: f32) -> Self {
        if amplitude.is_nan() || amplitude <= 0.0 {
            return Self::MUTED;
        }
        let v = (amplitude as f64).cbrt() * Self::NORM.0 as f64;
        Volume(v.round().min(Self::MAX.0 as f64) as u32)
    }

    pub fn to_linear(self) -> f32 {
        if self.0 == 0 {
            return 0.0;
        }
        let v = self.0 as f64 / Self::NORM.0 as f64;
        (v * v * v) as f32
    }

    /// Decibels, `-inf` when muted
    pub fn to_db(self) -> f32 {
        20.0 * self.to_linear().log10()
    }

    pub fn is_above_norm(self) -> bool {
        self > Self::NORM
    }
}

/// Per-channel volumes of a sink input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelVolumes {
    values: Vec<Volume>,
}

impl ChannelVolumes {
    /// All `channels` set to `volume`
    pub fn uniform(channels: usize, volume: Volume) -> Self {
        Self {
            values: vec![volume; channels.clamp(1, MAX_CHANNELS)],
        }
    }

    pub fn from_values(values: Vec<Volume>) -> Self {
        Self { values }
    }

    pub fn channels(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Volume] {
        &self.values
    }

    /// Average over channels
    pub fn avg(&self) -> Volume {
        if self.values.is_empty() {
            return Volume::MUTED;
        }
        let sum: u64 = self.values.iter().map(|v| v.0 as u64).sum();
        Volume((sum / self.values.len() as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_endpoints() {
        assert_eq!(Volume::from_linear(1.0), Volume::NORM);
        assert_eq!(Volume::from_linear(0.0), Volume::MUTED);
        assert_eq!(Volume::from_linear(-1.0), Volume::MUTED);
        assert_eq!(Volume::NORM.to_linear(), 1.0);
        assert_eq!(Volume::MUTED.to_linear(), 0.0);
    }

    #[test]
    fn test_cubic_curve() {
        // half the norm is an eighth of the amplitude
        let half = Volume(Volume::NORM.0 / 2);
        assert!((half.to_linear() - 0.125).abs() < 1e-6);
        assert_eq!(Volume::from_linear(0.125), half);
    }

    #[test]
    fn test_db() {
        assert_eq!(Volume::NORM.to_db(), 0.0);
        assert!(Volume::MUTED.to_db().is_infinite());
        assert!((Volume::from_linear(0.5).to_db() + 6.0206).abs() < 0.01);
    }

    #[test]
    fn test_avg() {
        let cv = ChannelVolumes::from_values(vec![Volume(100), Volume(200)]);
        assert_eq!(cv.avg(), Volume(150));
        assert_eq!(ChannelVolumes::uniform(0, Volume::NORM).channels(), 1);
    }
}
