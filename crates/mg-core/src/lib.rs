//! mg-core: Shared types, traits, and registries for mixgraph
//!
//! This crate provides the foundational types used across all mixgraph crates:
//! - Typed ports (audio, MIDI, CV) with per-block buffers
//! - The `Processor` abstraction and its shared bookkeeping
//! - UUID-keyed port registry with stable identities
//! - Transport timing for sample-accurate processing

mod error;
mod midi;
mod port;
mod processor;
mod registry;
mod transport;

pub use error::*;
pub use midi::*;
pub use port::*;
pub use processor::*;
pub use registry::*;
pub use transport::*;

/// Type alias for audio samples (always f64 for maximum precision)
pub type Sample = f64;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
    Hz176400 = 176400,
    Hz192000 = 192000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decibels_round_trip() {
        let db = Decibels::from_gain(0.5);
        assert_relative_eq!(db.to_gain(), 0.5, epsilon = 1e-12);
        assert_eq!(Decibels::from_gain(0.0), Decibels::NEG_INF);
        assert_eq!(Decibels(-200.0).to_gain(), 0.0);
    }
}
