use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// System value type: the master's one-byte encoding for temperatures,
/// humidity and times of day.
///
/// The byte `255` means "no value" for temperature and humidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Svt(u8);

impl Svt {
    /// Raw byte reported when a sensor has no value.
    pub const NO_VALUE: u8 = 255;

    /// Wrap a raw system value byte.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Temperature in degrees Celsius, half-degree resolution, offset by 32.
    pub fn temperature(celsius: f64) -> Result<Self> {
        Self::scaled((celsius + 32.0) * 2.0)
    }

    /// Relative humidity in percent, half-percent resolution.
    pub fn humidity(percent: f64) -> Result<Self> {
        Self::scaled(percent * 2.0)
    }

    /// Time of day with ten-minute resolution.
    pub fn time(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(ProtocolError::OutOfRange {
                value: u32::from(hour) * 60 + u32::from(minute),
                max: 23 * 60 + 59,
            });
        }
        Ok(Self(hour * 6 + minute / 10))
    }

    /// The "no value" marker.
    pub const fn none() -> Self {
        Self(Self::NO_VALUE)
    }

    fn scaled(value: f64) -> Result<Self> {
        // Truncation toward zero, as the master firmware does.
        let truncated = value.trunc();
        if !(0.0..=254.0).contains(&truncated) {
            return Err(ProtocolError::OutOfRange {
                value: truncated.max(0.0) as u32,
                max: 254,
            });
        }
        Ok(Self(truncated as u8))
    }

    /// The raw byte.
    pub const fn byte(self) -> u8 {
        self.0
    }

    /// Decoded temperature, `None` for the no-value marker.
    pub fn as_temperature(self) -> Option<f64> {
        (self.0 != Self::NO_VALUE).then(|| f64::from(self.0) / 2.0 - 32.0)
    }

    /// Decoded humidity, `None` for the no-value marker.
    pub fn as_humidity(self) -> Option<f64> {
        (self.0 != Self::NO_VALUE).then(|| f64::from(self.0) / 2.0)
    }

    /// Decoded time of day as `(hour, minute)`.
    pub fn as_time(self) -> (u8, u8) {
        (self.0 / 6, (self.0 % 6) * 10)
    }
}
