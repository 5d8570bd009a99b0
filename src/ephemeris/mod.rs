//! # Ephemeris
//!
//! Horizontal coordinates of the tracked target for an observer and time.

pub mod moon;

use chrono::{DateTime, Utc};

use crate::config::StationConfig;

pub use moon::LowPrecisionMoon;

/// Observer location on the Earth's surface, degrees (east longitude positive)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&StationConfig> for Observer {
    fn from(station: &StationConfig) -> Self {
        Self {
            latitude: station.latitude,
            longitude: station.longitude,
        }
    }
}

/// Target position in the observer's horizon frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalPosition {
    /// Degrees east of north, `[0, 360)`
    pub azimuth: f64,
    /// Degrees above the horizon; negative below it
    pub altitude: f64,
}

/// Source of target coordinates
#[cfg_attr(test, mockall::automock)]
pub trait Ephemeris: Send + Sync {
    /// Where the target is for `observer` at `time`
    fn horizontal_position(&self, observer: &Observer, time: DateTime<Utc>) -> HorizontalPosition;
}
