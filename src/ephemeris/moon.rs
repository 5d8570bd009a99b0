//! # Low-Precision Lunar Position
//!
//! Short trigonometric series for the Moon's geocentric ecliptic longitude,
//! latitude and horizontal parallax (accurate to a few tenths of a degree,
//! which is finer than the rotors' positioning), followed by the standard
//! ecliptic → equatorial → horizontal chain:
//!
//! 1. Direction cosines with the mean obliquity of J2000
//! 2. Greenwich mean sidereal time plus east longitude gives local hour angle
//! 3. Hour angle / declination / latitude give azimuth and altitude
//! 4. Altitude is corrected for parallax, which reaches ~1° for the Moon

use chrono::{DateTime, Utc};

use super::{Ephemeris, HorizontalPosition, Observer};
use crate::angle::normalize_degrees;

/// Julian date of 1970-01-01T00:00:00Z
const UNIX_EPOCH_JD: f64 = 2440587.5;

/// Julian date of J2000.0
const J2000_JD: f64 = 2451545.0;

const DAYS_PER_CENTURY: f64 = 36525.0;

/// cos/sin of the mean obliquity of the ecliptic (23.44°)
const COS_OBLIQUITY: f64 = 0.9175;
const SIN_OBLIQUITY: f64 = 0.3978;

/// Geocentric ecliptic coordinates, degrees
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ecliptic {
    longitude: f64,
    latitude: f64,
    parallax: f64,
}

/// Moon position from a low-precision lunar theory
#[derive(Debug, Clone, Copy, Default)]
pub struct LowPrecisionMoon;

impl LowPrecisionMoon {
    pub fn new() -> Self {
        Self
    }
}

impl Ephemeris for LowPrecisionMoon {
    fn horizontal_position(&self, observer: &Observer, time: DateTime<Utc>) -> HorizontalPosition {
        let jd = julian_date(time);
        let moon = ecliptic(centuries_since_j2000(jd));
        let (ra, dec) = equatorial(moon.longitude, moon.latitude);

        let lst = gmst_degrees(jd) + observer.longitude;
        let (azimuth, geocentric_altitude) = horizontal(ra, dec, lst, observer.latitude);

        HorizontalPosition {
            azimuth,
            altitude: geocentric_altitude
                - moon.parallax * geocentric_altitude.to_radians().cos(),
        }
    }
}

/// Julian date of a UTC instant
#[must_use]
pub fn julian_date(time: DateTime<Utc>) -> f64 {
    UNIX_EPOCH_JD + time.timestamp_millis() as f64 / 86_400_000.0
}

/// Greenwich mean sidereal time in degrees, `[0, 360)`
#[must_use]
pub fn gmst_degrees(julian_date: f64) -> f64 {
    let t = centuries_since_j2000(julian_date);
    let gmst = 280.46061837 + 360.98564736629 * (julian_date - J2000_JD) + 0.000387933 * t.powi(2)
        - t.powi(3) / 38710000.0;
    normalize_degrees(gmst)
}

fn centuries_since_j2000(julian_date: f64) -> f64 {
    (julian_date - J2000_JD) / DAYS_PER_CENTURY
}

fn sin_deg(degrees: f64) -> f64 {
    degrees.to_radians().sin()
}

fn cos_deg(degrees: f64) -> f64 {
    degrees.to_radians().cos()
}

fn ecliptic(t: f64) -> Ecliptic {
    let longitude = 218.32 + 481267.881 * t
        + 6.29 * sin_deg(135.0 + 477198.87 * t)
        - 1.27 * sin_deg(259.3 - 413335.36 * t)
        + 0.66 * sin_deg(235.7 + 890534.22 * t)
        + 0.21 * sin_deg(269.9 + 954397.74 * t)
        - 0.19 * sin_deg(357.5 + 35999.05 * t)
        - 0.11 * sin_deg(186.5 + 966404.03 * t);

    let latitude = 5.13 * sin_deg(93.3 + 483202.02 * t)
        + 0.28 * sin_deg(228.0 + 960400.89 * t)
        - 0.28 * sin_deg(318.3 + 6003.15 * t)
        - 0.17 * sin_deg(217.6 - 407332.21 * t);

    let parallax = 0.9508
        + 0.0518 * cos_deg(135.0 + 477198.87 * t)
        + 0.0095 * cos_deg(259.3 - 413335.36 * t)
        + 0.0078 * cos_deg(235.7 + 890534.22 * t)
        + 0.0028 * cos_deg(269.9 + 954397.74 * t);

    Ecliptic {
        longitude: normalize_degrees(longitude),
        latitude,
        parallax,
    }
}

/// Right ascension and declination, degrees
fn equatorial(longitude: f64, latitude: f64) -> (f64, f64) {
    let l = cos_deg(latitude) * cos_deg(longitude);
    let m = COS_OBLIQUITY * cos_deg(latitude) * sin_deg(longitude) - SIN_OBLIQUITY * sin_deg(latitude);
    let n = SIN_OBLIQUITY * cos_deg(latitude) * sin_deg(longitude) + COS_OBLIQUITY * sin_deg(latitude);

    (normalize_degrees(m.atan2(l).to_degrees()), n.asin().to_degrees())
}

/// Azimuth (east of north) and altitude, degrees
fn horizontal(ra: f64, dec: f64, lst: f64, latitude: f64) -> (f64, f64) {
    let hour_angle = lst - ra;
    let (sin_h, cos_h) = hour_angle.to_radians().sin_cos();
    let (sin_d, cos_d) = dec.to_radians().sin_cos();
    let (sin_p, cos_p) = latitude.to_radians().sin_cos();

    let altitude = (sin_d * sin_p + cos_d * cos_p * cos_h).clamp(-1.0, 1.0).asin();
    let azimuth = (-cos_d * sin_h).atan2(sin_d * cos_p - cos_d * sin_p * cos_h);

    (normalize_degrees(azimuth.to_degrees()), altitude.to_degrees())
}
