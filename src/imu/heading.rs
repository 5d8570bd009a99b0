//! # Tilt-Compensated Heading
//!
//! Converts a raw magnetometer vector into a true heading.
//!
//! The sensor is mounted with its plate facing the ground and +Y pointing
//! down the antenna boom, so the horizontal heading is `atan2(-x, y)` once
//! the vector has been levelled.

use nalgebra::Vector3;

use super::protocol::Attitude;
use crate::angle::normalize_degrees;
use crate::calibration::MagCalibration;

/// Level a magnetometer vector and return its azimuth in degrees,
/// in `(-180, 180]`.
///
/// Roll is undone first (rotation mixing Y and Z), then pitch (rotation
/// mixing X and the rolled Z).
#[must_use]
pub fn tilt_compensated_azimuth(mag: &Vector3<f64>, pitch_deg: f64, roll_deg: f64) -> f64 {
    let (sin_roll, cos_roll) = roll_deg.to_radians().sin_cos();
    let (sin_pitch, cos_pitch) = pitch_deg.to_radians().sin_cos();

    let y_rolled = mag.y * cos_roll - mag.z * sin_roll;
    let z_rolled = mag.y * sin_roll + mag.z * cos_roll;

    let x_levelled = mag.x * cos_pitch + z_rolled * sin_pitch;

    (-x_levelled).atan2(y_rolled).to_degrees()
}

/// Full pipeline from a raw magnetic frame to true heading.
///
/// Applies the calibration (offset, inverse rotation, scaling), tilt
/// compensation from the current attitude, normalization into `[0, 360)`,
/// and finally magnetic declination. The result is not re-normalized after
/// the declination is added, so it can fall slightly outside `[0, 360)`.
#[must_use]
pub fn true_heading(
    raw: [i16; 3],
    calibration: &MagCalibration,
    attitude: &Attitude,
    declination: f64,
) -> f64 {
    let corrected = calibration.apply(&Vector3::new(
        f64::from(raw[0]),
        f64::from(raw[1]),
        f64::from(raw[2]),
    ));

    let azimuth = tilt_compensated_azimuth(&corrected, attitude.pitch, attitude.roll);
    normalize_degrees(azimuth) + declination
}
