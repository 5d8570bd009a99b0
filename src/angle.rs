//! # Heading Arithmetic
//!
//! Wraparound-aware helpers for compass headings in degrees.

/// Normalize a heading into `[0, 360)`.
///
/// # Examples
///
/// ```
/// use moonraker::angle::normalize_degrees;
///
/// assert_eq!(normalize_degrees(370.0), 10.0);
/// assert_eq!(normalize_degrees(-90.0), 270.0);
/// ```
#[must_use]
pub fn normalize_degrees(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Shortest angular distance between two headings, in `[0, 180]`.
///
/// Plain subtraction is wrong across north: 350° and 10° are 20° apart,
/// not 340°.
///
/// # Examples
///
/// ```
/// use moonraker::angle::wraparound_distance;
///
/// assert_eq!(wraparound_distance(10.0, 350.0), 20.0);
/// assert_eq!(wraparound_distance(0.0, 180.0), 180.0);
/// ```
#[must_use]
pub fn wraparound_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}
