//! # Ellipsoid Fit
//!
//! Derives a [`MagCalibration`] from a cloud of raw magnetometer readings.
//!
//! 1. Hard iron: offset = per-axis midpoint of min/max.
//! 2. Soft iron: least-squares fit of the centred quadric
//!    `a x² + b y² + c z² + 2d xy + 2e xz + 2f yz = 1` via the normal
//!    equations `(DᵀD) k = Dᵀ1`.
//! 3. Eigendecomposition of `[[a,d,e],[d,b,f],[e,f,c]]`: semi-axes are
//!    `1/√λ`, the eigenvectors form the rotation.
//!
//! Degenerate clouds (too few points, coplanar, collinear) make `DᵀD`
//! singular and are rejected with [`MoonrakerError::SingularFit`] instead of
//! producing NaNs.

use std::path::Path;

use nalgebra::{Matrix3, Matrix6, SymmetricEigen, Vector3, Vector6};
use tracing::{debug, info};

use super::samples::read_samples;
use super::MagCalibration;
use crate::error::{MoonrakerError, Result};

/// Fewest samples that can determine the six quadric coefficients
pub const MIN_SAMPLES: usize = 6;

/// Smallest eigenvalue of `DᵀD`, relative to the largest, accepted as
/// non-singular
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Off-diagonal quadric terms below this fraction of the largest diagonal
/// term are treated as zero
const OFF_DIAGONAL_TOLERANCE: f64 = 1e-9;

/// Fit a calibration to raw samples
///
/// # Errors
///
/// Returns `SingularFit` if there are fewer than [`MIN_SAMPLES`] points, the
/// points do not span an ellipsoid, or the fitted quadric is not an
/// ellipsoid.
///
/// # Examples
///
/// ```
/// use moonraker::calibration::fit;
/// use nalgebra::Vector3;
///
/// let points = vec![
///     Vector3::new(1.0, 0.0, 0.0), Vector3::new(-1.0, 0.0, 0.0),
///     Vector3::new(0.0, 1.0, 0.0), Vector3::new(0.0, -1.0, 0.0),
///     Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, -1.0),
///     Vector3::new(0.6, 0.8, 0.0), Vector3::new(0.0, 0.6, 0.8),
///     Vector3::new(0.8, 0.0, 0.6),
/// ];
/// let cal = fit(&points).unwrap();
/// assert!((cal.scaling().x - 1.0).abs() < 1e-6);
/// ```
pub fn fit(points: &[Vector3<f64>]) -> Result<MagCalibration> {
    if points.len() < MIN_SAMPLES {
        return Err(MoonrakerError::SingularFit(format!(
            "need at least {} samples, got {}",
            MIN_SAMPLES,
            points.len()
        )));
    }

    let offset = hard_iron_offset(points);
    let centred: Vec<Vector3<f64>> = points.iter().map(|p| p - offset).collect();

    let coefficients = fit_quadric(&centred)?;
    let (scaling, rotation) = ellipsoid_axes(&coefficients)?;

    info!(
        "Fitted calibration from {} samples: offset [{:.1}, {:.1}, {:.1}], scaling [{:.1}, {:.1}, {:.1}]",
        points.len(),
        offset.x,
        offset.y,
        offset.z,
        scaling.x,
        scaling.y,
        scaling.z
    );

    Ok(MagCalibration::new(offset, scaling, rotation))
}

/// Fit a calibration to the samples in a capture file
///
/// # Errors
///
/// Returns error if the file cannot be read or the fit is singular
pub fn fit_file<P: AsRef<Path>>(path: P) -> Result<MagCalibration> {
    let points = read_samples(path.as_ref())?;
    debug!("Read {} samples from {}", points.len(), path.as_ref().display());
    fit(&points)
}

/// Per-axis midpoint of the sample bounding box
fn hard_iron_offset(points: &[Vector3<f64>]) -> Vector3<f64> {
    let (min, max) = points.iter().fold(
        (
            Vector3::repeat(f64::INFINITY),
            Vector3::repeat(f64::NEG_INFINITY),
        ),
        |(min, max), p| (min.inf(p), max.sup(p)),
    );
    (min + max) / 2.0
}

/// Least-squares quadric coefficients `[a, b, c, d, e, f]`
fn fit_quadric(points: &[Vector3<f64>]) -> Result<Vector6<f64>> {
    let mut normal = Matrix6::<f64>::zeros();
    let mut rhs = Vector6::<f64>::zeros();

    for p in points {
        let row = Vector6::new(
            p.x * p.x,
            p.y * p.y,
            p.z * p.z,
            2.0 * p.x * p.y,
            2.0 * p.x * p.z,
            2.0 * p.y * p.z,
        );
        normal += row * row.transpose();
        rhs += row;
    }

    let eigenvalues = normal.symmetric_eigenvalues();
    let largest = eigenvalues.amax();
    let smallest = eigenvalues.min();
    if !(largest > 0.0) || smallest <= largest * SINGULAR_TOLERANCE {
        return Err(MoonrakerError::SingularFit(format!(
            "samples do not span an ellipsoid (normal matrix eigenvalues {:.3e}..{:.3e})",
            smallest, largest
        )));
    }

    let inverse = normal.try_inverse().ok_or_else(|| {
        MoonrakerError::SingularFit("normal matrix is not invertible".to_string())
    })?;

    Ok(inverse * rhs)
}

/// Semi-axis lengths and a proper rotation from quadric coefficients
fn ellipsoid_axes(k: &Vector6<f64>) -> Result<(Vector3<f64>, Matrix3<f64>)> {
    #[rustfmt::skip]
    let mut quadric = Matrix3::new(
        k[0], k[3], k[4],
        k[3], k[1], k[5],
        k[4], k[5], k[2],
    );

    let scale = quadric.diagonal().amax();
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        if quadric[(i, j)].abs() <= scale * OFF_DIAGONAL_TOLERANCE {
            quadric[(i, j)] = 0.0;
            quadric[(j, i)] = 0.0;
        }
    }

    let eigen = SymmetricEigen::new(quadric);

    if eigen.eigenvalues.iter().any(|&lambda| !(lambda > 0.0)) {
        return Err(MoonrakerError::SingularFit(format!(
            "fitted surface is not an ellipsoid (eigenvalues {:?})",
            eigen.eigenvalues.as_slice()
        )));
    }

    let scaling = eigen.eigenvalues.map(|lambda| 1.0 / lambda.sqrt());

    // Eigenvectors may come out as a reflection; negating one axis keeps the
    // same ellipsoid and makes the determinant +1
    let mut rotation = eigen.eigenvectors;
    if rotation.determinant() < 0.0 {
        let flipped = -rotation.column(0);
        rotation.set_column(0, &flipped);
    }

    Ok((scaling, rotation))
}
