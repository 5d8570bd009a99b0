//! # Magnetometer Calibration
//!
//! Hard-iron / soft-iron correction for the heading magnetometer.
//!
//! A calibration maps the distorted ellipsoid traced by raw readings back
//! onto a sphere:
//!
//! ```text
//! corrected = (Rᵀ · (raw - offset)) ./ scaling
//! ```
//!
//! - `offset` removes the hard-iron bias (centre of the ellipsoid)
//! - `rotation` (R) holds the ellipsoid axes as columns
//! - `scaling` holds the semi-axis lengths along those axes
//!
//! The default calibration is the identity transform.
//!
//! ## Persistence
//!
//! Calibrations are stored as TOML with plain numeric arrays, rotation
//! written row by row:
//!
//! ```toml
//! offset = [12.5, -40.0, 3.0]
//! scaling = [410.2, 398.7, 402.1]
//! rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
//! ```

pub mod fit;
pub mod samples;

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MoonrakerError, Result};

pub use fit::{fit, fit_file};
pub use samples::RawSample;

/// File name of the persisted calibration inside the data directory
pub const CALIBRATION_FILE_NAME: &str = "wit-cal.toml";

/// Determinant tolerance when validating a loaded rotation
const ROTATION_TOLERANCE: f64 = 1e-3;

/// Offset / scaling / rotation correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagCalibration {
    offset: Vector3<f64>,
    scaling: Vector3<f64>,
    rotation: Matrix3<f64>,
}

impl Default for MagCalibration {
    fn default() -> Self {
        Self::identity()
    }
}

/// On-disk layout
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    offset: [f64; 3],
    scaling: [f64; 3],
    rotation: [[f64; 3]; 3],
}

impl MagCalibration {
    /// Creates a calibration from its parts.
    #[must_use]
    pub fn new(offset: Vector3<f64>, scaling: Vector3<f64>, rotation: Matrix3<f64>) -> Self {
        Self {
            offset,
            scaling,
            rotation,
        }
    }

    /// Zero offset, unit scaling, identity rotation.
    ///
    /// # Examples
    ///
    /// ```
    /// use moonraker::calibration::MagCalibration;
    /// use nalgebra::Vector3;
    ///
    /// let cal = MagCalibration::identity();
    /// let v = Vector3::new(1.0, 2.0, 3.0);
    /// assert_eq!(cal.apply(&v), v);
    /// ```
    #[must_use]
    pub fn identity() -> Self {
        Self {
            offset: Vector3::zeros(),
            scaling: Vector3::new(1.0, 1.0, 1.0),
            rotation: Matrix3::identity(),
        }
    }

    /// Hard-iron offset
    pub fn offset(&self) -> &Vector3<f64> {
        &self.offset
    }

    /// Semi-axis lengths
    pub fn scaling(&self) -> &Vector3<f64> {
        &self.scaling
    }

    /// Ellipsoid axes as matrix columns
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    /// Map a raw reading onto the unit sphere
    #[must_use]
    pub fn apply(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        let rotated = self.rotation.transpose() * (raw - self.offset);
        rotated.component_div(&self.scaling)
    }

    /// Write the calibration as TOML
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing the file fails
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let r = &self.rotation;
        let file = CalibrationFile {
            offset: [self.offset.x, self.offset.y, self.offset.z],
            scaling: [self.scaling.x, self.scaling.y, self.scaling.z],
            rotation: [
                [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
            ],
        };

        let contents = toml::to_string(&file)?;
        fs::write(path.as_ref(), contents)?;
        info!("Saved magnetometer calibration to {}", path.as_ref().display());
        Ok(())
    }

    /// Load a calibration written by [`MagCalibration::save`]
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file cannot be read
    /// - The arrays have the wrong shape
    /// - Any value is not finite, a scaling is zero, or the rotation is not
    ///   a proper rotation
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let file: CalibrationFile = toml::from_str(&contents)
            .map_err(|e| MoonrakerError::CalibrationFile(e.to_string()))?;

        let offset = Vector3::from(file.offset);
        let scaling = Vector3::from(file.scaling);
        let rows = file.rotation;
        #[rustfmt::skip]
        let rotation = Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2],
            rows[1][0], rows[1][1], rows[1][2],
            rows[2][0], rows[2][1], rows[2][2],
        );

        let calibration = Self::new(offset, scaling, rotation);
        calibration.validate()?;
        Ok(calibration)
    }

    /// Load a calibration, falling back to identity with a warning.
    ///
    /// A missing calibration is expected on first run and is not fatal.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            warn!(
                "No magnetometer calibration at {}; using identity calibration",
                path.display()
            );
            return Self::identity();
        }

        match Self::load(path) {
            Ok(calibration) => {
                info!("Loaded magnetometer calibration from {}", path.display());
                calibration
            }
            Err(e) => {
                warn!(
                    "Failed to load magnetometer calibration from {}: {}; using identity calibration",
                    path.display(),
                    e
                );
                Self::identity()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let all_finite = self.offset.iter().all(|v| v.is_finite())
            && self.scaling.iter().all(|v| v.is_finite())
            && self.rotation.iter().all(|v| v.is_finite());
        if !all_finite {
            return Err(MoonrakerError::CalibrationFile(
                "calibration contains non-finite values".to_string(),
            ));
        }

        if self.scaling.iter().any(|&s| s == 0.0) {
            return Err(MoonrakerError::CalibrationFile(
                "scaling values must be non-zero".to_string(),
            ));
        }

        let det = self.rotation.determinant();
        if (det - 1.0).abs() > ROTATION_TOLERANCE {
            return Err(MoonrakerError::CalibrationFile(format!(
                "rotation determinant is {:.4}, expected 1",
                det
            )));
        }

        Ok(())
    }
}
