//! # Raw Capture Files
//!
//! Raw magnetometer samples collected during a calibration run are kept as
//! append-only text, one sample per line:
//!
//! ```text
//! x,y,z,roll,pitch,yaw
//! ```
//!
//! Only the first three fields are needed to refit a calibration offline;
//! files holding just `x,y,z` are accepted too.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nalgebra::Vector3;

use crate::error::{MoonrakerError, Result};
use crate::imu::protocol::Attitude;

/// One magnetometer reading captured for calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Raw X/Y/Z counts
    pub magnetic: [i16; 3],
    /// Attitude at capture time
    pub attitude: Attitude,
}

impl RawSample {
    /// Raw vector as floating point
    #[must_use]
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(
            f64::from(self.magnetic[0]),
            f64::from(self.magnetic[1]),
            f64::from(self.magnetic[2]),
        )
    }
}

/// Capture file path for a run started at `timestamp`
#[must_use]
pub fn capture_file_path(data_dir: &Path, timestamp: DateTime<Utc>) -> PathBuf {
    data_dir.join(format!("wit-cal-data-{}.csv", timestamp.timestamp()))
}

/// Append samples to a capture file, creating it if needed
///
/// # Errors
///
/// Returns error if the file cannot be opened or written
pub fn write_samples(path: &Path, samples: &[RawSample]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    for sample in samples {
        let [x, y, z] = sample.magnetic;
        let a = sample.attitude;
        writeln!(file, "{},{},{},{:.3},{:.3},{:.3}", x, y, z, a.roll, a.pitch, a.yaw)?;
    }

    file.flush()?;
    Ok(())
}

/// Read the `x,y,z` columns of a capture file
///
/// Blank lines are skipped.
///
/// # Errors
///
/// Returns `CalibrationFile` for a line with fewer than three numeric fields
pub fn read_samples(path: &Path) -> Result<Vec<Vector3<f64>>> {
    let contents = fs::read_to_string(path)?;
    let mut points = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<f64> = line
            .split(',')
            .take(3)
            .map(|field| field.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                MoonrakerError::CalibrationFile(format!(
                    "{} line {}: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;

        if fields.len() < 3 {
            return Err(MoonrakerError::CalibrationFile(format!(
                "{} line {}: expected at least 3 fields",
                path.display(),
                line_no + 1
            )));
        }

        points.push(Vector3::new(fields[0], fields[1], fields[2]));
    }

    Ok(points)
}
