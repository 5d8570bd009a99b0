//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! `[station]`, `[azimuth]`, `[elevation]` and `[imu]` are required; the
//! other sections may be left out entirely.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MoonrakerError, Result};
use crate::rotor::HeadingQuery;
use crate::sequencer::{CapturePolicy, MotionStep};
use crate::serial::SUPPORTED_BAUD_RATES;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub station: StationConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    pub azimuth: RotorConfig,
    pub elevation: RotorConfig,
    pub imu: ImuConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Observer location, degrees (east longitude positive)
#[derive(Debug, Deserialize, Clone)]
pub struct StationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

/// Settings shared by every serial link
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// How long to wait for a terminated rotor reply
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// One rotor (azimuth or elevation)
#[derive(Debug, Deserialize, Clone)]
pub struct RotorConfig {
    pub port: String,
    pub baud: u32,

    /// Rotor index in the `AP<index>` command
    #[serde(default = "default_rotor_index")]
    pub index: u8,

    /// Smallest target change worth a command, degrees
    #[serde(default = "default_delta")]
    pub delta: f64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub query: HeadingQuery,
}

/// Inertial/magnetic sensor
#[derive(Debug, Deserialize, Clone)]
pub struct ImuConfig {
    pub port: String,
    pub baud: u32,

    /// Added to magnetic heading to give true heading, degrees
    pub magnetic_declination: f64,
}

/// Calibration run
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub capture_policy: CapturePolicy,

    #[serde(default = "default_convergence_threshold_deg")]
    pub convergence_threshold_deg: f64,

    #[serde(default = "default_convergence_poll_ms")]
    pub convergence_poll_ms: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Motion plan; empty means a single sweep at the horizon
    #[serde(default)]
    pub steps: Vec<MotionStep>,
}

/// Tracking loop
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
}

/// Log output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Also write daily log files here when set
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            capture_policy: CapturePolicy::default(),
            convergence_threshold_deg: default_convergence_threshold_deg(),
            convergence_poll_ms: default_convergence_poll_ms(),
            settle_ms: default_settle_ms(),
            steps: Vec::new(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

// Default value functions
fn default_response_timeout_ms() -> u64 { 1000 }

fn default_rotor_index() -> u8 { 1 }
fn default_delta() -> f64 { 0.1 }
fn default_poll_interval_ms() -> u64 { 1000 }

fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_convergence_threshold_deg() -> f64 { 2.0 }
fn default_convergence_poll_ms() -> u64 { 1000 }
fn default_settle_ms() -> u64 { 2000 }

fn default_update_interval_ms() -> u64 { 1000 }

fn invalid(message: impl std::fmt::Display) -> MoonrakerError {
    MoonrakerError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails (including a missing required field)
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use moonraker::config::Config;
    ///
    /// let config = Config::load("config/moonraker.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Station
        if !(-90.0..=90.0).contains(&self.station.latitude) {
            return Err(invalid("station latitude must be between -90 and 90"));
        }

        if !(-180.0..=180.0).contains(&self.station.longitude) {
            return Err(invalid("station longitude must be between -180 and 180"));
        }

        if self.serial.response_timeout_ms == 0 || self.serial.response_timeout_ms > 10000 {
            return Err(invalid("response_timeout_ms must be between 1 and 10000"));
        }

        for (name, rotor) in [("azimuth", &self.azimuth), ("elevation", &self.elevation)] {
            if rotor.port.is_empty() {
                return Err(invalid(format!("{} port cannot be empty", name)));
            }

            if !SUPPORTED_BAUD_RATES.contains(&rotor.baud) {
                return Err(invalid(format!(
                    "{} baud must be one of: {:?}",
                    name, SUPPORTED_BAUD_RATES
                )));
            }

            if rotor.index > 9 {
                return Err(invalid(format!("{} index must be between 0 and 9", name)));
            }

            if !(rotor.delta > 0.0 && rotor.delta < 90.0) {
                return Err(invalid(format!("{} delta must be between 0 and 90 degrees", name)));
            }

            if rotor.poll_interval_ms == 0 || rotor.poll_interval_ms > 60000 {
                return Err(invalid(format!(
                    "{} poll_interval_ms must be between 1 and 60000",
                    name
                )));
            }
        }

        // Sensor
        if self.imu.port.is_empty() {
            return Err(invalid("imu port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.imu.baud) {
            return Err(invalid(format!(
                "imu baud must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if !self.imu.magnetic_declination.is_finite()
            || self.imu.magnetic_declination.abs() > 180.0
        {
            return Err(invalid("magnetic_declination must be between -180 and 180"));
        }

        // Calibration run
        let calibration = &self.calibration;
        if calibration.data_dir.as_os_str().is_empty() {
            return Err(invalid("calibration data_dir cannot be empty"));
        }

        if !(calibration.convergence_threshold_deg > 0.0
            && calibration.convergence_threshold_deg <= 45.0)
        {
            return Err(invalid("convergence_threshold_deg must be between 0 and 45"));
        }

        if calibration.convergence_poll_ms == 0 || calibration.convergence_poll_ms > 60000 {
            return Err(invalid("convergence_poll_ms must be between 1 and 60000"));
        }

        if calibration.settle_ms > 60000 {
            return Err(invalid("settle_ms must be at most 60000"));
        }

        for (i, step) in calibration.steps.iter().enumerate() {
            if step.azimuths.is_empty() {
                return Err(invalid(format!("calibration step {} has no azimuths", i + 1)));
            }

            if !(0.0..=90.0).contains(&step.elevation) {
                return Err(invalid(format!(
                    "calibration step {} elevation must be between 0 and 90",
                    i + 1
                )));
            }

            if step.azimuths.iter().any(|az| !(0.0..=360.0).contains(az)) {
                return Err(invalid(format!(
                    "calibration step {} azimuths must be between 0 and 360",
                    i + 1
                )));
            }
        }

        if self.tracker.update_interval_ms == 0 || self.tracker.update_interval_ms > 60000 {
            return Err(invalid("update_interval_ms must be between 1 and 60000"));
        }

        if let Some(dir) = &self.logging.dir {
            if dir.as_os_str().is_empty() {
                return Err(invalid("logging dir cannot be empty when set"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rotor(port: &str) -> RotorConfig {
        RotorConfig {
            port: port.to_string(),
            baud: 4800,
            index: default_rotor_index(),
            delta: default_delta(),
            poll_interval_ms: default_poll_interval_ms(),
            query: HeadingQuery::default(),
        }
    }

    fn create_valid_config() -> Config {
        Config {
            station: StationConfig {
                latitude: 51.5,
                longitude: -0.1,
            },
            serial: SerialConfig::default(),
            azimuth: rotor("/dev/ttyUSB0"),
            elevation: rotor("/dev/ttyUSB1"),
            imu: ImuConfig {
                port: "/dev/ttyUSB2".to_string(),
                baud: 9600,
                magnetic_declination: -0.5,
            },
            calibration: CalibrationConfig::default(),
            tracker: TrackerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    const MINIMAL: &str = r#"
[station]
latitude = 51.5
longitude = -0.1

[azimuth]
port = "/dev/ttyUSB0"
baud = 4800

[elevation]
port = "/dev/ttyUSB1"
baud = 4800

[imu]
port = "/dev/ttyUSB2"
baud = 9600
magnetic_declination = -0.5
"#;

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_file = write_config(MINIMAL);

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.azimuth.port, "/dev/ttyUSB0");
        assert_eq!(config.elevation.baud, 4800);
        assert_eq!(config.imu.magnetic_declination, -0.5);
        assert_eq!(config.serial.response_timeout_ms, 1000);
        assert_eq!(config.azimuth.query, HeadingQuery::Bi);
        assert_eq!(config.calibration.capture_policy, CapturePolicy::WholeSequence);
        assert!(config.calibration.steps.is_empty());
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let contents = format!(
            r#"{}
[serial]
response_timeout_ms = 500

[calibration]
data_dir = "/var/lib/moonraker"
capture_policy = "per_step"
settle_ms = 0

[[calibration.steps]]
elevation = 0.0
azimuths = [1.0, 359.0]

[[calibration.steps]]
elevation = 45.0
azimuths = [359.0, 1.0]

[tracker]
update_interval_ms = 250

[logging]
dir = "/var/log/moonraker"
"#,
            MINIMAL.replace("baud = 4800\n\n[elevation]", "baud = 4800\nquery = \"ai\"\nindex = 2\n\n[elevation]")
        );
        let temp_file = write_config(&contents);

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.azimuth.query, HeadingQuery::Ai);
        assert_eq!(config.azimuth.index, 2);
        assert_eq!(config.elevation.query, HeadingQuery::Bi);
        assert_eq!(config.serial.response_timeout_ms, 500);
        assert_eq!(config.calibration.capture_policy, CapturePolicy::PerStep);
        assert_eq!(config.calibration.data_dir, PathBuf::from("/var/lib/moonraker"));
        assert_eq!(config.calibration.settle_ms, 0);
        assert_eq!(config.calibration.steps.len(), 2);
        assert_eq!(config.calibration.steps[1].elevation, 45.0);
        assert_eq!(config.calibration.steps[1].azimuths, vec![359.0, 1.0]);
        assert_eq!(config.tracker.update_interval_ms, 250);
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/moonraker")));
    }

    #[test]
    fn test_missing_declination() {
        let temp_file = write_config(&MINIMAL.replace("magnetic_declination = -0.5\n", ""));

        match Config::load(temp_file.path()) {
            Err(MoonrakerError::Config(e)) => {
                assert!(e.to_string().contains("magnetic_declination"));
            }
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_rotor_section() {
        let temp_file = write_config(&MINIMAL.replace("[elevation]", "[unused]"));
        assert!(matches!(
            Config::load(temp_file.path()),
            Err(MoonrakerError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_query_variant() {
        let temp_file = write_config(&MINIMAL.replace(
            "baud = 4800\n\n[elevation]",
            "baud = 4800\nquery = \"xy\"\n\n[elevation]",
        ));
        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/moonraker.toml"),
            Err(MoonrakerError::Io(_))
        ));
    }

    #[test]
    fn test_latitude_out_of_range() {
        let mut config = create_valid_config();
        config.station.latitude = 90.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_longitude_out_of_range() {
        let mut config = create_valid_config();
        config.station.longitude = -180.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_latitude() {
        let mut config = create_valid_config();
        config.station.latitude = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_timeout_zero() {
        let mut config = create_valid_config();
        config.serial.response_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_timeout_too_high() {
        let mut config = create_valid_config();
        config.serial.response_timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_azimuth_port() {
        let mut config = create_valid_config();
        config.azimuth.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_imu_port() {
        let mut config = create_valid_config();
        config.imu.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.elevation.baud = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in SUPPORTED_BAUD_RATES {
            let mut config = create_valid_config();
            config.imu.baud = baud;
            config.azimuth.baud = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_rotor_index_too_high() {
        let mut config = create_valid_config();
        config.azimuth.index = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delta_zero() {
        let mut config = create_valid_config();
        config.elevation.delta = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delta_negative() {
        let mut config = create_valid_config();
        config.azimuth.delta = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_zero() {
        let mut config = create_valid_config();
        config.azimuth.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_too_high() {
        let mut config = create_valid_config();
        config.elevation.poll_interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_declination_not_finite() {
        let mut config = create_valid_config();
        config.imu.magnetic_declination = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_data_dir() {
        let mut config = create_valid_config();
        config.calibration.data_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_convergence_threshold_zero() {
        let mut config = create_valid_config();
        config.calibration.convergence_threshold_deg = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_convergence_poll_zero() {
        let mut config = create_valid_config();
        config.calibration.convergence_poll_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settle_zero_is_valid() {
        let mut config = create_valid_config();
        config.calibration.settle_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settle_too_high() {
        let mut config = create_valid_config();
        config.calibration.settle_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_step_without_azimuths() {
        let mut config = create_valid_config();
        config.calibration.steps = vec![MotionStep {
            elevation: 10.0,
            azimuths: vec![],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_step_elevation_out_of_range() {
        let mut config = create_valid_config();
        config.calibration.steps = vec![MotionStep {
            elevation: 95.0,
            azimuths: vec![1.0, 359.0],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_step_azimuth_out_of_range() {
        let mut config = create_valid_config();
        config.calibration.steps = vec![MotionStep {
            elevation: 0.0,
            azimuths: vec![1.0, 361.0],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_interval_zero() {
        let mut config = create_valid_config();
        config.tracker.update_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_log_dir() {
        let mut config = create_valid_config();
        config.logging.dir = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_response_timeout_ms(), 1000);
        assert_eq!(default_rotor_index(), 1);
        assert_eq!(default_delta(), 0.1);
        assert_eq!(default_poll_interval_ms(), 1000);
        assert_eq!(default_data_dir(), PathBuf::from("./data"));
        assert_eq!(default_convergence_threshold_deg(), 2.0);
        assert_eq!(default_convergence_poll_ms(), 1000);
        assert_eq!(default_settle_ms(), 2000);
        assert_eq!(default_update_interval_ms(), 1000);
    }
}
