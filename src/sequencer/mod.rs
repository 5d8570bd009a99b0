//! # Calibration Sequencer
//!
//! Drives both rotors through a list of motion steps while the sensor
//! captures raw magnetometer samples, then fits, persists and hot-swaps the
//! resulting calibration.
//!
//! For each step:
//!
//! 1. Stop both rotors
//! 2. Command azimuth to the step's first target and elevation to the step's
//!    elevation
//! 3. Wait for elevation, then azimuth, to converge
//! 4. Open the capture window
//! 5. Sweep azimuth through the remaining targets, waiting at each
//! 6. Close the window, fit and swap: on every step with
//!    [`CapturePolicy::PerStep`], only on the last with
//!    [`CapturePolicy::WholeSequence`]
//!
//! Opening a capture is idempotent, so under `WholeSequence` the window
//! opened on the first step stays open across the remaining steps.

pub mod convergence;

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::calibration::samples::{capture_file_path, write_samples};
use crate::calibration::{fit, MagCalibration, RawSample, CALIBRATION_FILE_NAME};
use crate::config::CalibrationConfig;
use crate::error::{MoonrakerError, Result};
use crate::imu::ImuDriver;
use crate::rotor::RotorController;
use crate::task::{shutdown_channel, ShutdownSignal, ShutdownTrigger};

pub use convergence::{wait_for_heading, ConvergenceSettings};

/// One elevation with an azimuth sweep
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MotionStep {
    /// Elevation held for the whole step, degrees
    pub elevation: f64,
    /// Azimuth targets in order; capture covers the moves after the first
    pub azimuths: Vec<f64>,
}

/// When the raw capture window is closed and fitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// One window from the first step to the last, one fit
    #[default]
    WholeSequence,
    /// A fresh window and a fit for every step
    PerStep,
}

/// Everything the sequencer needs besides the devices
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSettings {
    /// Where capture files and the calibration file are written
    pub data_dir: PathBuf,
    pub capture_policy: CapturePolicy,
    pub convergence: ConvergenceSettings,
    /// Motion plan; empty selects [`default_plan`]
    pub steps: Vec<MotionStep>,
}

impl SequencerSettings {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            capture_policy: config.capture_policy,
            convergence: ConvergenceSettings::from_config(config),
            steps: config.steps.clone(),
        }
    }
}

/// Single level sweep of almost a full turn, starting from whichever end
/// of the range is nearer the current azimuth.
///
/// # Examples
///
/// ```
/// use moonraker::sequencer::default_plan;
///
/// assert_eq!(default_plan(Some(270.0))[0].azimuths, vec![359.0, 1.0]);
/// assert_eq!(default_plan(Some(90.0))[0].azimuths, vec![1.0, 359.0]);
/// ```
#[must_use]
pub fn default_plan(current_azimuth: Option<f64>) -> Vec<MotionStep> {
    let azimuths = if current_azimuth.unwrap_or(0.0) > 180.0 {
        vec![359.0, 1.0]
    } else {
        vec![1.0, 359.0]
    };

    vec![MotionStep {
        elevation: 0.0,
        azimuths,
    }]
}

/// Magnetometer calibration run over two rotors and the sensor
pub struct CalibrationSequencer {
    imu: ImuDriver,
    az: RotorController,
    el: RotorController,
    settings: SequencerSettings,
    abort: ShutdownTrigger,
    aborted: ShutdownSignal,
}

impl CalibrationSequencer {
    /// Takes ownership of unopened devices; [`run`](Self::run) opens and
    /// closes them.
    pub fn new(
        imu: ImuDriver,
        az: RotorController,
        el: RotorController,
        settings: SequencerSettings,
    ) -> Self {
        let (abort, aborted) = shutdown_channel();
        Self {
            imu,
            az,
            el,
            settings,
            abort,
            aborted,
        }
    }

    /// Handle that cancels a running sequence from another task.
    pub fn abort_handle(&self) -> ShutdownTrigger {
        self.abort.clone()
    }

    /// The sensor driver, for inspecting the live calibration
    pub fn imu(&self) -> &ImuDriver {
        &self.imu
    }

    /// Run the whole sequence.
    ///
    /// On success returns the calibration now live in the sensor driver. On
    /// any failure or abort both rotors are stopped. The devices are always
    /// closed before this returns.
    ///
    /// # Errors
    ///
    /// * `Aborted` - the abort handle was triggered
    /// * `SingularFit` - the captured samples do not determine an ellipsoid
    /// * `TaskFailed` - a rotor poller died during a wait
    /// * `Serial` / `Io` - device or file failures
    pub async fn run(&mut self) -> Result<MagCalibration> {
        info!("*** Beginning magnetometer calibration sequence ***");

        let mut aborted = self.aborted.clone();
        let outcome = tokio::select! {
            result = self.sequence() => result,
            _ = aborted.cancelled() => Err(MoonrakerError::Aborted),
        };

        match &outcome {
            Ok(_) => info!("*** Magnetometer calibration sequence complete ***"),
            Err(MoonrakerError::Aborted) => {
                warn!("Calibration sequence aborted");
                self.halt_rotors().await;
            }
            Err(e) => {
                warn!("Calibration sequence failed: {}", e);
                self.halt_rotors().await;
            }
        }

        self.teardown().await;
        outcome
    }

    async fn sequence(&mut self) -> Result<MagCalibration> {
        self.imu.start()?;
        self.az.open().await?;
        self.el.open().await?;

        self.az.set_over_travel(0).await?;
        self.az.set_cw_limit(0).await?;
        self.az.set_ccw_limit(0).await?;

        let plan = if self.settings.steps.is_empty() {
            default_plan(self.az.heading())
        } else {
            self.settings.steps.clone()
        };
        let mut steps = Vec::with_capacity(plan.len());
        for (index, step) in plan.into_iter().enumerate() {
            if step.azimuths.is_empty() {
                warn!("Step {} has no azimuth targets; skipping", index + 1);
            } else {
                steps.push(step);
            }
        }
        let convergence = self.settings.convergence;
        let total = steps.len();
        let mut calibration = None;

        for (index, step) in steps.iter().enumerate() {
            info!("--- STEP {} OF {} ---", index + 1, total);

            let Some((&start_az, sweep)) = step.azimuths.split_first() else {
                continue;
            };

            self.az.stop().await?;
            self.el.stop().await?;

            self.az.turn(start_az).await?;
            self.el.turn(step.elevation).await?;

            info!("Waiting for EL rotor to reach {}°...", step.elevation);
            wait_for_heading(&self.el, step.elevation, &convergence).await?;

            info!("Waiting for AZ rotor to reach {}°...", start_az);
            wait_for_heading(&self.az, start_az, &convergence).await?;

            self.imu.start_raw_capture();

            for &target in sweep {
                info!("Waiting for AZ rotor to reach {}°...", target);
                self.az.turn(target).await?;
                wait_for_heading(&self.az, target, &convergence).await?;
            }

            let last = index + 1 == total;
            if self.settings.capture_policy == CapturePolicy::PerStep || last {
                calibration = Some(self.finish_capture()?);
            }
        }

        calibration.ok_or_else(|| {
            MoonrakerError::SingularFit("no samples were captured".to_string())
        })
    }

    /// Close the window, persist samples, fit, save and swap.
    fn finish_capture(&self) -> Result<MagCalibration> {
        self.imu.check_alive()?;
        let samples = self.imu.end_raw_capture().unwrap_or_default();

        fs::create_dir_all(&self.settings.data_dir)?;
        let capture_path = capture_file_path(&self.settings.data_dir, Utc::now());
        write_samples(&capture_path, &samples)?;
        info!(
            "Wrote {} raw samples to {}",
            samples.len(),
            capture_path.display()
        );

        let points: Vec<_> = samples.iter().map(RawSample::vector).collect();
        let calibration = fit(&points)?;

        calibration.save(self.settings.data_dir.join(CALIBRATION_FILE_NAME))?;
        self.imu.set_calibration(calibration);
        Ok(calibration)
    }

    async fn halt_rotors(&self) {
        for rotor in [&self.az, &self.el] {
            if let Err(e) = rotor.stop().await {
                warn!("Failed to stop {} rotor: {}", rotor.name(), e);
            }
        }
    }

    async fn teardown(&mut self) {
        self.imu.end_raw_capture();
        self.imu.stop().await;
        self.az.close().await;
        self.el.close().await;
    }
}
