//! Heading convergence wait

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::angle::wraparound_distance;
use crate::config::CalibrationConfig;
use crate::error::Result;
use crate::rotor::RotorController;

/// When a rotor counts as "there"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceSettings {
    /// Largest accepted distance to the target, degrees
    pub threshold: f64,
    /// Delay between heading checks
    pub poll_interval: Duration,
    /// Pause after stopping the rotor
    pub settle: Duration,
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            poll_interval: Duration::from_secs(1),
            settle: Duration::from_secs(2),
        }
    }
}

impl ConvergenceSettings {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            threshold: config.convergence_threshold_deg,
            poll_interval: Duration::from_millis(config.convergence_poll_ms),
            settle: Duration::from_millis(config.settle_ms),
        }
    }
}

/// Wait until `rotor` reports a heading within the threshold of `target`,
/// then stop it and let it settle.
///
/// Only reads the heading the rotor's poller maintains; never talks to the
/// device except for the final stop.
///
/// # Errors
///
/// Returns `TaskFailed` if the rotor's poller dies while waiting, or
/// `Serial` if the stop command cannot be written
pub async fn wait_for_heading(
    rotor: &RotorController,
    target: f64,
    settings: &ConvergenceSettings,
) -> Result<()> {
    loop {
        rotor.check_alive()?;

        if let Some(heading) = rotor.heading() {
            let distance = wraparound_distance(heading, target);
            if distance <= settings.threshold {
                debug!(
                    "{} rotor at {:.1}, within {:.1} of {:.1}",
                    rotor.name(),
                    heading,
                    distance,
                    target
                );
                break;
            }
        }

        sleep(settings.poll_interval).await;
    }

    rotor.stop().await?;
    sleep(settings.settle).await;
    Ok(())
}
