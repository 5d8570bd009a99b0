//! # Tracker
//!
//! Steady-state pointing loop. Every tick the ephemeris gives the target's
//! position; both rotors are commanded unless the target has moved less
//! than the per-axis threshold since the last command.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::angle::{normalize_degrees, wraparound_distance};
use crate::config::Config;
use crate::ephemeris::{Ephemeris, HorizontalPosition, Observer};
use crate::error::Result;
use crate::rotor::RotorController;
use crate::task::ShutdownSignal;

/// Lowest elevation ever commanded
pub const MIN_ELEVATION: f64 = 0.0;

/// Change thresholds and update rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    /// Smallest azimuth change worth a command, degrees
    pub az_delta: f64,
    /// Smallest elevation change worth a command, degrees
    pub el_delta: f64,
    pub update_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            az_delta: 0.1,
            el_delta: 0.1,
            update_interval: Duration::from_secs(1),
        }
    }
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            az_delta: config.azimuth.delta,
            el_delta: config.elevation.delta,
            update_interval: Duration::from_millis(config.tracker.update_interval_ms),
        }
    }
}

/// Points both rotors at an ephemeris target
pub struct Tracker<E: Ephemeris> {
    ephemeris: E,
    observer: Observer,
    az: RotorController,
    el: RotorController,
    settings: TrackerSettings,
    last: Option<HorizontalPosition>,
}

impl<E: Ephemeris> Tracker<E> {
    pub fn new(
        ephemeris: E,
        observer: Observer,
        az: RotorController,
        el: RotorController,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            ephemeris,
            observer,
            az,
            el,
            settings,
            last: None,
        }
    }

    /// Last commanded target (unclamped)
    pub fn last_commanded(&self) -> Option<HorizontalPosition> {
        self.last
    }

    /// Decide whether `target` warrants a command and send it.
    ///
    /// Returns `true` if the rotors were commanded. The first call always
    /// commands. Elevation is clamped to [`MIN_ELEVATION`] on the wire, but
    /// the unclamped target is what later targets are compared against.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if either rotor's poller has died, `Serial` if a
    /// command cannot be written
    pub async fn update(&mut self, target: HorizontalPosition) -> Result<bool> {
        self.az.check_alive()?;
        self.el.check_alive()?;

        if let Some(last) = self.last {
            let az_change = wraparound_distance(target.azimuth, last.azimuth);
            let el_change = (target.altitude - last.altitude).abs();
            if az_change < self.settings.az_delta && el_change < self.settings.el_delta {
                debug!(
                    "Target moved {:.3}° az, {:.3}° el; not commanding",
                    az_change, el_change
                );
                return Ok(false);
            }
        }

        info!("AZ: {:.1}° EL: {:.1}°", target.azimuth, target.altitude);

        self.az.turn(normalize_degrees(target.azimuth)).await?;
        self.el.turn(target.altitude.max(MIN_ELEVATION)).await?;

        self.last = Some(target);
        Ok(true)
    }

    /// Query the ephemeris for `now` and update.
    pub async fn step(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let target = self.ephemeris.horizontal_position(&self.observer, now);
        self.update(target).await
    }

    /// Open both rotors and track until `signal` fires.
    ///
    /// Rotors are stopped and closed on the way out, whether the loop ended
    /// by request or by error.
    ///
    /// # Errors
    ///
    /// Returns the first error from opening or updating
    pub async fn run(&mut self, mut signal: ShutdownSignal) -> Result<()> {
        let result = self.track(&mut signal).await;

        for rotor in [&self.az, &self.el] {
            if let Err(e) = rotor.stop().await {
                warn!("Failed to stop {} rotor: {}", rotor.name(), e);
            }
        }
        self.az.close().await;
        self.el.close().await;

        result
    }

    async fn track(&mut self, signal: &mut ShutdownSignal) -> Result<()> {
        self.az.open().await?;
        self.el.open().await?;

        let mut ticker = interval(self.settings.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Tracking from {:.4}, {:.4}",
            self.observer.latitude, self.observer.longitude
        );

        loop {
            tokio::select! {
                _ = signal.cancelled() => {
                    info!("Tracking stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.step(Utc::now()).await?;
                }
            }
        }
    }
}
