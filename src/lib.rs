//! # Moonraker Library
//!
//! Point an azimuth/elevation antenna mount at the Moon and calibrate the
//! magnetometer that reports the mount's heading.
//!
//! This library provides the rotor and sensor serial drivers, the ellipsoid
//! fit behind magnetometer calibration, and the two operating modes built on
//! them: the calibration sequencer and the tracker.

pub mod angle;
pub mod calibration;
pub mod config;
pub mod ephemeris;
pub mod error;
pub mod imu;
pub mod rotor;
pub mod sequencer;
pub mod serial;
pub mod task;
pub mod tracker;
