//! # Moonraker
//!
//! Point an az/el antenna mount at the Moon.
//!
//! The binary has two operating modes that share the same devices, plus two
//! offline helpers:
//!
//! - `track` keeps both rotors on the Moon until Ctrl+C
//! - `calibrate` sweeps the mount while capturing raw magnetometer samples
//!   and installs the fitted calibration
//! - `fit` refits a calibration from a saved capture file
//! - `position` prints where the Moon is right now

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use moonraker::calibration::{fit_file, MagCalibration, CALIBRATION_FILE_NAME};
use moonraker::config::{Config, LoggingConfig};
use moonraker::ephemeris::{Ephemeris, LowPrecisionMoon, Observer};
use moonraker::imu::ImuDriver;
use moonraker::rotor::RotorController;
use moonraker::sequencer::{CalibrationSequencer, SequencerSettings};
use moonraker::task::shutdown_channel;
use moonraker::tracker::{Tracker, TrackerSettings};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config/moonraker.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Track the Moon until Ctrl+C
    Track,
    /// Run the magnetometer calibration sequence
    Calibrate,
    /// Fit a calibration from a raw capture file
    Fit {
        /// CSV of raw samples written by a calibration run
        capture: PathBuf,
    },
    /// Print the Moon's current azimuth and altitude
    Position,
}

/// Main entry point for Moonraker
///
/// # Control Flow
///
/// 1. Parse the command line and load the configuration; a bad
///    configuration stops here, before any device is opened
/// 2. Set up logging to stdout and, when `[logging] dir` is set, to a
///    daily log file
/// 3. Run the selected command
///
/// # Examples
///
/// ```bash
/// moonraker --config config/moonraker.toml track
/// ```
///
/// Expected output:
/// ```text
/// INFO moonraker: Moonraker v0.1.0 starting...
/// INFO moonraker::tracker: Tracking from 51.5000, -0.1000
/// INFO moonraker::tracker: AZ: 145.2° EL: 22.7°
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let _guard = init_logging(&config.logging)?;

    info!("Moonraker v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Track => track(&config).await,
        Commands::Calibrate => calibrate(&config).await,
        Commands::Fit { capture } => refit(&config, &capture),
        Commands::Position => {
            position(&config);
            Ok(())
        }
    }
}

/// Initialize logging; the returned guard flushes the log file on drop.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stdout = tracing_subscriber::fmt::layer();

    let Some(dir) = &logging.dir else {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "moonraker.log"));
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
    Ok(Some(guard))
}

async fn track(config: &Config) -> Result<()> {
    let az = RotorController::from_config("AZ", &config.azimuth, &config.serial)?;
    let el = RotorController::from_config("EL", &config.elevation, &config.serial)?;
    az.on_heading(|heading| info!("AZ @ {:.1}°", heading));
    el.on_heading(|heading| info!("EL @ {:.1}°", heading));

    let calibration =
        MagCalibration::load_or_default(config.calibration.data_dir.join(CALIBRATION_FILE_NAME));
    let mut imu = ImuDriver::from_config(&config.imu, calibration)?;
    imu.on_azimuth(|heading| tracing::debug!("Sensor heading {:.1}°", heading));
    imu.start()?;

    let mut tracker = Tracker::new(
        LowPrecisionMoon::new(),
        Observer::from(&config.station),
        az,
        el,
        TrackerSettings::from_config(config),
    );

    let (trigger, signal) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        trigger.trigger();
    });

    info!("Press Ctrl+C to exit");
    let result = tracker.run(signal).await;

    if let Err(e) = imu.check_alive() {
        warn!("{}", e);
    }
    imu.stop().await;

    result.context("Tracking failed")
}

async fn calibrate(config: &Config) -> Result<()> {
    let data_dir = &config.calibration.data_dir;
    let calibration = MagCalibration::load_or_default(data_dir.join(CALIBRATION_FILE_NAME));

    let imu = ImuDriver::from_config(&config.imu, calibration)?;
    let az = RotorController::from_config("AZ", &config.azimuth, &config.serial)?;
    let el = RotorController::from_config("EL", &config.elevation, &config.serial)?;
    az.on_heading(|heading| info!("AZ @ {:.1}°", heading));
    el.on_heading(|heading| info!("EL @ {:.1}°", heading));

    let mut sequencer =
        CalibrationSequencer::new(imu, az, el, SequencerSettings::from_config(&config.calibration));

    let abort = sequencer.abort_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, aborting calibration...");
            abort.trigger();
        }
    });

    let result = sequencer.run().await;
    watcher.abort();

    let calibration = result.context("Calibration failed")?;
    info!(
        "New calibration: offset {:?}, scaling {:?}",
        calibration.offset().as_slice(),
        calibration.scaling().as_slice()
    );
    Ok(())
}

fn refit(config: &Config, capture: &Path) -> Result<()> {
    let calibration = fit_file(capture)
        .with_context(|| format!("Failed to fit {}", capture.display()))?;

    let data_dir = &config.calibration.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    calibration.save(data_dir.join(CALIBRATION_FILE_NAME))?;
    Ok(())
}

fn position(config: &Config) {
    let observer = Observer::from(&config.station);
    let now = Utc::now();
    let moon = LowPrecisionMoon::new().horizontal_position(&observer, now);

    println!(
        "{}  AZ: {:.2}°  EL: {:.2}°",
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        moon.azimuth,
        moon.altitude
    );
}
