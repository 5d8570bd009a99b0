//! # Sensor Driver
//!
//! Reads the sensor's byte stream on a supervised background task, rebuilds
//! frames, and routes each decoded frame:
//!
//! - angle frames update the shared attitude and raise an elevation event
//!   (roll)
//! - magnetic frames go to exactly one sink: the live heading pipeline, or
//!   the raw capture buffer while a calibration window is open
//!
//! Calibration and sink live under a single lock, so a capture toggle or a
//! calibration swap never races a frame being processed.

use std::mem;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace};

use super::framer::FrameAssembler;
use super::heading::true_heading;
use super::protocol::{decode_frame, Attitude, Frame, Reading};
use crate::calibration::{MagCalibration, RawSample};
use crate::config::ImuConfig;
use crate::error::{MoonrakerError, Result};
use crate::serial::open_port;
use crate::serial::port_trait::SerialPortIO;
use crate::task::{lock_unpoisoned, BackgroundTask, EventHandler};

/// Destination of magnetic frames
enum MagneticSink {
    /// Compute headings and raise azimuth events
    Live,
    /// Collect raw samples for calibration
    Capture(Vec<RawSample>),
}

struct MagneticState {
    calibration: MagCalibration,
    sink: MagneticSink,
}

/// State shared between the driver handle and its reader task
struct ImuShared {
    declination: f64,
    attitude: Mutex<Attitude>,
    magnetic: Mutex<MagneticState>,
    on_azimuth: Mutex<Option<EventHandler<f64>>>,
    on_elevation: Mutex<Option<EventHandler<f64>>>,
}

impl ImuShared {
    fn dispatch(&self, frame: Frame) {
        match frame.reading() {
            Reading::Angle(attitude) => {
                *lock_unpoisoned(&self.attitude) = attitude;
                trace!(
                    "Attitude roll {:.2} pitch {:.2} yaw {:.2}",
                    attitude.roll,
                    attitude.pitch,
                    attitude.yaw
                );

                let handler = lock_unpoisoned(&self.on_elevation).clone();
                if let Some(handler) = handler {
                    handler(attitude.roll);
                }
            }
            Reading::Magnetic(raw) => {
                let attitude = *lock_unpoisoned(&self.attitude);

                let heading = {
                    let mut guard = lock_unpoisoned(&self.magnetic);
                    let state = &mut *guard;
                    match &mut state.sink {
                        MagneticSink::Capture(samples) => {
                            samples.push(RawSample {
                                magnetic: raw,
                                attitude,
                            });
                            None
                        }
                        MagneticSink::Live => Some(true_heading(
                            raw,
                            &state.calibration,
                            &attitude,
                            self.declination,
                        )),
                    }
                };

                if let Some(heading) = heading {
                    let handler = lock_unpoisoned(&self.on_azimuth).clone();
                    if let Some(handler) = handler {
                        handler(heading);
                    }
                }
            }
            Reading::Other(frame_type) => {
                trace!("Ignoring sensor frame type 0x{:02X}", frame_type);
            }
        }
    }
}

/// Driver for the inertial/magnetic sensor
pub struct ImuDriver {
    shared: Arc<ImuShared>,
    port: Option<Box<dyn SerialPortIO>>,
    reader: Option<BackgroundTask>,
}

impl ImuDriver {
    /// Wrap an already-open port.
    ///
    /// # Arguments
    ///
    /// * `port` - Byte stream from the sensor
    /// * `declination` - Magnetic declination added to every heading, degrees
    /// * `calibration` - Initial magnetometer calibration
    pub fn new(port: Box<dyn SerialPortIO>, declination: f64, calibration: MagCalibration) -> Self {
        Self {
            shared: Arc::new(ImuShared {
                declination,
                attitude: Mutex::new(Attitude::default()),
                magnetic: Mutex::new(MagneticState {
                    calibration,
                    sink: MagneticSink::Live,
                }),
                on_azimuth: Mutex::new(None),
                on_elevation: Mutex::new(None),
            }),
            port: Some(port),
            reader: None,
        }
    }

    /// Open the configured device.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` or `Serial` if the port cannot be opened
    pub fn from_config(config: &ImuConfig, calibration: MagCalibration) -> Result<Self> {
        let port = open_port(&config.port, config.baud)?;
        Ok(Self::new(
            Box::new(port),
            config.magnetic_declination,
            calibration,
        ))
    }

    /// Register the heading observer (true heading, degrees).
    pub fn on_azimuth<F>(&self, handler: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        *lock_unpoisoned(&self.shared.on_azimuth) = Some(Arc::new(handler));
    }

    /// Register the elevation observer (roll, degrees).
    pub fn on_elevation<F>(&self, handler: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        *lock_unpoisoned(&self.shared.on_elevation) = Some(Arc::new(handler));
    }

    /// Start the background reader.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the driver was already started or stopped
    pub fn start(&mut self) -> Result<()> {
        let mut port = self.port.take().ok_or_else(|| {
            MoonrakerError::Serial("sensor port already started or closed".to_string())
        })?;
        let shared = Arc::clone(&self.shared);

        self.reader = Some(BackgroundTask::spawn("imu", move |mut signal| async move {
            let mut assembler = FrameAssembler::new();

            loop {
                let byte = tokio::select! {
                    _ = signal.cancelled() => return Ok(()),
                    byte = port.read_byte() => byte.map_err(|e| {
                        MoonrakerError::Serial(format!("sensor read failed: {}", e))
                    })?,
                };

                if let Some(candidate) = assembler.push(byte) {
                    match decode_frame(&candidate) {
                        Some(frame) => shared.dispatch(frame),
                        None => trace!("Dropped corrupt sensor frame"),
                    }
                }
            }
        }));

        info!("Sensor reader started");
        Ok(())
    }

    /// Stop the reader and release the port.
    pub async fn stop(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.stop().await;
            info!("Sensor reader stopped");
        }
        self.port = None;
    }

    /// Return `TaskFailed` if the reader has died.
    pub fn check_alive(&self) -> Result<()> {
        self.reader.as_ref().map_or(Ok(()), BackgroundTask::check)
    }

    /// Divert magnetic frames into a fresh capture buffer.
    ///
    /// No-op if a capture is already open.
    pub fn start_raw_capture(&self) {
        let mut state = lock_unpoisoned(&self.shared.magnetic);
        if matches!(state.sink, MagneticSink::Live) {
            state.sink = MagneticSink::Capture(Vec::new());
            info!("Raw magnetometer capture started");
        } else {
            debug!("Raw magnetometer capture already open");
        }
    }

    /// Close the capture window and hand back its samples.
    ///
    /// Returns `None` if no capture was open.
    pub fn end_raw_capture(&self) -> Option<Vec<RawSample>> {
        let mut state = lock_unpoisoned(&self.shared.magnetic);
        match mem::replace(&mut state.sink, MagneticSink::Live) {
            MagneticSink::Capture(samples) => {
                info!("Raw magnetometer capture ended with {} samples", samples.len());
                Some(samples)
            }
            MagneticSink::Live => None,
        }
    }

    /// Whether a capture window is open
    pub fn is_capturing(&self) -> bool {
        matches!(
            lock_unpoisoned(&self.shared.magnetic).sink,
            MagneticSink::Capture(_)
        )
    }

    /// Replace the live calibration.
    pub fn set_calibration(&self, calibration: MagCalibration) {
        lock_unpoisoned(&self.shared.magnetic).calibration = calibration;
        info!("Magnetometer calibration updated");
    }

    /// Current calibration
    pub fn calibration(&self) -> MagCalibration {
        lock_unpoisoned(&self.shared.magnetic).calibration
    }

    /// Latest attitude
    pub fn attitude(&self) -> Attitude {
        *lock_unpoisoned(&self.shared.attitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::protocol::{encode_frame, FRAME_TYPE_ANGLE, FRAME_TYPE_MAGNETIC};
    use crate::serial::port_trait::mocks::ChannelSerialPort;
    use nalgebra::{Matrix3, Vector3};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        driver: ImuDriver,
        bytes: mpsc::UnboundedSender<u8>,
        azimuths: mpsc::UnboundedReceiver<f64>,
        elevations: mpsc::UnboundedReceiver<f64>,
    }

    impl Harness {
        fn new(declination: f64) -> Self {
            let (bytes, port) = ChannelSerialPort::new();
            let mut driver = ImuDriver::new(Box::new(port), declination, MagCalibration::identity());

            let (az_tx, azimuths) = mpsc::unbounded_channel();
            let (el_tx, elevations) = mpsc::unbounded_channel();
            driver.on_azimuth(move |h| {
                let _ = az_tx.send(h);
            });
            driver.on_elevation(move |r| {
                let _ = el_tx.send(r);
            });
            driver.start().unwrap();

            Self {
                driver,
                bytes,
                azimuths,
                elevations,
            }
        }

        fn send(&self, bytes: &[u8]) {
            for &b in bytes {
                self.bytes.send(b).unwrap();
            }
        }

        fn magnetic(&self, x: i16, y: i16, z: i16) {
            self.send(&encode_frame(FRAME_TYPE_MAGNETIC, [x, y, z, 0]));
        }

        fn angle(&self, roll: i16, pitch: i16, yaw: i16) {
            self.send(&encode_frame(FRAME_TYPE_ANGLE, [roll, pitch, yaw, 0]));
        }

        /// Angle frames are processed in stream order, so an elevation
        /// event proves every earlier byte has been handled.
        async fn barrier(&mut self) {
            self.angle(0, 0, 0);
            timeout(WAIT, self.elevations.recv()).await.unwrap().unwrap();
        }

        fn drain_azimuths(&mut self) -> Vec<f64> {
            let mut out = Vec::new();
            while let Ok(h) = self.azimuths.try_recv() {
                out.push(h);
            }
            out
        }
    }

    #[tokio::test]
    async fn test_magnetic_frame_raises_true_heading() {
        let mut h = Harness::new(10.0);

        h.magnetic(-100, 100, 0);
        let heading = timeout(WAIT, h.azimuths.recv()).await.unwrap().unwrap();

        assert!((heading - 55.0).abs() < 1e-9);
        h.driver.stop().await;
    }

    #[tokio::test]
    async fn test_angle_frame_updates_attitude_and_raises_roll() {
        let mut h = Harness::new(0.0);

        // 8192 / 32768 * 180 = 45°
        h.angle(8192, -4096, 16384);
        let roll = timeout(WAIT, h.elevations.recv()).await.unwrap().unwrap();

        assert!((roll - 45.0).abs() < 1e-9);
        let attitude = h.driver.attitude();
        assert!((attitude.pitch + 22.5).abs() < 1e-9);
        assert!((attitude.yaw - 90.0).abs() < 1e-9);
        h.driver.stop().await;
    }

    #[tokio::test]
    async fn test_corrupt_and_unknown_frames_are_dropped() {
        let mut h = Harness::new(0.0);

        let mut corrupt = encode_frame(FRAME_TYPE_MAGNETIC, [1, 2, 3, 0]);
        corrupt[10] ^= 0x01;
        h.send(&corrupt);
        // Acceleration frame: valid but unused
        h.send(&encode_frame(0x51, [1, 2, 3, 0]));
        h.send(&[0x00, 0xAA]);
        h.magnetic(0, 100, 0);
        h.barrier().await;

        let headings = h.drain_azimuths();
        assert_eq!(headings.len(), 1);
        assert!(headings[0].abs() < 1e-9);
        assert!(h.driver.check_alive().is_ok());
        h.driver.stop().await;
    }

    #[tokio::test]
    async fn test_capture_window_collects_only_inside() {
        let mut h = Harness::new(0.0);

        h.magnetic(1, 1, 1);
        h.magnetic(2, 2, 2);
        h.barrier().await;

        h.driver.start_raw_capture();
        assert!(h.driver.is_capturing());
        h.angle(1820, 0, 0);
        // Consume the roll so the barrier below waits on its own frame
        let roll = timeout(WAIT, h.elevations.recv()).await.unwrap().unwrap();
        assert!((roll - 1820.0 / 32768.0 * 180.0).abs() < 1e-9);
        h.magnetic(10, 20, 30);
        h.magnetic(11, 21, 31);
        h.magnetic(12, 22, 32);
        h.barrier().await;

        let samples = h.driver.end_raw_capture().unwrap();
        assert!(!h.driver.is_capturing());
        h.magnetic(3, 3, 3);
        h.magnetic(4, 4, 4);
        h.barrier().await;

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].magnetic, [10, 20, 30]);
        assert_eq!(samples[2].magnetic, [12, 22, 32]);
        // Attitude at capture time travels with the sample
        assert!((samples[0].attitude.roll - 1820.0 / 32768.0 * 180.0).abs() < 1e-9);

        // No azimuth events while capturing
        assert_eq!(h.drain_azimuths().len(), 4);
        h.driver.stop().await;
    }

    #[tokio::test]
    async fn test_capture_toggles_are_idempotent() {
        let mut h = Harness::new(0.0);

        assert!(h.driver.end_raw_capture().is_none());

        h.driver.start_raw_capture();
        h.magnetic(5, 6, 7);
        h.barrier().await;
        // Second start must not discard what was collected
        h.driver.start_raw_capture();

        assert_eq!(h.driver.end_raw_capture().unwrap().len(), 1);
        assert!(h.driver.end_raw_capture().is_none());
        h.driver.stop().await;
    }

    #[tokio::test]
    async fn test_calibration_swap_applies_to_next_frame() {
        let mut h = Harness::new(0.0);

        h.driver.set_calibration(MagCalibration::new(
            Vector3::new(100.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            Matrix3::identity(),
        ));
        assert_eq!(h.driver.calibration().offset().x, 100.0);

        // Offset removed: (0, 50, 0) is north
        h.magnetic(100, 50, 0);
        let heading = timeout(WAIT, h.azimuths.recv()).await.unwrap().unwrap();
        assert!(heading.abs() < 1e-9);
        h.driver.stop().await;
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let mut h = Harness::new(0.0);
        // Dropping the only sender ends the stream
        h.bytes = mpsc::unbounded_channel().0;

        timeout(WAIT, async {
            while h.driver.check_alive().is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        match h.driver.check_alive() {
            Err(MoonrakerError::TaskFailed { task, reason }) => {
                assert_eq!(task, "imu");
                assert!(reason.contains("sensor read failed"));
            }
            other => panic!("Expected TaskFailed, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut h = Harness::new(0.0);
        assert!(matches!(h.driver.start(), Err(MoonrakerError::Serial(_))));
        h.driver.stop().await;
        assert!(h.driver.check_alive().is_ok());
    }
}
