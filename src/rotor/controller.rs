//! # Rotor Controller
//!
//! One controller per axis. Moves are fire-and-forget writes; the current
//! heading is kept fresh by a background poller that queries the device at
//! a fixed interval and raises a heading event only when the value changes.
//!
//! The poller and command writers share the port through an async mutex so a
//! query and its reply are never interleaved with another command.

use std::io;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::protocol::{
    format_limit, format_move, format_query, parse_heading_response, HeadingQuery, Limit,
    STOP_COMMAND, TERMINATOR,
};
use crate::config::{RotorConfig, SerialConfig};
use crate::error::{MoonrakerError, Result};
use crate::serial::open_port;
use crate::serial::port_trait::{SerialPortIO, MAX_RESPONSE_LEN};
use crate::task::{lock_unpoisoned, BackgroundTask, EventHandler};

type SharedPort = Arc<tokio::sync::Mutex<RotorLink>>;

/// Serial link plus whatever part of a reply has arrived so far.
///
/// Reply bytes are kept here rather than in a read future, so a reply cut
/// off by a timeout is finished by the next read instead of its tail being
/// taken for a reply of its own.
struct RotorLink {
    port: Box<dyn SerialPortIO>,
    partial: Vec<u8>,
}

impl RotorLink {
    fn new(port: Box<dyn SerialPortIO>) -> Self {
        Self {
            port,
            partial: Vec::new(),
        }
    }

    /// Whether an earlier reply was interrupted mid-way
    fn reply_in_progress(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Read one terminated reply. Cancel-safe.
    async fn read_reply(&mut self) -> io::Result<Vec<u8>> {
        loop {
            let byte = self.port.read_byte().await?;
            self.partial.push(byte);
            if byte == TERMINATOR {
                return Ok(mem::take(&mut self.partial));
            }
            if self.partial.len() >= MAX_RESPONSE_LEN {
                self.partial.clear();
            }
        }
    }

    /// Read the reply to the command just written.
    ///
    /// With `stale` set, the first reply completed belongs to an earlier
    /// command and is dropped.
    async fn read_answer(&mut self, mut stale: bool) -> io::Result<Vec<u8>> {
        loop {
            let reply = self.read_reply().await?;
            if !stale {
                return Ok(reply);
            }
            debug!("Dropped late rotor reply {:?}", String::from_utf8_lossy(&reply));
            stale = false;
        }
    }

    /// Write a command and wait up to `limit` for its reply.
    ///
    /// Returns `None` on timeout; any partial reply is kept for later.
    async fn exchange(
        &mut self,
        command: &[u8],
        limit: Duration,
        name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let stale = self.reply_in_progress();
        write_command(&mut *self.port, command, name).await?;

        match timeout(limit, self.read_answer(stale)).await {
            Ok(result) => result
                .map(Some)
                .map_err(|e| MoonrakerError::Serial(format!("{} rotor read failed: {}", name, e))),
            Err(_) => Ok(None),
        }
    }
}

/// Per-device protocol and timing settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotorSettings {
    /// Rotor index in command strings
    pub index: u8,
    /// Heading query variant
    pub query: HeadingQuery,
    /// Delay between heading queries
    pub poll_interval: Duration,
    /// How long to wait for a terminated reply
    pub response_timeout: Duration,
}

impl Default for RotorSettings {
    fn default() -> Self {
        Self {
            index: 1,
            query: HeadingQuery::Bi,
            poll_interval: Duration::from_secs(1),
            response_timeout: Duration::from_secs(1),
        }
    }
}

impl RotorSettings {
    /// Settings from the rotor and serial config sections
    pub fn from_config(rotor: &RotorConfig, serial: &SerialConfig) -> Self {
        Self {
            index: rotor.index,
            query: rotor.query,
            poll_interval: Duration::from_millis(rotor.poll_interval_ms),
            response_timeout: Duration::from_millis(serial.response_timeout_ms),
        }
    }
}

/// Query, parse, publish. Shared by the initial read and the poller.
#[derive(Clone)]
struct HeadingReader {
    name: String,
    port: SharedPort,
    query: String,
    response_timeout: Duration,
    heading: Arc<Mutex<Option<f64>>>,
    on_heading: Arc<Mutex<Option<EventHandler<f64>>>>,
}

impl HeadingReader {
    /// One query cycle.
    ///
    /// A timeout or malformed reply is a missed update, not an error. Only
    /// transport failures are returned.
    async fn read(&self) -> Result<()> {
        let reply = {
            let mut link = self.port.lock().await;
            link.exchange(self.query.as_bytes(), self.response_timeout, &self.name)
                .await?
        };

        let Some(response) = reply else {
            debug!("{} rotor heading query timed out", self.name);
            return Ok(());
        };

        let Some(heading) = parse_heading_response(&response) else {
            debug!(
                "{} rotor sent malformed reply {:?}",
                self.name,
                String::from_utf8_lossy(&response)
            );
            return Ok(());
        };

        let changed = {
            let mut last = lock_unpoisoned(&self.heading);
            let changed = *last != Some(heading);
            *last = Some(heading);
            changed
        };

        if changed {
            let handler = lock_unpoisoned(&self.on_heading).clone();
            if let Some(handler) = handler {
                handler(heading);
            }
        }

        Ok(())
    }
}

async fn write_command(port: &mut dyn SerialPortIO, command: &[u8], name: &str) -> Result<()> {
    port.write_all(command)
        .await
        .map_err(|e| MoonrakerError::Serial(format!("{} rotor write failed: {}", name, e)))?;
    port.flush()
        .await
        .map_err(|e| MoonrakerError::Serial(format!("{} rotor flush failed: {}", name, e)))
}

/// Controller for one rotor axis
pub struct RotorController {
    name: String,
    settings: RotorSettings,
    port: Option<SharedPort>,
    heading: Arc<Mutex<Option<f64>>>,
    on_heading: Arc<Mutex<Option<EventHandler<f64>>>>,
    poller: Option<BackgroundTask>,
}

impl RotorController {
    /// Wrap an already-open port.
    ///
    /// # Arguments
    ///
    /// * `name` - Axis name used in logs (e.g. "AZ")
    /// * `settings` - Protocol and timing settings
    /// * `port` - Serial link to the controller
    pub fn new(name: impl Into<String>, settings: RotorSettings, port: Box<dyn SerialPortIO>) -> Self {
        Self {
            name: name.into(),
            settings,
            port: Some(Arc::new(tokio::sync::Mutex::new(RotorLink::new(port)))),
            heading: Arc::new(Mutex::new(None)),
            on_heading: Arc::new(Mutex::new(None)),
            poller: None,
        }
    }

    /// Open the configured device.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the device path does not exist, `Serial`
    /// if it cannot be opened
    pub fn from_config(name: &str, rotor: &RotorConfig, serial: &SerialConfig) -> Result<Self> {
        let port = open_port(&rotor.port, rotor.baud)?;
        Ok(Self::new(
            name,
            RotorSettings::from_config(rotor, serial),
            Box::new(port),
        ))
    }

    /// Axis name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the heading-changed observer.
    pub fn on_heading<F>(&self, handler: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        *lock_unpoisoned(&self.on_heading) = Some(Arc::new(handler));
    }

    /// Read the heading once, then start the background poller.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the port is closed or the initial query fails
    pub async fn open(&mut self) -> Result<()> {
        let reader = HeadingReader {
            name: self.name.clone(),
            port: Arc::clone(self.port()?),
            query: format_query(self.settings.query, self.settings.index),
            response_timeout: self.settings.response_timeout,
            heading: Arc::clone(&self.heading),
            on_heading: Arc::clone(&self.on_heading),
        };

        reader.read().await?;
        info!(
            "Opened {} rotor, heading {}",
            self.name,
            self.heading()
                .map_or_else(|| "unknown".to_string(), |h| format!("{:.1}", h))
        );

        let poll_interval = self.settings.poll_interval;
        self.poller = Some(BackgroundTask::spawn(
            format!("{} rotor", self.name),
            move |mut signal| async move {
                loop {
                    tokio::select! {
                        _ = signal.cancelled() => return Ok(()),
                        _ = sleep(poll_interval) => {}
                    }
                    tokio::select! {
                        _ = signal.cancelled() => return Ok(()),
                        result = reader.read() => result?,
                    }
                }
            },
        ));

        Ok(())
    }

    /// Command a move. Does not wait for the rotor to get there.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the port is closed or the write fails
    pub async fn turn(&self, heading: f64) -> Result<()> {
        debug!("{} rotor turning to {:.1}", self.name, heading);
        self.send(format_move(self.settings.index, heading).as_bytes())
            .await
    }

    /// Halt motion.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the port is closed or the write fails
    pub async fn stop(&self) -> Result<()> {
        debug!("{} rotor stop", self.name);
        self.send(STOP_COMMAND).await
    }

    /// Set the over-travel limit and return the device's reply.
    pub async fn set_over_travel(&self, degrees: u16) -> Result<Option<String>> {
        self.set_limit(Limit::OverTravel, degrees).await
    }

    /// Set the clockwise limit and return the device's reply.
    pub async fn set_cw_limit(&self, degrees: u16) -> Result<Option<String>> {
        self.set_limit(Limit::Clockwise, degrees).await
    }

    /// Set the counter-clockwise limit and return the device's reply.
    pub async fn set_ccw_limit(&self, degrees: u16) -> Result<Option<String>> {
        self.set_limit(Limit::CounterClockwise, degrees).await
    }

    /// Last polled heading, if any reply has been parsed yet
    pub fn heading(&self) -> Option<f64> {
        *lock_unpoisoned(&self.heading)
    }

    /// Return `TaskFailed` if the poller has died.
    pub fn check_alive(&self) -> Result<()> {
        self.poller.as_ref().map_or(Ok(()), BackgroundTask::check)
    }

    /// Stop the poller and release the port.
    pub async fn close(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop().await;
        }
        if self.port.take().is_some() {
            info!("Closed {} rotor", self.name);
        }
    }

    fn port(&self) -> Result<&SharedPort> {
        self.port
            .as_ref()
            .ok_or_else(|| MoonrakerError::Serial(format!("{} rotor is closed", self.name)))
    }

    async fn send(&self, command: &[u8]) -> Result<()> {
        let mut link = self.port()?.lock().await;
        write_command(&mut *link.port, command, &self.name).await
    }

    async fn set_limit(&self, limit: Limit, degrees: u16) -> Result<Option<String>> {
        let command = format_limit(limit, degrees);
        let reply = {
            let mut link = self.port()?.lock().await;
            link.exchange(command.as_bytes(), self.settings.response_timeout, &self.name)
                .await?
        };

        match reply {
            Some(bytes) => {
                let reply = String::from_utf8_lossy(&bytes)
                    .trim_end_matches(char::from(TERMINATOR))
                    .trim()
                    .to_string();
                info!("{} rotor {} set to {}", self.name, limit.label(), degrees);
                Ok(Some(reply))
            }
            None => {
                warn!(
                    "{} rotor did not acknowledge {} {}",
                    self.name,
                    limit.label(),
                    degrees
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::{MockSerialPort, SnapRotorPort};
    use std::io;

    fn settings() -> RotorSettings {
        RotorSettings {
            index: 1,
            query: HeadingQuery::Bi,
            poll_interval: Duration::from_millis(1000),
            response_timeout: Duration::from_millis(200),
        }
    }

    fn recorder(rotor: &RotorController) -> Arc<Mutex<Vec<f64>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        rotor.on_heading(move |h| sink.lock().unwrap().push(h));
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_reads_initial_heading() {
        let device = SnapRotorPort::new(123.4);
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));
        let events = recorder(&rotor);

        rotor.open().await.unwrap();

        assert_eq!(rotor.heading(), Some(123.4));
        assert_eq!(*events.lock().unwrap(), vec![123.4]);
        assert_eq!(device.commands(), vec!["BI1;".to_string()]);
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_only_reports_changes() {
        let device = SnapRotorPort::new(100.0);
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));
        let events = recorder(&rotor);
        rotor.open().await.unwrap();

        // Three polls of an unchanged heading
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(events.lock().unwrap().len(), 1);
        let queries = device.commands().iter().filter(|c| c.starts_with("BI")).count();
        assert_eq!(queries, 4);

        rotor.turn(120.0).await.unwrap();
        sleep(Duration::from_millis(1000)).await;

        assert_eq!(*events.lock().unwrap(), vec![100.0, 120.0]);
        assert_eq!(rotor.heading(), Some(120.0));
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_and_stop_wire_format() {
        let device = MockSerialPort::new();
        let rotor = RotorController::new(
            "EL",
            RotorSettings {
                index: 2,
                ..settings()
            },
            Box::new(device.clone()),
        );

        rotor.turn(45.0).await.unwrap();
        rotor.stop().await.unwrap();

        assert_eq!(
            device.get_written_data(),
            vec![b"AP2045.0\r;".to_vec(), b";".to_vec()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_query_variant() {
        let device = SnapRotorPort::new(10.0);
        let mut rotor = RotorController::new(
            "AZ",
            RotorSettings {
                query: HeadingQuery::Ai,
                ..settings()
            },
            Box::new(device.clone()),
        );

        rotor.open().await.unwrap();
        assert_eq!(device.commands()[0], "AI1;");
        assert_eq!(rotor.heading(), Some(10.0));
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reply_is_ignored() {
        let device = MockSerialPort::new();
        device.queue_read(b"?>;123.4;");
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));
        let events = recorder(&rotor);

        rotor.open().await.unwrap();
        assert_eq!(rotor.heading(), None);
        assert!(events.lock().unwrap().is_empty());

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(rotor.heading(), Some(123.4));
        assert_eq!(*events.lock().unwrap(), vec![123.4]);
        assert!(rotor.check_alive().is_ok());
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_split_by_timeout_is_not_a_heading() {
        let device = MockSerialPort::new();
        device.queue_read(b"12");
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));
        let events = recorder(&rotor);

        // Initial query times out halfway through "123.4;"
        rotor.open().await.unwrap();
        assert_eq!(rotor.heading(), None);

        // The tail arrives before the next poll; it completes the old reply
        // and is dropped instead of reading as 3.4
        device.queue_read(b"3.4;");
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(rotor.heading(), None);
        assert!(events.lock().unwrap().is_empty());

        // Later replies are read normally
        device.queue_read(b"045.0;");
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(rotor.heading(), Some(45.0));
        assert_eq!(*events.lock().unwrap(), vec![45.0]);
        assert!(rotor.check_alive().is_ok());
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_is_a_missed_update() {
        let device = MockSerialPort::new();
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));

        rotor.open().await.unwrap();
        sleep(Duration::from_millis(2500)).await;

        assert_eq!(rotor.heading(), None);
        assert!(rotor.check_alive().is_ok());
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_kills_poller() {
        let device = MockSerialPort::new();
        device.queue_read(b"050.0;");
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));
        rotor.open().await.unwrap();

        device.set_read_error(io::ErrorKind::BrokenPipe);
        sleep(Duration::from_millis(1500)).await;

        match rotor.check_alive() {
            Err(MoonrakerError::TaskFailed { task, reason }) => {
                assert_eq!(task, "AZ rotor");
                assert!(reason.contains("read failed"));
            }
            other => panic!("Expected TaskFailed, got: {:?}", other),
        }
        // Last known heading is kept
        assert_eq!(rotor.heading(), Some(50.0));
        rotor.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_fails_on_write_error() {
        let device = MockSerialPort::new();
        device.set_write_error(io::ErrorKind::BrokenPipe);
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device));

        assert!(matches!(rotor.open().await, Err(MoonrakerError::Serial(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_setters() {
        let device = SnapRotorPort::new(0.0);
        let rotor = RotorController::new("AZ", settings(), Box::new(device.clone()));

        assert_eq!(rotor.set_over_travel(0).await.unwrap(), Some(String::new()));
        assert_eq!(rotor.set_cw_limit(0).await.unwrap(), Some(String::new()));
        assert_eq!(rotor.set_ccw_limit(90).await.unwrap(), Some(String::new()));

        assert_eq!(
            device.commands(),
            vec!["WU1000;".to_string(), "WI1000;".to_string(), "WH1090;".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_limit_returns_none() {
        let device = MockSerialPort::new();
        let rotor = RotorController::new("AZ", settings(), Box::new(device));

        assert_eq!(rotor.set_over_travel(0).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_close_fail() {
        let device = SnapRotorPort::new(0.0);
        let mut rotor = RotorController::new("AZ", settings(), Box::new(device));
        rotor.open().await.unwrap();
        rotor.close().await;

        match rotor.turn(10.0).await {
            Err(MoonrakerError::Serial(msg)) => assert!(msg.contains("closed")),
            other => panic!("Expected Serial error, got: {:?}", other),
        }
        assert!(rotor.stop().await.is_err());
        assert!(rotor.open().await.is_err());
    }
}
