//! Scale link management
//!
//! Handles the connection lifecycle and timed reads against the scale.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::transport::{PortControl, PortEvent, SerialTransport};
use super::{
    DeviceError, WeightReading, DEFAULT_BAUD_RATE, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PORT_NAME,
    DEFAULT_READ_TIMEOUT_MS,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the port
    Connecting,
    /// Connected and idle
    Connected,
    /// A timed read is in progress
    Reading,
}

/// Scale link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Bound on opening the port in milliseconds
    pub connection_timeout_ms: u64,
    /// Reading window in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT_NAME.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl DeviceSettings {
    /// Settings for `port_name` at `baud_rate` with default timeouts
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Snapshot of the link for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub state: ConnectionState,
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

/// State shared with the port monitor task
struct LinkShared {
    state: Mutex<ConnectionState>,
    /// Sample sink of the read in progress, if any
    sink: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LinkShared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn drop_sink(&self) {
        lock(&self.sink).take();
    }
}

/// An open port and the task watching its events
struct ActivePort {
    control: Box<dyn PortControl>,
    monitor: JoinHandle<()>,
}

impl Drop for ActivePort {
    fn drop(&mut self) {
        // The reader notices the dropped receiver on its next send and stops
        self.monitor.abort();
    }
}

/// Consume port events for one connection
///
/// Lines are handed to the read in progress (and dropped otherwise); error and
/// close notifications force the link to Disconnected without raising
/// anything to callers.
async fn monitor_port(
    mut events: mpsc::Receiver<PortEvent>,
    shared: Arc<LinkShared>,
    port: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            PortEvent::Line(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match lock(&shared.sink).as_ref() {
                    Some(sink) => {
                        tracing::debug!(port = %port, data = %line, "Scale data received");
                        let _ = sink.send(line.to_string());
                    }
                    None => tracing::trace!(port = %port, data = %line, "Ignoring idle scale output"),
                }
            }
            PortEvent::Error(message) => {
                tracing::error!(port = %port, error = %message, "Scale port error");
                shared.set_state(ConnectionState::Disconnected);
                shared.drop_sink();
            }
            PortEvent::Closed => {
                tracing::warn!(port = %port, "Scale port closed");
                shared.set_state(ConnectionState::Disconnected);
                shared.drop_sink();
            }
        }
    }

    // Event stream ended without a notification; treat as a disconnect
    if shared.state() != ConnectionState::Disconnected {
        tracing::warn!(port = %port, "Scale disconnected");
        shared.set_state(ConnectionState::Disconnected);
    }
    shared.drop_sink();
}

/// The single serial connection to the scale
pub struct DeviceLink {
    settings: DeviceSettings,
    transport: Arc<dyn SerialTransport>,
    shared: Arc<LinkShared>,
    port: tokio::sync::Mutex<Option<ActivePort>>,
}

impl DeviceLink {
    /// Create a new link (not yet connected)
    pub fn new(settings: DeviceSettings, transport: Arc<dyn SerialTransport>) -> Self {
        Self {
            settings,
            transport,
            shared: Arc::new(LinkShared {
                state: Mutex::new(ConnectionState::Disconnected),
                sink: Mutex::new(None),
            }),
            port: tokio::sync::Mutex::new(None),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Reading
        )
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            state: self.state(),
            port_name: self.settings.port_name.clone(),
            baud_rate: self.settings.baud_rate,
            read_timeout_ms: self.settings.read_timeout_ms,
        }
    }

    /// Open the port, bounded by the connection timeout
    ///
    /// Does nothing if already connected.
    pub async fn connect(&self) -> Result<(), DeviceError> {
        let mut port = self.port.lock().await;
        if self.is_connected() {
            tracing::debug!(port = %self.settings.port_name, "Scale already connected");
            return Ok(());
        }

        // Left behind by a passive disconnect
        if let Some(stale) = port.take() {
            if let Err(e) = stale.control.close().await {
                tracing::warn!(port = %self.settings.port_name, error = %e, "Failed to release stale port");
            }
        }

        let port_name = &self.settings.port_name;
        let timeout = self.settings.connection_timeout();
        self.shared.set_state(ConnectionState::Connecting);

        let handle = match tokio::time::timeout(timeout, self.transport.open(&self.settings)).await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(DeviceError::connection(port_name, e));
            }
            Err(_) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(DeviceError::connection(
                    port_name,
                    DeviceError::Timeout {
                        port: port_name.clone(),
                        after: timeout,
                    },
                ));
            }
        };

        let (events, control) = handle.into_parts();
        // Connected must be visible before the monitor can report a disconnect
        self.shared.set_state(ConnectionState::Connected);
        let monitor = tokio::spawn(monitor_port(
            events,
            Arc::clone(&self.shared),
            port_name.clone(),
        ));
        *port = Some(ActivePort { control, monitor });

        tracing::info!(
            port = %port_name,
            baud_rate = self.settings.baud_rate,
            "Connected to scale"
        );
        Ok(())
    }

    /// Collect scale output for `timeout` and build a reading from it
    ///
    /// Always resolves at the deadline, with whatever arrived (possibly
    /// nothing). Fails immediately with [`DeviceError::Busy`] while another
    /// read is in progress.
    pub async fn read_once(&self, timeout: Duration) -> Result<WeightReading, DeviceError> {
        let port_name = &self.settings.port_name;
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut state = lock(&self.shared.state);
            match *state {
                ConnectionState::Reading => return Err(DeviceError::Busy(port_name.clone())),
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    return Err(DeviceError::NotConnected(port_name.clone()))
                }
                ConnectionState::Connected => *state = ConnectionState::Reading,
            }
            *lock(&self.shared.sink) = Some(tx);
        }

        let deadline = Instant::now() + timeout;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut samples = Vec::new();
        let mut open = true;
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                sample = rx.recv(), if open => match sample {
                    Some(sample) => samples.push(sample),
                    None => {
                        tracing::warn!(port = %port_name, "Scale went away during read, waiting for deadline");
                        open = false;
                    }
                },
            }
        }

        self.shared.drop_sink();
        {
            let mut state = lock(&self.shared.state);
            if *state == ConnectionState::Reading {
                *state = ConnectionState::Connected;
            }
        }

        let reading = WeightReading::from_samples(samples);
        if reading.is_empty() {
            tracing::warn!(port = %port_name, "No data received from scale");
        } else {
            tracing::info!(
                port = %port_name,
                weight = ?reading.weight_text,
                readings = reading.raw_samples.len(),
                "Scale reading completed"
            );
        }
        Ok(reading)
    }

    /// Release the port
    ///
    /// Idempotent; the link ends up Disconnected even if closing fails.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut port = self.port.lock().await;
        let Some(active) = port.take() else {
            self.shared.set_state(ConnectionState::Disconnected);
            return Ok(());
        };

        active.monitor.abort();
        self.shared.drop_sink();
        let result = active.control.close().await;
        self.shared.set_state(ConnectionState::Disconnected);

        match &result {
            Ok(()) => tracing::info!(port = %self.settings.port_name, "Scale disconnected successfully"),
            Err(e) => {
                tracing::error!(port = %self.settings.port_name, error = %e, "Error during scale disconnection")
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_settings_default() {
        let settings = DeviceSettings::default();
        assert_eq!(settings.port_name, "COM2");
        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(settings.connection_timeout(), Duration::from_millis(3000));
        assert_eq!(settings.read_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_new_link_is_disconnected() {
        let link = DeviceLink::new(
            DeviceSettings::default(),
            Arc::new(crate::device::SimulatedScaleTransport),
        );
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let link = DeviceLink::new(
            DeviceSettings::default(),
            Arc::new(crate::device::SimulatedScaleTransport),
        );
        let err = link.read_once(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotConnected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_scale_round_trip() {
        let link = DeviceLink::new(
            DeviceSettings::default(),
            Arc::new(crate::device::SimulatedScaleTransport),
        );
        link.connect().await.unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);

        let reading = link.read_once(Duration::from_secs(2)).await.unwrap();
        assert!(!reading.is_empty());
        assert!(reading.weight_text.is_some());
        assert_eq!(link.state(), ConnectionState::Connected);

        link.disconnect().await.unwrap();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        link.disconnect().await.unwrap();
    }
}
