//! Serial port handling
//!
//! Port discovery and the tokio-serial backed [`SerialTransport`].

use async_trait::async_trait;
use futures::StreamExt;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use super::transport::{PortEvent, PortHandle, ReaderTask, SerialTransport, PORT_EVENT_CAPACITY};
use super::{DeviceError, DeviceSettings};

/// Longest line accepted from the scale; longer lines are dropped
pub const MAX_LINE_LENGTH: usize = 256;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM2")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn named(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                serial_number: usb.serial_number,
            },
            _ => Self::named(info.port_name),
        }
    }
}

/// Sort key so that ttyACM*, ttyUSB* and COM* ports come first, each
/// numerically by suffix, followed by everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let prefixes = ["ttyACM", "ttyUSB", "COM"];
    for (rank, prefix) in prefixes.iter().enumerate() {
        if let Some(rest) = basename.strip_prefix(prefix) {
            if let Ok(num) = rest.parse::<usize>() {
                return (rank as u8, num, basename.to_string());
            }
        }
    }
    (prefixes.len() as u8, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // USB adapters that the enumeration API misses
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::named(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Forward lines from `reader` into `events` until cancelled, closed or failed
pub(crate) async fn pump_lines<R>(
    reader: R,
    port: String,
    events: mpsc::Sender<PortEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => next,
        };

        let event = match next {
            Some(Ok(line)) => PortEvent::Line(line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!(port = %port, "Discarding over-long line from scale");
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => PortEvent::Error(e.to_string()),
            None => PortEvent::Closed,
        };

        let terminal = !matches!(event, PortEvent::Line(_));
        if events.send(event).await.is_err() || terminal {
            break;
        }
    }

    tracing::debug!(port = %port, "Serial reader stopped");
}

/// [`SerialTransport`] over a real serial port (8N1, no flow control)
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSerialTransport;

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    async fn open(&self, settings: &DeviceSettings) -> Result<PortHandle, DeviceError> {
        let port_name = settings.port_name.clone();
        let baud_rate = settings.baud_rate;
        let timeout = settings.connection_timeout();

        // Opening a COM port can block for a long time on some drivers
        let stream = tokio::task::spawn_blocking(move || {
            tokio_serial::new(port_name, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .timeout(timeout)
                .open_native_async()
        })
        .await
        .map_err(|e| DeviceError::Open(e.to_string()))?
        .map_err(|e| DeviceError::Open(e.to_string()))?;

        let (tx, rx) = mpsc::channel(PORT_EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_lines(
            stream,
            settings.port_name.clone(),
            tx,
            cancel.clone(),
        ));

        Ok(PortHandle::new(
            rx,
            Box::new(ReaderTask::new(&settings.port_name, cancel, task)),
        ))
    }
}
