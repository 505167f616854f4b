//! Serial transport boundary
//!
//! A transport opens the scale port and hands back a [`PortHandle`]: a finite
//! channel of [`PortEvent`]s produced by a single reader task, plus the means
//! to stop that task and release the port.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{DeviceError, DeviceSettings};

/// Capacity of the per-port event channel
pub const PORT_EVENT_CAPACITY: usize = 64;

/// Notification emitted by an open port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// One line of device output, delimiter removed
    Line(String),
    /// The port reported an error; the reader has stopped
    Error(String),
    /// The port was closed or the device went away
    Closed,
}

/// Abstraction over the way the scale port is opened
#[async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open the port described by `settings`
    async fn open(&self, settings: &DeviceSettings) -> Result<PortHandle, DeviceError>;
}

/// Release side of an open port
#[async_trait]
pub trait PortControl: Send + Sync {
    /// Stop producing events and release the port
    async fn close(&self) -> Result<(), DeviceError>;
}

/// An open port: its event stream and its close capability
pub struct PortHandle {
    events: mpsc::Receiver<PortEvent>,
    control: Box<dyn PortControl>,
}

impl PortHandle {
    pub fn new(events: mpsc::Receiver<PortEvent>, control: Box<dyn PortControl>) -> Self {
        Self { events, control }
    }

    /// Split into the event receiver and the close capability
    pub fn into_parts(self) -> (mpsc::Receiver<PortEvent>, Box<dyn PortControl>) {
        (self.events, self.control)
    }
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle").finish_non_exhaustive()
    }
}

/// [`PortControl`] for transports backed by one spawned reader task
pub struct ReaderTask {
    port: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderTask {
    pub fn new(port: &str, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            port: port.to_string(),
            cancel,
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl PortControl for ReaderTask {
    async fn close(&self) -> Result<(), DeviceError> {
        self.cancel.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match task {
            Some(task) => task.await.map_err(|e| DeviceError::Close {
                port: self.port.clone(),
                message: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_task_close_is_idempotent() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        let control = ReaderTask::new("COM2", cancel, task);

        control.close().await.unwrap();
        control.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_task_reports_panicked_reader() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async { panic!("reader blew up") });
        let control = ReaderTask::new("COM2", cancel, task);

        let err = control.close().await.unwrap_err();
        assert!(matches!(err, DeviceError::Close { .. }));
    }
}
