//! Fixed-period scheduler
//!
//! Fires a [`CycleTask`] every period, never letting two cycles overlap. A
//! tick that finds the previous cycle still running is dropped, not queued.
//! Shutdown waits for the in-flight cycle and then releases the scale and the
//! gateway.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cycle::CycleTask;
use crate::device::DeviceLink;
use crate::gateway::GatewayClient;

/// Default time between cycles, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Disconnects that failed while shutting down
#[derive(Error, Debug)]
#[error("Shutdown incomplete: {}", .failures.join("; "))]
pub struct ShutdownError {
    pub failures: Vec<String>,
}

/// What to do with a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Run,
    /// The previous cycle is still running
    SkipBusy,
    /// Shutdown has been requested
    SkipShutdown,
}

/// Counters exposed for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_panicked: u64,
    pub ticks_skipped: u64,
    pub busy: bool,
    pub shutting_down: bool,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    skipped: AtomicU64,
}

/// Holds the busy flag for the lifetime of one cycle
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives cycles at a fixed period
pub struct Scheduler {
    period: Duration,
    task: Arc<dyn CycleTask>,
    device: Arc<DeviceLink>,
    gateway: Arc<GatewayClient>,
    shutdown: AtomicBool,
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Scheduler {
    pub fn new(
        period: Duration,
        task: Arc<dyn CycleTask>,
        device: Arc<DeviceLink>,
        gateway: Arc<GatewayClient>,
    ) -> Self {
        Self {
            period,
            task,
            device,
            gateway,
            shutdown: AtomicBool::new(false),
            busy: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop firing new cycles; the running one is allowed to finish
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            cycles_started: self.counters.started.load(Ordering::Relaxed),
            cycles_completed: self.counters.completed.load(Ordering::Relaxed),
            cycles_panicked: self.counters.panicked.load(Ordering::Relaxed),
            ticks_skipped: self.counters.skipped.load(Ordering::Relaxed),
            busy: self.is_busy(),
            shutting_down: self.is_shutting_down(),
        }
    }

    /// Decide what to do with the current tick
    pub fn decide(&self) -> TickDecision {
        if self.is_shutting_down() {
            TickDecision::SkipShutdown
        } else if self.is_busy() {
            TickDecision::SkipBusy
        } else {
            TickDecision::Run
        }
    }

    fn spawn_cycle(&self) -> JoinHandle<()> {
        let guard = BusyGuard::acquire(&self.busy);
        let task = Arc::clone(&self.task);
        let counters = Arc::clone(&self.counters);
        counters.started.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let _guard = guard;
            match tokio::spawn(async move { task.run_cycle().await }).await {
                Ok(_) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_panic() => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Poll cycle panicked");
                }
                Err(e) => tracing::error!(error = %e, "Poll cycle aborted"),
            }
        })
    }

    /// Run until `shutdown` resolves, then shut down gracefully
    ///
    /// The first cycle starts immediately. Returns an error if releasing the
    /// scale or the gateway failed.
    pub async fn run<F: Future>(&self, shutdown: F) -> Result<(), ShutdownError> {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut in_flight: Option<JoinHandle<()>> = None;
        tracing::info!(period_secs = self.period.as_secs_f64(), "Scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, starting graceful shutdown");
                    break;
                }
                _ = ticker.tick() => match self.decide() {
                    TickDecision::Run => in_flight = Some(self.spawn_cycle()),
                    TickDecision::SkipBusy => {
                        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Previous cycle still running, skipping tick");
                    }
                    TickDecision::SkipShutdown => break,
                },
            }
        }

        self.request_shutdown();
        if let Some(cycle) = in_flight.take() {
            if !cycle.is_finished() {
                tracing::info!("Waiting for in-flight cycle to finish");
            }
            let _ = cycle.await;
        }

        self.release().await
    }

    /// Disconnect the scale, then the gateway; both are always attempted
    async fn release(&self) -> Result<(), ShutdownError> {
        let mut failures = Vec::new();
        if let Err(e) = self.device.disconnect().await {
            failures.push(format!("scale: {}", e));
        }
        if let Err(e) = self.gateway.disconnect().await {
            failures.push(format!("gateway: {}", e));
        }

        if failures.is_empty() {
            tracing::info!("Shutdown completed");
            Ok(())
        } else {
            tracing::error!(failures = ?failures, "Error during shutdown");
            Err(ShutdownError { failures })
        }
    }
}
