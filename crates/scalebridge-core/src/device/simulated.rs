//! Simulated scale
//!
//! Produces realistic scale output for running the bridge without hardware.
//! The platform alternates between empty and loaded; while loaded the reading
//! settles on a random target weight with a little noise.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::transport::{PortEvent, PortHandle, ReaderTask, SerialTransport, PORT_EVENT_CAPACITY};
use super::weight::format_weight;
use super::{DeviceError, DeviceSettings};

/// Interval between simulated lines
pub const SIM_LINE_INTERVAL_MS: u64 = 250;

/// Simulated platform state
#[derive(Debug, Clone, Copy, PartialEq)]
enum Platform {
    /// Nothing on the scale
    Empty { until_ms: u64 },
    /// A load is on the scale
    Loaded { target: f64, until_ms: u64 },
}

/// Scale simulator that generates one output line per call
pub struct ScaleSimulator {
    platform: Platform,
    current: f64,
    rng: StdRng,
}

impl Default for ScaleSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleSimulator {
    /// Create a simulator seeded from entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a deterministic simulator
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let target = rng.gen_range(0.5..150.0);
        Self {
            platform: Platform::Loaded {
                target,
                until_ms: rng.gen_range(8000..20000),
            },
            current: 0.0,
            rng,
        }
    }

    /// Advance to `elapsed_ms` and return the line the scale would print
    pub fn next_line(&mut self, elapsed_ms: u64) -> String {
        match self.platform {
            Platform::Loaded { until_ms, .. } if elapsed_ms >= until_ms => {
                self.platform = Platform::Empty {
                    until_ms: elapsed_ms + self.rng.gen_range(3000..8000),
                };
            }
            Platform::Empty { until_ms } if elapsed_ms >= until_ms => {
                self.platform = Platform::Loaded {
                    target: self.rng.gen_range(0.5..150.0),
                    until_ms: elapsed_ms + self.rng.gen_range(8000..20000),
                };
            }
            _ => {}
        }

        let target = match self.platform {
            Platform::Empty { .. } => 0.0,
            Platform::Loaded { target, .. } => target,
        };

        // Settle towards the target, unstable ("US") until close enough
        self.current += (target - self.current) * 0.7;
        let stable = (target - self.current).abs() < 0.002;
        if stable {
            self.current = target;
        }

        let noise = if stable || target == 0.0 {
            0.0
        } else {
            self.rng.gen_range(-0.004..0.004)
        };
        let shown = (self.current + noise).clamp(0.0, 999.999);

        format!(
            "{},GS,+{}kg",
            if stable { "ST" } else { "US" },
            format_weight(shown)
        )
    }
}

/// [`SerialTransport`] that feeds lines from a [`ScaleSimulator`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedScaleTransport;

#[async_trait]
impl SerialTransport for SimulatedScaleTransport {
    async fn open(&self, settings: &DeviceSettings) -> Result<PortHandle, DeviceError> {
        let (tx, rx) = mpsc::channel(PORT_EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut sim = ScaleSimulator::new();
            let start = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(Duration::from_millis(SIM_LINE_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let line = sim.next_line(start.elapsed().as_millis() as u64);
                        if tx.send(PortEvent::Line(line)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::info!(port = %settings.port_name, "Using simulated scale");
        Ok(PortHandle::new(
            rx,
            Box::new(ReaderTask::new(&settings.port_name, cancel, task)),
        ))
    }
}
