//! Telemetry logic.
//! Support logging and process metrics.
use metrics::{Unit, gauge, with_local_recorder};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;
use std::time::Duration;

use crate::registry::Registry;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` drives the filter, `info` otherwise.
pub fn setup_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
}

/// Samples CPU and memory of the current process into a registry.
pub struct ProcessCollector {
    system: System,
    pid: Pid,
    registry: Arc<Registry>,
}

impl ProcessCollector {
    /// Describe process gauges on `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        with_local_recorder(&*registry, || {
            metrics::describe_gauge!(
                "process_cpu_usage",
                Unit::Percent,
                "CPU usage of the process in percentage."
            );
            metrics::describe_gauge!(
                "process_memory_used_bytes",
                Unit::Bytes,
                "Total process memory in bytes."
            );
            metrics::describe_gauge!(
                "process_virtual_memory_bytes",
                Unit::Bytes,
                "Virtual memory of the process in bytes."
            );
            metrics::describe_gauge!(
                "process_start_time_seconds",
                Unit::Seconds,
                "Start time of the process since unix epoch in seconds."
            );
            metrics::describe_gauge!(
                "process_uptime_seconds",
                Unit::Seconds,
                "Uptime of the process in seconds."
            );
        });

        Self {
            system: System::new_with_specifics(RefreshKind::nothing()),
            pid: Pid::from_u32(std::process::id()),
            registry,
        }
    }

    /// Refresh process information and update gauges.
    pub fn collect(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let Some(process) = self.system.process(self.pid) else {
            tracing::debug!(pid = %self.pid, "process not found, skipping collection");
            return;
        };

        with_local_recorder(&*self.registry, || {
            gauge!("process_cpu_usage").set(process.cpu_usage() as f64);
            gauge!("process_memory_used_bytes").set(process.memory() as f64);
            gauge!("process_virtual_memory_bytes")
                .set(process.virtual_memory() as f64);
            gauge!("process_start_time_seconds")
                .set(process.start_time() as f64);
            gauge!("process_uptime_seconds").set(process.run_time() as f64);
        });
    }

    /// Collect now, then every `every` on a background task.
    pub fn spawn(mut self, every: Duration) {
        self.collect();

        tokio::spawn(async move {
            loop {
                sleep(every).await;
                self.collect();
            }
        });
    }
}
