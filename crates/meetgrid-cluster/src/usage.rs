//! Host resource sampling for comprehensive heartbeats.

use std::sync::Mutex;

use meetgrid_state::ResourceUsage;
use sysinfo::System;

/// Samples process-host CPU and memory utilization.
///
/// CPU usage is measured between consecutive samples, so the first sample
/// after construction may read 0.
pub struct SystemUsage {
    system: Mutex<System>,
}

impl SystemUsage {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Refresh and return utilization, both values in 0.0–100.0.
    pub fn sample(&self) -> ResourceUsage {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };
        ResourceUsage {
            cpu_percent: clamp_percent(f64::from(system.global_cpu_usage())),
            memory_percent: clamp_percent(memory_percent),
        }
    }
}

impl Default for SystemUsage {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
