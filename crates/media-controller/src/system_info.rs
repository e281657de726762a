//! Host resource usage, sampled for the `system` admission probe.

use sysinfo::System;

/// CPU and memory usage of the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemInfo {
    /// Global CPU usage, 0.0..=1.0.
    pub cpu_usage: f64,
    /// Used memory over total memory, 0.0..=1.0.
    pub memory_usage: f64,
}

impl SystemInfo {
    /// The higher of the two usages.
    #[must_use]
    pub fn peak(&self) -> f64 {
        self.cpu_usage.max(self.memory_usage)
    }
}

/// Reusable sampler. CPU usage is computed between consecutive refreshes,
/// so the first sample may report zero CPU.
pub struct SystemSampler {
    system: System,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn sample(&mut self) -> SystemInfo {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpu_usage = f64::from(self.system.global_cpu_info().cpu_usage()) / 100.0;

        let total = self.system.total_memory();
        #[allow(clippy::cast_precision_loss)]
        let memory_usage = if total > 0 {
            self.system.used_memory() as f64 / total as f64
        } else {
            0.0
        };

        SystemInfo {
            cpu_usage: cpu_usage.clamp(0.0, 1.0),
            memory_usage: memory_usage.clamp(0.0, 1.0),
        }
    }
}

/// One-shot sample with a fresh sampler.
#[must_use]
pub fn gather_system_info() -> SystemInfo {
    SystemSampler::new().sample()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_are_fractions() {
        let mut sampler = SystemSampler::new();
        for _ in 0..3 {
            let info = sampler.sample();
            assert!((0.0..=1.0).contains(&info.cpu_usage));
            assert!((0.0..=1.0).contains(&info.memory_usage));
        }
    }

    #[test]
    fn test_peak_takes_larger_usage() {
        let info = SystemInfo {
            cpu_usage: 0.25,
            memory_usage: 0.75,
        };
        assert!((info.peak() - 0.75).abs() < f64::EPSILON);
        assert!(gather_system_info().peak() <= 1.0);
    }
}
