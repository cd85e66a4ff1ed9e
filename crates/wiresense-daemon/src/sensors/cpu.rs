//! CPU usage sensor.

use anyhow::{Context, Result};
use std::fs;
use wiresense::{Producer, Reading};

/// CPU usage sensor.
///
/// Usage is computed from the delta between two `/proc/stat` samples, so the
/// very first reading reports 0.
pub struct CpuSensor {
    last_idle: u64,
    last_total: u64,
}

impl CpuSensor {
    /// Creates a new CPU sensor.
    pub fn new() -> Self {
        Self {
            last_idle: 0,
            last_total: 0,
        }
    }

    /// Parses (idle, total) jiffies from the aggregate `cpu` line.
    fn parse_stat(content: &str) -> Option<(u64, u64)> {
        let line = content.lines().next()?;
        let parts: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|s| s.parse().ok())
            .collect();

        if parts.len() >= 4 {
            let idle = parts[3];
            let total: u64 = parts.iter().sum();
            Some((idle, total))
        } else {
            None
        }
    }

    fn update(&mut self, idle: u64, total: u64) -> f64 {
        let mut usage = 0.0;
        if self.last_total > 0 {
            let idle_delta = idle.saturating_sub(self.last_idle);
            let total_delta = total.saturating_sub(self.last_total);

            if total_delta > 0 {
                usage = 100.0 * (1.0 - (idle_delta as f64 / total_delta as f64));
            }
        }

        self.last_idle = idle;
        self.last_total = total;
        usage
    }
}

impl Default for CpuSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer for CpuSensor {
    fn read(&mut self) -> Result<Reading> {
        let content = fs::read_to_string("/proc/stat").context("Failed to read /proc/stat")?;
        let (idle, total) =
            Self::parse_stat(&content).context("Unexpected /proc/stat format")?;
        Ok(Reading::new().with("usage_percent", self.update(idle, total)))
    }
}
