//! Memory usage sensor.

use anyhow::{Context, Result};
use std::fs;
use wiresense::{Producer, Reading};

/// Memory usage sensor.
pub struct MemorySensor;

impl MemorySensor {
    /// Creates a new memory sensor.
    pub fn new() -> Self {
        Self
    }

    fn field(content: &str, key: &str) -> Option<u64> {
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix(key) {
                return rest.split_whitespace().next()?.parse().ok();
            }
        }
        None
    }

    fn parse(content: &str) -> Option<Reading> {
        let total_kb = Self::field(content, "MemTotal:")?;
        let available_kb = Self::field(content, "MemAvailable:")?;
        if total_kb == 0 {
            return None;
        }
        let used = total_kb.saturating_sub(available_kb);
        Some(
            Reading::new()
                .with("used_percent", 100.0 * (used as f64 / total_kb as f64))
                .with("available_mb", (available_kb / 1024) as i64),
        )
    }
}

impl Default for MemorySensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer for MemorySensor {
    fn read(&mut self) -> Result<Reading> {
        let content =
            fs::read_to_string("/proc/meminfo").context("Failed to read /proc/meminfo")?;
        Self::parse(&content).context("MemTotal or MemAvailable missing from /proc/meminfo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiresense::Value;

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       8192000 kB\nMemFree:  100 kB\nMemAvailable:   2048000 kB\n";
        let reading = MemorySensor::parse(meminfo).unwrap();
        assert_eq!(reading.get("used_percent"), Some(Value::Float(75.0)));
        assert_eq!(reading.get("available_mb"), Some(Value::Integer(2000)));
    }

    #[test]
    fn test_missing_fields() {
        assert!(MemorySensor::parse("MemTotal: 10 kB\n").is_none());
        assert!(MemorySensor::parse("MemTotal: 0 kB\nMemAvailable: 0 kB\n").is_none());
    }
}
