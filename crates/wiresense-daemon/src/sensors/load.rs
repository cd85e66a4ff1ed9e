//! Load average sensor.

use anyhow::{Context, Result};
use std::fs;
use wiresense::{Producer, Reading};

/// System load averages over 1, 5 and 15 minutes.
pub struct LoadSensor;

impl LoadSensor {
    pub fn new() -> Self {
        Self
    }

    fn parse(content: &str) -> Option<Reading> {
        let mut fields = content.split_whitespace();
        let mut next = || fields.next()?.parse::<f64>().ok();
        let (one, five, fifteen) = (next()?, next()?, next()?);
        Some(
            Reading::new()
                .with("load_1m", one)
                .with("load_5m", five)
                .with("load_15m", fifteen),
        )
    }
}

impl Default for LoadSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer for LoadSensor {
    fn read(&mut self) -> Result<Reading> {
        let content =
            fs::read_to_string("/proc/loadavg").context("Failed to read /proc/loadavg")?;
        Self::parse(&content).context("Unexpected /proc/loadavg format")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg() {
        let reading = LoadSensor::parse("0.52 0.58 0.59 1/467 12345\n").unwrap();
        assert_eq!(
            reading.keys().collect::<Vec<_>>(),
            ["load_1m", "load_5m", "load_15m"]
        );
        assert_eq!(reading.get("load_15m").unwrap().as_f64(), 0.59);
        assert!(LoadSensor::parse("garbage").is_none());
    }
}
