//! Host sensors.
//!
//! Each sensor reads `/proc` and implements [`wiresense::Producer`].

mod cpu;
mod load;
mod memory;

pub use cpu::CpuSensor;
pub use load::LoadSensor;
pub use memory::MemorySensor;

use anyhow::{bail, Result};
use wiresense::Producer;

/// Names accepted in the `sensors` list of the daemon configuration.
pub const AVAILABLE: [&str; 3] = ["cpu", "memory", "load"];

/// Creates a built-in sensor by name.
pub fn by_name(name: &str) -> Result<Box<dyn Producer>> {
    match name {
        "cpu" => Ok(Box::new(CpuSensor::new())),
        "memory" => Ok(Box::new(MemorySensor::new())),
        "load" => Ok(Box::new(LoadSensor::new())),
        other => bail!(
            "unknown sensor '{}' (available: {})",
            other,
            AVAILABLE.join(", ")
        ),
    }
}
