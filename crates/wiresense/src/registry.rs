//! Names of live sensors and where their logs are.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::{Error, Result, FORBIDDEN_NAME_CHARS};

/// Shared map of sensor name to CSV path.
///
/// Used to reject duplicate names and by the server to find the file a
/// frontend asks for.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sensors: Arc<RwLock<BTreeMap<String, PathBuf>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `name` is well formed and not taken.
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.contains(FORBIDDEN_NAME_CHARS) {
            return Err(Error::Registration(format!(
                "sensor name {:?} must not contain '\\n' or '\\r'",
                name
            )));
        }
        if self.contains(name) {
            return Err(Error::Registration(format!(
                "sensor with name '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    pub fn register(&self, name: &str, path: PathBuf) -> Result<()> {
        self.validate(name)?;
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        if sensors.contains_key(name) {
            return Err(Error::Registration(format!(
                "sensor with name '{}' already exists",
                name
            )));
        }
        sensors.insert(name.to_string(), path);
        Ok(())
    }

    pub fn unregister(&self, name: &str) {
        self.sensors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// CSV path of a registered sensor.
    pub fn csv_path(&self, name: &str) -> Option<PathBuf> {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
