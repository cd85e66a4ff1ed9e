//! Readings and the payload sent to the frontend.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// A single metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Integer(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            Value::Integer(_) => true,
            Value::Float(v) => v.is_finite(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! value_from {
    ($variant:ident: $($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from!(Integer: i64, i32, i16, i8, u32, u16, u8);
value_from!(Float: f64, f32);

/// One snapshot of metric name to value.
///
/// Keys are unique and keep the order they were first inserted in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    entries: Vec<(String, Value)>,
}

impl Reading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a metric. An existing key keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Checks that the reading can be sent and logged.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("reading must contain at least one metric".to_string());
        }
        if let Some((name, value)) = self.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("metric '{}' is not finite ({})", name, value));
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Reading {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut reading = Reading::new();
        for (k, v) in iter {
            reading.insert(k, v);
        }
        reading
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Message delivered to the frontend for every reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    /// Sensor name
    pub key: String,
    /// Metrics of this reading
    pub data: Reading,
}

impl Payload {
    pub fn new(key: impl Into<String>, data: Reading) -> Self {
        Self {
            key: key.into(),
            data,
        }
    }

    /// Encodes the payload as the JSON text sent over the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
