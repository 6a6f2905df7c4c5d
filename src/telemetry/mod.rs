//! Telemetry table shared with the robot control system.
//!
//! The table is a flat, string-keyed, last-write-wins store. The pipeline
//! writes its results into it and reads the operator's control flags back
//! out of it. Transports implement `TelemetryTable`; `InMemoryTable` is the
//! in-process implementation used in tests and offline runs.

mod mqtt;
mod schema;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttTable};
pub use schema::{encode_closest, encode_json, keys, StreamTelemetry, TelemetrySnapshot};

#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl TelemetryValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::String(value) => match value.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::String(value) => value.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Text form used on transports that carry plain payloads.
    pub fn to_payload(&self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Number(value) => value.to_string(),
            Self::String(value) => value.clone(),
        }
    }

    /// Inverse of `to_payload`. Anything that is not a boolean or a number
    /// stays a string.
    pub fn from_payload(payload: &str) -> Self {
        match payload {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            other => match other.parse::<f64>() {
                Ok(number) if number.is_finite() => Self::Number(number),
                _ => Self::String(other.to_string()),
            },
        }
    }
}

/// Key/value accessor over the shared table.
pub trait TelemetryTable: Send + Sync {
    fn get(&self, key: &str) -> Option<TelemetryValue>;

    fn put(&self, key: &str, value: TelemetryValue) -> Result<()>;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(default)
    }

    fn get_number(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|value| value.as_number())
            .unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, TelemetryValue::Bool(value))
    }

    fn put_number(&self, key: &str, value: f64) -> Result<()> {
        self.put(key, TelemetryValue::Number(value))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, TelemetryValue::String(value.to_string()))
    }
}

/// Process-local table.
#[derive(Debug, Default)]
pub struct InMemoryTable {
    values: Mutex<HashMap<String, TelemetryValue>>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every key currently set.
    pub fn snapshot(&self) -> HashMap<String, TelemetryValue> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

impl TelemetryTable for InMemoryTable {
    fn get(&self, key: &str) -> Option<TelemetryValue> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: TelemetryValue) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow!("telemetry table lock poisoned"))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_table_is_last_write_wins() {
        let table = InMemoryTable::new();
        table.put_number("Latency", 12.0).unwrap();
        table.put_number("Latency", 14.0).unwrap();
        assert_eq!(table.get_number("Latency", 0.0), 14.0);
    }

    #[test]
    fn defaults_apply_to_missing_or_mistyped_keys() {
        let table = InMemoryTable::new();
        assert!(table.get_bool("Enabled", true));
        assert_eq!(table.get_number("CPU Temp", 0.0), 0.0);

        table.put_string("Enabled", "maybe").unwrap();
        assert!(table.get_bool("Enabled", true));
    }

    #[test]
    fn payload_text_round_trips_types() {
        assert_eq!(TelemetryValue::from_payload("true"), TelemetryValue::Bool(true));
        assert_eq!(TelemetryValue::from_payload("72.5"), TelemetryValue::Number(72.5));
        assert_eq!(
            TelemetryValue::from_payload("Running"),
            TelemetryValue::String("Running".into())
        );
        assert_eq!(TelemetryValue::from_payload(""), TelemetryValue::String(String::new()));
        assert_eq!(TelemetryValue::Number(3.0).to_payload(), "3");
    }

    #[test]
    fn string_payloads_coerce_for_readers() {
        let value = TelemetryValue::String("86".into());
        assert_eq!(value.as_number(), Some(86.0));
        assert_eq!(TelemetryValue::String("false".into()).as_bool(), Some(false));
    }
}
