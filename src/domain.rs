//! ==============================================================================
//! domain.rs - wire envelope and normalized message types
//! ==============================================================================
//!
//! purpose:
//!     shapes shared by the normalizer, the in-memory store, the sink and
//!     the web handlers.
//!
//! relationships:
//!     - produced by: normalizer.rs (RawMessage -> NormalizedMessage)
//!     - held by: store.rs, sink.rs
//!     - served by: web.rs, dashboard.rs
//!
//! ==============================================================================

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ==============================================================================
// wire input
// ==============================================================================

/// one batch of readings pushed by a device
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub message_id: i64,
    pub session_id: String,
    pub device_id: String,
    pub payload: Vec<RawReading>,
}

/// a single sample as the streaming app sends it
#[derive(Debug, Clone, Deserialize)]
pub struct RawReading {
    pub name: String,
    /// nanoseconds since epoch, sensor clock
    pub time: i64,
    /// sensor specific value bag; absent or null is treated as empty
    #[serde(default, deserialize_with = "nullable_bag")]
    pub values: ValueBag,
    /// absent or null reads as 0
    #[serde(default, deserialize_with = "nullable_accuracy")]
    pub accuracy: i64,
}

/// sensor specific key/value map, ordered by key
pub type ValueBag = BTreeMap<String, Scalar>;

fn nullable_bag<'de, D>(deserializer: D) -> Result<ValueBag, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<ValueBag>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_accuracy<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or_default())
}

/// a decoded json scalar from a value bag
///
/// variant order matters for untagged matching: integers are tried before
/// floats so `3` stays an integer and `3.5` falls through to `Float`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
    /// arrays and objects, kept verbatim
    Other(serde_json::Value),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Text(v) => f.write_str(v),
            Scalar::Null => f.write_str("null"),
            Scalar::Other(v) => write!(f, "{}", v),
        }
    }
}

// ==============================================================================
// normalized output
// ==============================================================================

/// one named, unit annotated value inside a reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedValue {
    pub name: String,
    /// fixed precision text, e.g. "-0.032800"
    pub value_text: String,
    /// may be empty
    pub unit: String,
    pub description: String,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value_text: String, unit: &str, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_text,
            unit: unit.to_string(),
            description: description.into(),
        }
    }
}

/// a reading after decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReading {
    pub sensor_type: String,
    pub timestamp: DateTime<Utc>,
    pub readable_time_text: String,
    pub accuracy_text: String,
    pub values: Vec<NamedValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Default for TimeRange {
    /// both ends at the unix epoch, used for messages with no readings
    fn default() -> Self {
        Self {
            start: Utc.timestamp_nanos(0),
            end: Utc.timestamp_nanos(0),
        }
    }
}

/// the result of normalizing one envelope; never mutated after construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub message_id: i64,
    pub session_id: String,
    pub device_id: String,
    pub total_readings: usize,
    /// sorted, deduplicated
    pub sensor_types: Vec<String>,
    pub sensor_counts: HashMap<String, usize>,
    pub time_range: TimeRange,
    pub readings: Vec<NormalizedReading>,
    pub received_at: DateTime<Utc>,
}
