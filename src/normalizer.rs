//! ==============================================================================
//! normalizer.rs - envelope bytes -> normalized message
//! ==============================================================================
//!
//! purpose:
//!     decode one pushed envelope, run every reading through its decoder and
//!     collect per message statistics (types, counts, time span).
//!
//! the only failure is a malformed envelope. anything wrong inside a value
//! bag degrades to zeros or omitted entries in the decoders.
//!
//! relationships:
//!     - used by: web.rs (ingest handler)
//!     - uses: decoders.rs, coerce.rs, domain.rs
//!
//! ==============================================================================

use crate::coerce::accuracy_text;
use crate::decoders::DecoderRegistry;
use crate::domain::{NormalizedMessage, NormalizedReading, RawMessage, RawReading, TimeRange};

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

const READABLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum NormalizeError {
    /// body is not a json envelope of the expected shape
    #[error("malformed sensor message: {0}")]
    MalformedInput(#[from] serde_json::Error),
}

/// stateless apart from its decoder table; safe to share across tasks
#[derive(Clone, Default)]
pub struct Normalizer {
    registry: DecoderRegistry,
}

impl Normalizer {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self { registry }
    }

    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedMessage, NormalizeError> {
        let raw: RawMessage = serde_json::from_slice(bytes)?;
        Ok(self.normalize_message(raw, Utc::now()))
    }

    /// build the normalized form of an already decoded envelope
    pub fn normalize_message(&self, raw: RawMessage, received_at: DateTime<Utc>) -> NormalizedMessage {
        let mut sensor_counts: HashMap<String, usize> = HashMap::new();
        let mut span: Option<(i64, i64)> = None;
        let mut readings = Vec::with_capacity(raw.payload.len());

        for reading in &raw.payload {
            *sensor_counts.entry(reading.name.clone()).or_insert(0) += 1;
            span = Some(match span {
                None => (reading.time, reading.time),
                Some((lo, hi)) => (lo.min(reading.time), hi.max(reading.time)),
            });
            readings.push(self.normalize_reading(reading));
        }

        let sensor_types: Vec<String> = sensor_counts
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let time_range = span
            .map(|(lo, hi)| TimeRange {
                start: Utc.timestamp_nanos(lo),
                end: Utc.timestamp_nanos(hi),
            })
            .unwrap_or_default();

        NormalizedMessage {
            message_id: raw.message_id,
            session_id: raw.session_id,
            device_id: raw.device_id,
            total_readings: readings.len(),
            sensor_types,
            sensor_counts,
            time_range,
            readings,
            received_at,
        }
    }

    pub fn normalize_reading(&self, reading: &RawReading) -> NormalizedReading {
        let timestamp = Utc.timestamp_nanos(reading.time);
        NormalizedReading {
            sensor_type: reading.name.clone(),
            timestamp,
            readable_time_text: timestamp.format(READABLE_TIME_FORMAT).to_string(),
            accuracy_text: accuracy_text(reading.accuracy).to_string(),
            values: self.registry.decode(&reading.name, &reading.values),
        }
    }
}
