//! ==============================================================================
//! decoders.rs - per sensor value bag decoders
//! ==============================================================================
//!
//! purpose:
//!     turn a loosely typed value bag into an ordered list of named,
//!     unit annotated values. one pure function per sensor type, looked
//!     up by lower-cased sensor name through a registry.
//!
//! rules:
//!     - axis decoders always emit X, Y, Z; missing axes read as zero
//!     - optional-field decoders only emit keys present in the bag
//!     - unknown sensor names fall back to the generic decoder
//!     - no decoder can fail
//!
//! relationships:
//!     - used by: normalizer.rs
//!     - uses: coerce.rs (scalar -> f64)
//!
//! ==============================================================================

use crate::coerce::to_f64;
use crate::domain::{NamedValue, ValueBag};
use std::collections::HashMap;

/// signature shared by every decoder
pub type Decoder = fn(&ValueBag) -> Vec<NamedValue>;

const MS2: &str = "m/s²";
const RAD_S: &str = "rad/s";
const MICRO_TESLA: &str = "µT";
const DEGREES: &str = "degrees";
const METERS: &str = "meters";

fn fixed(bag: &ValueBag, key: &str, decimals: usize) -> String {
    format!("{:.*}", decimals, to_f64(bag.get(key)))
}

/// x, y, z at 6 decimals; `quantity` names what each axis measures
fn axes(bag: &ValueBag, quantity: &str, unit: &str) -> Vec<NamedValue> {
    ["x", "y", "z"]
        .iter()
        .map(|key| {
            let axis = key.to_uppercase();
            NamedValue::new(
                format!("{}-axis {}", axis, quantity),
                fixed(bag, key, 6),
                unit,
                format!("{} along the {} axis", quantity, axis),
            )
        })
        .collect()
}

/// emit one value per (key, decimals, name, unit, description) whose key is in the bag
fn present(bag: &ValueBag, fields: &[(&str, usize, &str, &str, &str)]) -> Vec<NamedValue> {
    fields
        .iter()
        .filter(|(key, ..)| bag.contains_key(*key))
        .map(|(key, decimals, name, unit, description)| {
            NamedValue::new(*name, fixed(bag, key, *decimals), unit, *description)
        })
        .collect()
}

fn bearing(bag: &ValueBag, name: &str, description: &str) -> NamedValue {
    NamedValue::new(name, fixed(bag, "magneticBearing", 2), DEGREES, description)
}

// ==============================================================================
// built-in decoders
// ==============================================================================

pub fn accelerometer(bag: &ValueBag) -> Vec<NamedValue> {
    axes(bag, "acceleration", MS2)
}

pub fn gyroscope(bag: &ValueBag) -> Vec<NamedValue> {
    axes(bag, "angular velocity", RAD_S)
}

pub fn gravity(bag: &ValueBag) -> Vec<NamedValue> {
    axes(bag, "gravity component", MS2)
}

/// bearing mode when the app reports a heading, field mode otherwise
pub fn magnetometer(bag: &ValueBag) -> Vec<NamedValue> {
    if bag.contains_key("magneticBearing") {
        return vec![bearing(bag, "Magnetic bearing", "Bearing relative to magnetic north")];
    }
    axes(bag, "magnetic field", MICRO_TESLA)
}

pub fn magnetometer_uncalibrated(bag: &ValueBag) -> Vec<NamedValue> {
    axes(bag, "magnetic field (uncalibrated)", MICRO_TESLA)
}

pub fn compass(bag: &ValueBag) -> Vec<NamedValue> {
    vec![bearing(bag, "Compass bearing", "Compass heading")]
}

pub fn pedometer(bag: &ValueBag) -> Vec<NamedValue> {
    vec![NamedValue::new("Step count", fixed(bag, "steps", 0), "steps", "Accumulated steps")]
}

pub fn orientation(bag: &ValueBag) -> Vec<NamedValue> {
    present(
        bag,
        &[
            ("qw", 6, "Quaternion W", "", "Quaternion W component"),
            ("qx", 6, "Quaternion X", "", "Quaternion X component"),
            ("qy", 6, "Quaternion Y", "", "Quaternion Y component"),
            ("qz", 6, "Quaternion Z", "", "Quaternion Z component"),
        ],
    )
}

pub fn location(bag: &ValueBag) -> Vec<NamedValue> {
    present(
        bag,
        &[
            ("latitude", 8, "Latitude", DEGREES, "Geographic latitude"),
            ("longitude", 8, "Longitude", DEGREES, "Geographic longitude"),
            ("altitude", 2, "Altitude", METERS, "Height above sea level"),
            ("speed", 2, "Speed", "m/s", "Ground speed"),
            ("bearing", 2, "Bearing", DEGREES, "Direction of travel"),
        ],
    )
}

pub fn barometer(bag: &ValueBag) -> Vec<NamedValue> {
    present(
        bag,
        &[
            ("pressure", 2, "Pressure", "hPa", "Atmospheric pressure"),
            ("altitude", 2, "Barometric altitude", METERS, "Altitude derived from pressure"),
        ],
    )
}

/// one entry per key, value in its natural text form, no unit
pub fn generic(bag: &ValueBag) -> Vec<NamedValue> {
    bag.iter()
        .map(|(key, value)| NamedValue::new(key.as_str(), value.to_string(), "", format!("{} value", key)))
        .collect()
}

// ==============================================================================
// registry
// ==============================================================================

/// sensor name -> decoder, case-insensitive
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Decoder>,
    fallback: Decoder,
}

impl DecoderRegistry {
    /// an empty registry; every name decodes generically
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
            fallback: generic,
        }
    }

    /// all decoders for the streaming app's sensor names
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("accelerometer", accelerometer);
        registry.register("gyroscope", gyroscope);
        registry.register("gravity", gravity);
        registry.register("magnetometer", magnetometer);
        registry.register("magnetometeruncalibrated", magnetometer_uncalibrated);
        registry.register("magnetometer-uncalibrated", magnetometer_uncalibrated);
        registry.register("compass", compass);
        registry.register("pedometer", pedometer);
        registry.register("orientation", orientation);
        registry.register("location", location);
        registry.register("barometer", barometer);
        registry
    }

    /// add or replace the decoder for `name`
    pub fn register(&mut self, name: &str, decoder: Decoder) {
        self.decoders.insert(name.to_lowercase(), decoder);
    }

    pub fn lookup(&self, name: &str) -> Decoder {
        self.decoders
            .get(&name.to_lowercase())
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn decode(&self, name: &str, bag: &ValueBag) -> Vec<NamedValue> {
        (self.lookup(name))(bag)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
