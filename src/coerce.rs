//! best-effort numeric coercion and accuracy labels

use crate::domain::Scalar;

/// convert a value bag scalar to f64
///
/// integers widen, floats pass through, everything else (strings included,
/// even numeric looking ones) is 0.0. never fails.
pub fn to_f64(value: Option<&Scalar>) -> f64 {
    match value {
        Some(Scalar::Float(v)) => *v,
        Some(Scalar::Int(v)) => *v as f64,
        Some(Scalar::UInt(v)) => *v as f64,
        Some(Scalar::Bool(_))
        | Some(Scalar::Text(_))
        | Some(Scalar::Null)
        | Some(Scalar::Other(_))
        | None => 0.0,
    }
}

/// sensor accuracy code -> text
pub fn accuracy_text(accuracy: i64) -> &'static str {
    match accuracy {
        0 => "unreliable",
        1 => "low",
        2 => "medium",
        3 => "high",
        _ => "unknown",
    }
}
