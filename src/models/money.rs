//! Money is kept in paise (`i64`) everywhere inside the service and shown as
//! rupees on the wire.

use serde::{Deserialize, Deserializer, Serializer};

pub const PAISE_PER_RUPEE: i64 = 100;

/// Converts a rupee amount to paise, rounding to the nearest paisa.
/// Returns `None` for NaN, infinities and values outside the `i64` range.
pub fn from_rupees(rupees: f64) -> Option<i64> {
    if !rupees.is_finite() {
        return None;
    }

    let paise = (rupees * PAISE_PER_RUPEE as f64).round();
    if paise.abs() >= i64::MAX as f64 {
        return None;
    }

    Some(paise as i64)
}

pub fn to_rupees(paise: i64) -> f64 {
    paise as f64 / PAISE_PER_RUPEE as f64
}

/// Reads a rupee amount that may arrive as a JSON number or a numeric string.
pub fn parse_rupees(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(from_rupees),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().and_then(from_rupees),
        _ => None,
    }
}

/// `#[serde(with = "money::rupees")]` for `i64` paise fields.
pub mod rupees {
    use super::*;

    pub fn serialize<S>(paise: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(to_rupees(*paise))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rupees = f64::deserialize(deserializer)?;
        from_rupees(rupees).ok_or_else(|| serde::de::Error::custom("amount out of range"))
    }
}
