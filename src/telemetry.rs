//! Unit telemetry as delivered by the realtime source.
//!
//! Source documents are untyped JSON. Every numeric field goes through
//! [`coerce_numeric`] here, so the rest of the crate works on plain `f64`s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// All units of one building keyed by unit id.
pub type UnitsSnapshot = BTreeMap<String, UnitSnapshot>;

/// Parse a number out of an untyped field.
///
/// Numbers pass through, strings yield their longest leading float prefix
/// (`"12.5W"` -> 12.5), everything else is 0. Non-finite results are 0.
pub fn coerce_numeric(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_float_prefix(s),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn parse_float_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;

    while end < bytes.len() {
        let b = bytes[end];
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }

    // Back off a dangling exponent marker ("1e", "1e-") so "1e" parses as 1.
    let mut candidate = &s[..end];
    while !candidate.is_empty() {
        if let Ok(v) = candidate.parse::<f64>() {
            return v;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    0.0
}

/// One telemetry sample for a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub power: f64,
    pub current: f64,
    pub voltage: f64,
    pub remaining_credit: f64,
    /// Remaining prepaid energy in kWh
    pub remaining_energy: f64,
}

/// Live state of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSnapshot {
    pub power: f64,
    pub current: f64,
    pub voltage: f64,
    pub remaining_credit: f64,
    pub remaining_energy: f64,
    pub is_active: bool,
    pub name: Option<String>,
    pub access_code_hash: Option<String>,
    pub tenant_info: Option<Value>,
    /// Source-side timestamp, kept verbatim
    pub timestamp: Option<String>,
}

impl Default for UnitSnapshot {
    fn default() -> Self {
        Self {
            power: 0.0,
            current: 0.0,
            voltage: 0.0,
            remaining_credit: 0.0,
            remaining_energy: 0.0,
            is_active: true,
            name: None,
            access_code_hash: None,
            tenant_info: None,
            timestamp: None,
        }
    }
}

impl UnitSnapshot {
    /// Build a snapshot from a source document. Never fails: missing or
    /// malformed fields fall back to defaults.
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).map(coerce_numeric).unwrap_or(0.0);
        let text = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Self {
            power: field("power"),
            current: field("current"),
            voltage: field("voltage"),
            remaining_credit: field("remaining_credit"),
            remaining_energy: field("remaining_units"),
            is_active: value
                .get("isActive")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            name: text("name"),
            access_code_hash: text("accessCode"),
            tenant_info: value.get("tenantInfo").filter(|v| !v.is_null()).cloned(),
            timestamp: text("timestamp"),
        }
    }

    /// Freeze the numeric state into a reading taken at `at`.
    pub fn reading_at(&self, at: DateTime<Utc>) -> Reading {
        Reading {
            timestamp: at,
            power: self.power,
            current: self.current,
            voltage: self.voltage,
            remaining_credit: self.remaining_credit,
            remaining_energy: self.remaining_energy,
        }
    }
}

/// Parse a building's `units` document. Anything but a JSON object is an
/// empty building.
pub fn parse_units(doc: &Value) -> UnitsSnapshot {
    match doc.as_object() {
        Some(obj) => obj
            .iter()
            .map(|(id, unit)| (id.clone(), UnitSnapshot::from_value(unit)))
            .collect(),
        None => UnitsSnapshot::new(),
    }
}
