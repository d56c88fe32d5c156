// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-field sanitization of raw controller readings.
//!
//! Every declared numeric field carries exactly one [`FieldRule`]. A value
//! that fails its rule is *absent* from the sanitized output — never null,
//! never a zero placeholder — which downstream code reads as "defer to
//! carry-forward". Fields with no declared rule pass through unmodified.

use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Validation/normalization rule for a single declared field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Numeric range with a fixed decimal precision.
    Range { places: i32, min: f64, max: f64 },
    /// Closed set of integer states (e.g. off/on/fault lamps).
    Enum { allowed: Vec<i64> },
}

/// Field name → rule, declared per source type.
pub type RuleTable = HashMap<String, FieldRule>;

/// Coerces a raw JSON value to a finite number.
///
/// Blank strings, nulls, booleans, and non-finite parses are all invalid.
/// Booleans are rejected on purpose: sources whose contacts report booleans
/// declare a boolean-to-numeric mapper upstream of sanitization.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Rounds half away from zero to the given number of decimal places.
pub fn round_to_places(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Applies a rule to one raw value. `None` means the value failed its rule.
pub fn sanitize_value(raw: &Value, rule: &FieldRule) -> Option<Value> {
    let n = coerce_numeric(raw)?;
    match rule {
        FieldRule::Range { places, min, max } => {
            if n < *min || n > *max {
                return None;
            }
            Number::from_f64(round_to_places(n, *places)).map(Value::Number)
        }
        FieldRule::Enum { allowed } => allowed
            .iter()
            .copied()
            .find(|member| (*member as f64) == n)
            .map(Value::from),
    }
}

/// Sanitizes a whole field-group against a rule table.
///
/// Fields failing their rule are omitted from the result; fields with no
/// rule are stored raw, as observed from the controller.
pub fn sanitize_fields(fields: &Map<String, Value>, rules: &RuleTable) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, raw) in fields {
        match rules.get(name) {
            Some(rule) => {
                if let Some(clean) = sanitize_value(raw, rule) {
                    out.insert(name.clone(), clean);
                }
            }
            None => {
                out.insert(name.clone(), raw.clone());
            }
        }
    }
    out
}
