// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carry-forward resolution against the last persisted record.
//!
//! Controllers drop fields, report blanks, and occasionally reset cumulative
//! counters. When a minute's record is first created, declared fields that
//! sanitization left absent are filled from the most recent persisted record
//! for the same source, and cumulative counters are never allowed to regress
//! below their last persisted value. Fields absent from both the new reading
//! and the prior record stay omitted — the store never sees nulls.

use crate::sanitize::{coerce_numeric, RuleTable};
use serde_json::{Map, Value};

/// Fills gaps in a sanitized field-group from the prior persisted record and
/// applies monotonic correction.
///
/// Only called when creating a minute's record for the first time; an
/// idempotent re-flush of the same minute bypasses resolution entirely so a
/// repeat write cannot re-derive stale fallbacks.
pub fn resolve_fields(
    sanitized: &Map<String, Value>,
    prior: &Map<String, Value>,
    rules: &RuleTable,
    is_monotonic: fn(&str) -> bool,
) -> Map<String, Value> {
    let mut out = sanitized.clone();

    for name in rules.keys() {
        if out.contains_key(name) {
            continue;
        }
        if let Some(prev) = prior.get(name) {
            out.insert(name.clone(), prev.clone());
        }
    }

    for (name, prev) in prior {
        if !is_monotonic(name) {
            continue;
        }
        let prev_n = match coerce_numeric(prev) {
            Some(n) => n,
            None => continue,
        };
        let regressed = out
            .get(name)
            .and_then(coerce_numeric)
            .map(|current| current < prev_n)
            .unwrap_or(false);
        if regressed {
            out.insert(name.clone(), prev.clone());
        }
    }

    out
}
