// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tolerant accessors over raw job payloads.
//!
//! Buyer tooling varies in where it puts the offering name and the service
//! requirements: some clients populate `job.context`, some only the
//! negotiation memo's JSON content, and key names differ across versions.
//! Every function in this module is total — malformed input yields an absent
//! value, never an error.

use crate::Phase;
use serde_json::{Map, Value};

/// Context/memo keys that never count as service requirements.
const RESERVED_REQUIREMENT_KEYS: [&str; 11] = [
    "name",
    "offeringName",
    "offering",
    "requirement",
    "requirements",
    "serviceRequirements",
    "price",
    "priceValue",
    "priceType",
    "jobFee",
    "memoToSign",
];

/// Keys checked, in priority order, when resolving an offering name from a
/// context map or memo document.
const OFFERING_NAME_KEYS: [&str; 4] = ["jobOfferingName", "offeringName", "offering", "name"];

/// Keys checked, in priority order, when resolving service requirements.
const REQUIREMENT_KEYS: [&str; 3] = ["requirement", "requirements", "serviceRequirements"];

/// Extract the numeric job id. Accepts integers and digit-only strings.
#[must_use]
pub fn job_id(job: &Value) -> Option<u64> {
    match job.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Normalize a wallet address: trim and lowercase. Empty becomes absent.
#[must_use]
pub fn normalize_address(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_ascii_lowercase())
    }
}

/// The job's `providerAddress`, normalized.
#[must_use]
pub fn provider_address(job: &Value) -> Option<String> {
    normalize_address(job.get("providerAddress")?.as_str()?)
}

/// The job's memo list, empty when absent or malformed.
#[must_use]
pub fn memos(job: &Value) -> &[Value] {
    job.get("memos").and_then(Value::as_array).map_or(&[], Vec::as_slice)
}

/// Find the first memo whose `nextPhase` normalizes to `phase`.
#[must_use]
pub fn find_memo_by_next_phase(job: &Value, phase: Phase) -> Option<&Value> {
    memos(job).iter().find(|m| {
        m.get("nextPhase")
            .and_then(Phase::normalize)
            .is_some_and(|p| p == phase)
    })
}

/// Whether any memo's `nextPhase` normalizes to `phase`.
#[must_use]
pub fn has_memo_with_next_phase(job: &Value, phase: Phase) -> bool {
    find_memo_by_next_phase(job, phase).is_some()
}

/// Parse a memo's `content` string as a JSON document.
#[must_use]
pub fn memo_content_json(memo: &Value) -> Option<Value> {
    serde_json::from_str(memo.get("content")?.as_str()?).ok()
}

/// Whether the job already carries a non-empty deliverable.
#[must_use]
pub fn deliverable_present(job: &Value) -> bool {
    match job.get("deliverable") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Object(m)) => !m.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

/// Resolve the logical offering name for a job.
///
/// Priority: `job.context` keys (`jobOfferingName`, `offeringName`,
/// `offering`, `name`), then `job.name`, then the negotiation memo's JSON
/// content with the same key priority.
#[must_use]
pub fn resolve_offering_name(job: &Value) -> Option<String> {
    if let Some(ctx) = job.get("context").and_then(Value::as_object) {
        if let Some(name) = first_nonempty_string(ctx, &OFFERING_NAME_KEYS) {
            return Some(name);
        }
    }

    if let Some(name) = job.get("name").and_then(Value::as_str) {
        let name = name.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    let memo = find_memo_by_next_phase(job, Phase::Negotiation)?;
    let doc = memo_content_json(memo)?;
    let doc = doc.as_object()?;
    first_nonempty_string(doc, &OFFERING_NAME_KEYS)
}

/// Resolve the buyer's service requirements for a job.
///
/// Priority: a map under `job.context.requirement` / `requirements` /
/// `serviceRequirements`; then the same keys inside the negotiation memo's
/// JSON; then, as a last resort, the memo JSON itself minus the reserved key
/// set. Returns an empty map when nothing resolves.
#[must_use]
pub fn resolve_service_requirements(job: &Value) -> Map<String, Value> {
    if let Some(ctx) = job.get("context").and_then(Value::as_object) {
        if let Some(req) = first_map(ctx, &REQUIREMENT_KEYS) {
            return req;
        }
    }

    let Some(doc) = find_memo_by_next_phase(job, Phase::Negotiation).and_then(memo_content_json)
    else {
        return Map::new();
    };
    let Some(doc) = doc.as_object() else {
        return Map::new();
    };

    if let Some(req) = first_map(doc, &REQUIREMENT_KEYS) {
        return req;
    }

    // Last resort: the memo document itself is the intake form.
    doc.iter()
        .filter(|(k, _)| !RESERVED_REQUIREMENT_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn first_nonempty_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        let s = map.get(*k)?.as_str()?.trim();
        if s.is_empty() { None } else { Some(s.to_string()) }
    })
}

fn first_map(map: &Map<String, Value>, keys: &[&str]) -> Option<Map<String, Value>> {
    keys.iter()
        .find_map(|k| map.get(*k)?.as_object().cloned())
}
