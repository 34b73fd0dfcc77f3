//! Canonicalization and content-hash identity.
//!
//! An event's canonical form is a compact JSON rendering with these rules:
//!
//!   1. Object keys are sorted (byte order) at every depth.
//!   2. Object members whose value is `null` are dropped, so an absent
//!      optional field and an explicit `null` canonicalize identically.
//!   3. Array elements keep their order; `null` elements are kept.
//!   4. Timestamps are already fixed-precision strings (see
//!      `chronicle_contracts::event::timestamp`).
//!   5. Values JSON cannot represent (non-finite floats) serialize as `null`
//!      and therefore fall under rule 2.
//!
//! Two hashes are derived from it:
//!
//! - the **event id**: SHA-256 over the canonical form minus `eventId`.
//!   It commits to `previousEventId`, so it commits to all prior history.
//! - the **content hash**: SHA-256 over the canonical form minus both
//!   `eventId` and `previousEventId`.  It is independent of chain position
//!   and keys duplicate detection.

use std::collections::HashMap;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use chronicle_contracts::{
    error::{ChronicleError, ChronicleResult},
    event::{ChronicleEvent, EventId, EVENT_ID_HEX_LEN},
};

pub const EVENT_ID_FIELD: &str = "eventId";
pub const PREVIOUS_EVENT_ID_FIELD: &str = "previousEventId";

/// Render any JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn event_object(event: &ChronicleEvent) -> ChronicleResult<Map<String, Value>> {
    match serde_json::to_value(event) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ChronicleError::validation(format!(
            "event did not serialize to a JSON object: {}",
            other
        ))),
        Err(e) => Err(ChronicleError::validation(format!(
            "event could not be serialized: {}",
            e
        ))),
    }
}

/// The canonical form of the whole event, `eventId` included.
///
/// This is what the storage layer writes as one NDJSON line.
pub fn canonicalize(event: &ChronicleEvent) -> ChronicleResult<String> {
    Ok(canonical_json(&Value::Object(event_object(event)?)))
}

fn canonical_without(event: &ChronicleEvent, excluded: &[&str]) -> ChronicleResult<String> {
    let mut map = event_object(event)?;
    for field in excluded {
        map.remove(*field);
    }
    Ok(canonical_json(&Value::Object(map)))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compute the content-addressed id of an event.
///
/// Returns a lowercase 64-character hex string.  Any stored `eventId` is
/// ignored; `previousEventId` is included.
pub fn compute_event_id(event: &ChronicleEvent) -> ChronicleResult<EventId> {
    let canonical = canonical_without(event, &[EVENT_ID_FIELD])?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn compute_event_ids(events: &[ChronicleEvent]) -> ChronicleResult<Vec<EventId>> {
    events.iter().map(compute_event_id).collect()
}

/// Recompute the id and compare it against the stored one.
///
/// An event that cannot be serialized never verifies.
pub fn verify_event_id(event: &ChronicleEvent) -> bool {
    match compute_event_id(event) {
        Ok(id) => id == event.event_id,
        Err(_) => false,
    }
}

/// True when `id` has the shape of an event id.
pub fn is_well_formed_id(id: &str) -> bool {
    id.len() == EVENT_ID_HEX_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Hash of the event's logical content, independent of identity and chain
/// position.
pub fn content_hash(event: &ChronicleEvent) -> ChronicleResult<String> {
    let canonical = canonical_without(event, &[EVENT_ID_FIELD, PREVIOUS_EVENT_ID_FIELD])?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// True when two events carry the same logical content.
///
/// Identity fields are excluded, so an event whose id was corrupted, or a
/// retry re-linked onto a newer tail, still compares equal to the original.
pub fn events_are_identical(a: &ChronicleEvent, b: &ChronicleEvent) -> bool {
    match (content_hash(a), content_hash(b)) {
        (Ok(ha), Ok(hb)) => ha == hb,
        _ => false,
    }
}

/// Linear duplicate check against a full event list.
pub fn is_duplicate_event(event: &ChronicleEvent, events: &[ChronicleEvent]) -> bool {
    events.iter().any(|existing| events_are_identical(event, existing))
}

/// Group event indices by content hash.  Only groups with more than one
/// member are returned, each in ascending index order, and the groups are
/// ordered by their first member.
pub fn find_duplicate_events(events: &[ChronicleEvent]) -> ChronicleResult<Vec<Vec<usize>>> {
    let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (idx, event) in events.iter().enumerate() {
        let hash = content_hash(event)?;
        let bucket = buckets.entry(hash.clone()).or_default();
        if bucket.is_empty() {
            order.push(hash);
        }
        bucket.push(idx);
    }

    Ok(order
        .into_iter()
        .filter_map(|hash| buckets.remove(&hash))
        .filter(|group| group.len() > 1)
        .collect())
}

/// Fingerprint of a whole chronicle: SHA-256 over the ordered event ids,
/// each terminated by `\n`.
pub fn compute_chronicle_hash(events: &[ChronicleEvent]) -> String {
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(event.event_id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
