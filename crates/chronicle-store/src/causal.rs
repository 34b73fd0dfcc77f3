//! Causal chain manager: the file-backed half of the hash chain.
//!
//! `append_with_causal_chain` is the producer-facing write path.  It derives
//! the predecessor link from the actual current tail while holding the
//! chronicle lock, so every stored event commits to the entire history
//! before it and concurrent producers cannot fork the chain.

use std::path::Path;

use tracing::debug;

use chronicle_contracts::{
    error::ChronicleResult,
    event::{ChronicleEvent, EventId},
};
use chronicle_core::{events_are_identical, link_event};

use crate::append::{write_unless_tail, AppendOptions};
use crate::lock::acquire_lock;
use crate::storage::{read_chronicle_file, serialize_event, tail_chronicle_file};

/// The `eventId` of the last event, or `None` for an empty or missing log.
pub fn get_chain_tail(path: &Path) -> ChronicleResult<Option<EventId>> {
    Ok(tail_chronicle_file(path, 1)?.pop().map(|e| e.event_id))
}

/// Link `event` onto the current tail, seal it, and append it.
///
/// Any `eventId`/`previousEventId` already on `event` are overwritten.
/// Returns the event as stored.  If its content repeats the tail (a retry),
/// the existing tail is returned and nothing is written.
pub fn append_with_causal_chain(
    path: &Path,
    event: ChronicleEvent,
    options: &AppendOptions,
) -> ChronicleResult<ChronicleEvent> {
    let lock = acquire_lock(path, &options.lock)?;
    let tail = tail_chronicle_file(path, 1)?.pop();

    if let Some(existing) = tail.as_ref().filter(|t| events_are_identical(t, &event)) {
        debug!(
            path = %path.display(),
            event_id = %existing.event_id,
            "event repeats chronicle tail; returning stored event"
        );
        let existing = existing.clone();
        lock.release()?;
        return Ok(existing);
    }

    let linked = link_event(event, tail.as_ref().map(|t| t.event_id.clone()))?;
    let line = serialize_event(&linked)?;
    write_unless_tail(path, tail.as_ref(), &linked, &line)?;
    lock.release()?;

    debug!(
        path = %path.display(),
        event_id = %linked.event_id,
        kind = %linked.kind(),
        "chronicle event appended"
    );
    Ok(linked)
}

/// The chain from genesis to tail, in order.
pub fn get_complete_chain(path: &Path) -> ChronicleResult<Vec<ChronicleEvent>> {
    read_chronicle_file(path)
}
