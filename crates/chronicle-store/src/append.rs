//! The atomic append engine.
//!
//! Every write follows the same sequence under the chronicle lock:
//!
//!   lock → read tail → duplicate check → write one line → unlock
//!
//! An incoming event whose logical content equals the current tail is a
//! retry and is suppressed without writing.  Event shape is validated and
//! the line is serialized before the lock is taken, so a rejected event
//! never contends for it.

use std::path::Path;

use tracing::{debug, info};

use chronicle_contracts::{
    error::{ChronicleError, ChronicleResult},
    event::ChronicleEvent,
};
use chronicle_core::{events_are_identical, is_well_formed_id, link_event, verify_event_id};

use crate::index::{batch_check_duplicates, EventIndexCache};
use crate::lock::{acquire_lock, LockOptions};
use crate::storage::{append_line, serialize_event, tail_chronicle_file};

/// What an append call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The event was written as a new line.
    Appended,
    /// The event repeated the current tail and nothing was written.
    DuplicateSuppressed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    pub lock: LockOptions,
}

impl AppendOptions {
    pub fn with_lock(lock: LockOptions) -> Self {
        Self { lock }
    }
}

/// Reject events that cannot be part of a chain: missing or malformed ids,
/// or an id that does not match the content.
pub fn validate_event_shape(event: &ChronicleEvent) -> ChronicleResult<()> {
    if !is_well_formed_id(&event.event_id) {
        return Err(ChronicleError::validation(format!(
            "eventId '{}' is not a 64-character lowercase hex digest",
            event.event_id
        )));
    }
    if let Some(prev) = &event.previous_event_id {
        if !is_well_formed_id(prev) {
            return Err(ChronicleError::validation(format!(
                "previousEventId '{}' is not a 64-character lowercase hex digest",
                prev
            )));
        }
    }
    if !verify_event_id(event) {
        return Err(ChronicleError::validation(format!(
            "eventId '{}' does not match the event content",
            event.event_id
        )));
    }
    Ok(())
}

/// Append a sealed event exactly as given.
///
/// The event must already carry its id and predecessor link; producers that
/// want the engine to link for them use `append_with_causal_chain`.
pub fn atomic_append_event(
    path: &Path,
    event: &ChronicleEvent,
    options: &AppendOptions,
) -> ChronicleResult<AppendOutcome> {
    validate_event_shape(event)?;
    let line = serialize_event(event)?;

    let lock = acquire_lock(path, &options.lock)?;
    let tail = tail_chronicle_file(path, 1)?.pop();
    let outcome = write_unless_tail(path, tail.as_ref(), event, &line)?;
    lock.release()?;
    Ok(outcome)
}

/// Caller holds the lock.
pub(crate) fn write_unless_tail(
    path: &Path,
    tail: Option<&ChronicleEvent>,
    event: &ChronicleEvent,
    line: &str,
) -> ChronicleResult<AppendOutcome> {
    if tail.is_some_and(|t| events_are_identical(t, event)) {
        debug!(
            path = %path.display(),
            event_id = %event.event_id,
            "event repeats chronicle tail; not appending"
        );
        return Ok(AppendOutcome::DuplicateSuppressed);
    }
    append_line(path, line)?;
    Ok(AppendOutcome::Appended)
}

/// Collapse runs of logically identical consecutive events, keeping the
/// first of each run.
pub fn deduplicate_consecutive_events(events: Vec<ChronicleEvent>) -> Vec<ChronicleEvent> {
    let mut out: Vec<ChronicleEvent> = Vec::with_capacity(events.len());
    for event in events {
        if out.last().is_some_and(|last| events_are_identical(last, &event)) {
            continue;
        }
        out.push(event);
    }
    out
}

/// Result of replaying events from another source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Newly written events, as stored (re-linked into this chronicle).
    pub appended: Vec<ChronicleEvent>,
    /// Events skipped because their content was already present.
    pub skipped: usize,
}

/// Append every event whose logical content is not already in the
/// chronicle (or earlier in `events`), linking each onto the chain.
///
/// Runs under a single lock hold and keeps `cache` current for the path.
pub fn append_missing_events(
    path: &Path,
    events: Vec<ChronicleEvent>,
    cache: &mut EventIndexCache,
    options: &AppendOptions,
) -> ChronicleResult<ReconcileOutcome> {
    let lock = acquire_lock(path, &options.lock)?;

    let duplicates = {
        let index = cache.maintain_event_index(path)?;
        batch_check_duplicates(&events, index)?
    };
    let mut tail_id = tail_chronicle_file(path, 1)?.pop().map(|t| t.event_id);
    let mut outcome = ReconcileOutcome::default();

    for (event, is_duplicate) in events.into_iter().zip(duplicates) {
        if is_duplicate {
            outcome.skipped += 1;
            continue;
        }
        let linked = link_event(event, tail_id.take())?;
        append_line(path, &serialize_event(&linked)?)?;
        cache.record_append(path, &linked)?;
        tail_id = Some(linked.event_id.clone());
        outcome.appended.push(linked);
    }

    lock.release()?;
    info!(
        path = %path.display(),
        appended = outcome.appended.len(),
        skipped = outcome.skipped,
        "reconciled events into chronicle"
    );
    Ok(outcome)
}
