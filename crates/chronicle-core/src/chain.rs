//! Causal-chain primitives: linking, derivation, validation, re-threading.
//!
//! A chain is valid when the first event has no predecessor and every later
//! event's `previousEventId` equals the `eventId` of the event immediately
//! before it in file order.  Id correctness is a separate check
//! (`verify_event_id`); validation here looks only at the links.

use chrono::SubsecRound;

use chronicle_contracts::{
    error::ChronicleResult,
    event::{ChronicleEvent, EventId},
    report::{ChainLink, ChainValidation},
};

use crate::canonical::compute_event_id;

/// Attach `previous` as the event's predecessor and seal it with its
/// content-addressed id.
///
/// The timestamp is truncated to the millisecond wire precision first, so
/// the sealed event equals what a later read of its stored line returns.
pub fn link_event(
    mut event: ChronicleEvent,
    previous: Option<EventId>,
) -> ChronicleResult<ChronicleEvent> {
    event.timestamp = event.timestamp.trunc_subsecs(3);
    event.previous_event_id = previous;
    event.event_id = compute_event_id(&event)?;
    Ok(event)
}

/// Derive `{event, previousId, index}` tuples for an existing sequence.
pub fn build_causal_chain(events: &[ChronicleEvent]) -> Vec<ChainLink<'_>> {
    events
        .iter()
        .enumerate()
        .map(|(index, event)| ChainLink {
            event,
            previous_id: event.previous_event_id.as_deref(),
            index,
        })
        .collect()
}

/// Check one link: what `events[index]` declares against what precedes it.
///
/// Returns the reason the link is broken, or `None` when it holds or
/// `index` is out of range.
pub fn link_break_reason(events: &[ChronicleEvent], index: usize) -> Option<String> {
    let event = events.get(index)?;
    let declared = event.previous_event_id.as_deref();

    if index == 0 {
        return declared.map(|prev| {
            format!(
                "first event '{}' declares predecessor '{}' but must be genesis",
                event.event_id, prev
            )
        });
    }

    let actual = events[index - 1].event_id.as_str();
    match declared {
        Some(prev) if prev == actual => None,
        Some(prev) => Some(format!(
            "event '{}' at index {} links to '{}' but its predecessor is '{}'",
            event.event_id, index, prev, actual
        )),
        None => Some(format!(
            "event '{}' at index {} has no predecessor link but follows '{}'",
            event.event_id, index, actual
        )),
    }
}

/// Walk the sequence and stop at the first broken link.  An empty sequence
/// is valid.
pub fn validate_causal_chain(events: &[ChronicleEvent]) -> ChainValidation {
    for index in 0..events.len() {
        if let Some(reason) = link_break_reason(events, index) {
            return ChainValidation::broken(index, reason);
        }
    }
    ChainValidation::valid()
}

/// Every index whose link is broken, not just the first.
pub fn find_chain_breaks(events: &[ChronicleEvent]) -> Vec<usize> {
    (0..events.len())
        .filter(|&index| link_break_reason(events, index).is_some())
        .collect()
}

/// Re-link `events` into a fresh epoch: the first becomes genesis and each
/// later event points at its new predecessor, with ids recomputed.
///
/// Returns the re-threaded events and how many of them differ from their
/// input (link or id changed).
pub fn rethread_chain(events: Vec<ChronicleEvent>) -> ChronicleResult<(Vec<ChronicleEvent>, usize)> {
    let mut out: Vec<ChronicleEvent> = Vec::with_capacity(events.len());
    let mut changed = 0;

    for event in events {
        let previous = out.last().map(|e| e.event_id.clone());
        let original_prev = event.previous_event_id.clone();
        let original_id = event.event_id.clone();

        let linked = link_event(event, previous)?;
        if linked.previous_event_id != original_prev || linked.event_id != original_id {
            changed += 1;
        }
        out.push(linked);
    }

    Ok((out, changed))
}
