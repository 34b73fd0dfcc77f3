//! Result types produced by chain validation, analysis, and repair.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::event::{ChronicleEvent, EventId};

/// One event together with its position and declared predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink<'a> {
    pub event: &'a ChronicleEvent,
    pub previous_id: Option<&'a str>,
    pub index: usize,
}

/// Outcome of walking a sequence of events and checking every
/// `previousEventId` against the actual predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChainValidation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            broken_at_index: None,
            reason: None,
        }
    }

    pub fn broken(index: usize, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            broken_at_index: Some(index),
            reason: Some(reason.into()),
        }
    }
}

/// A line that could not be parsed as an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorruptLine {
    /// 1-based line number within the file.
    pub line_number: usize,
    pub error: String,
}

/// Read-only integrity summary of one chronicle file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChronicleAnalysis {
    pub path: PathBuf,
    /// Parsed events (corrupt lines excluded).
    pub total_events: usize,
    /// Events whose logical content repeats an earlier event.
    pub duplicate_count: usize,
    /// Indices (into the parsed events) whose `previousEventId` does not
    /// match the actual predecessor.
    pub chain_breaks: Vec<usize>,
    /// Indices whose `eventId` does not match their content.
    pub invalid_ids: Vec<usize>,
    pub corrupt_line_count: usize,
    /// Id of the last event in the intact prefix of the chain.
    pub last_valid_event_id: Option<EventId>,
    /// Whole-log fingerprint over the ordered event ids.
    pub chronicle_hash: String,
}

impl ChronicleAnalysis {
    /// True when a repair would change nothing.
    pub fn is_healthy(&self) -> bool {
        self.duplicate_count == 0
            && self.chain_breaks.is_empty()
            && self.invalid_ids.is_empty()
            && self.corrupt_line_count == 0
    }
}

/// What a repair run changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChronicleRepairResult {
    /// Surviving events whose link or id had to be rewritten.
    pub fixed_count: usize,
    /// Corrupt lines plus duplicate events dropped.
    pub removed_count: usize,
    /// Where the original file was copied before being replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Fingerprint of the superseded epoch; `None` when nothing changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_epoch_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tail_id: Option<EventId>,
}

impl ChronicleRepairResult {
    pub fn unchanged(tail: Option<EventId>) -> Self {
        Self {
            fixed_count: 0,
            removed_count: 0,
            backup_path: None,
            prior_epoch_hash: None,
            new_tail_id: tail,
        }
    }

    pub fn changed_anything(&self) -> bool {
        self.fixed_count > 0 || self.removed_count > 0
    }
}
