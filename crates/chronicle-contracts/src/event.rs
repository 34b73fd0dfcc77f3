//! Chronicle event types.
//!
//! `ChronicleEvent` is one line of a chronicle: the shared envelope
//! (`eventId`, `type`, `timestamp`, `actor`, `previousEventId`) plus one
//! variant of the closed `EventPayload` union.  On the wire the payload's
//! fields sit beside the envelope fields in a single flat JSON object:
//!
//! ```json
//! {"actor":{"agentId":"a-1","agentType":"planner"},"eventId":"9f86…",
//!  "from":"src/a.rs","previousEventId":"1b4f…","timestamp":"2026-01-01T00:00:00.000Z",
//!  "to":"src/b.rs","type":"FileRenamed"}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;

/// Lowercase hex SHA-256 content hash.
pub type EventId = String;

/// Length of a hex-encoded SHA-256 digest.
pub const EVENT_ID_HEX_LEN: usize = 64;

/// One entry of a chronicle.
///
/// `event_id` and `previous_event_id` are assigned at append time by the
/// chain manager; producers build events with [`ChronicleEvent::draft`] and
/// never set them by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChronicleEvent {
    /// Content hash over every other field, `previous_event_id` included.
    #[serde(default)]
    pub event_id: EventId,

    /// Fixed-precision UTC timestamp (millisecond ISO-8601).
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    pub actor: Actor,

    /// The `event_id` of the preceding entry, or `None` at the start of an
    /// epoch.
    #[serde(default)]
    pub previous_event_id: Option<EventId>,

    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ChronicleEvent {
    /// Build an unsealed event: no id, no predecessor link.
    pub fn draft(actor: Actor, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            event_id: String::new(),
            timestamp,
            actor,
            previous_event_id: None,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// True for the first event of an epoch.
    pub fn is_genesis(&self) -> bool {
        self.previous_event_id.is_none()
    }

    /// True once an id has been assigned.
    pub fn is_sealed(&self) -> bool {
        !self.event_id.is_empty()
    }

    pub fn is_plan_event(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::PlanDrafted
                | EventKind::PlanApproved
                | EventKind::PlanDenied
                | EventKind::PlanUnsafe
        )
    }

    pub fn is_file_event(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::FileAdded
                | EventKind::FileRemoved
                | EventKind::FileRenamed
                | EventKind::FileSplit
                | EventKind::FileMerged
        )
    }
}

/// Select the events of one kind, preserving chronicle order.
pub fn filter_by_kind(events: &[ChronicleEvent], kind: EventKind) -> Vec<&ChronicleEvent> {
    events.iter().filter(|e| e.kind() == kind).collect()
}

/// Whether an environment variable was introduced, changed, or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvvarOperation {
    Set,
    Modified,
    Unset,
}

/// The type-specific body of an event.  The variant name is the wire `type`
/// tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventPayload {
    /// A plan was written and is awaiting review.
    PlanDrafted {
        plan_id: String,
        title: String,
        #[serde(default)]
        steps: Vec<String>,
    },

    PlanApproved {
        plan_id: String,
        approved_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    PlanDenied {
        plan_id: String,
        denied_by: String,
        reason: String,
    },

    /// Safety review rejected a plan outright.
    PlanUnsafe {
        plan_id: String,
        reason: String,
        #[serde(default)]
        violations: Vec<String>,
    },

    /// The agent stopped itself and is surfacing a report to an operator.
    HaltAndReport {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Out-of-band state was brought back in line with the chronicle.
    Reconciliation {
        summary: String,
        #[serde(default)]
        resolved_event_ids: Vec<EventId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },

    /// A file changed without a corresponding chronicle entry.
    RogueEditDetected {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_hash: Option<String>,
        actual_hash: String,
    },

    Build {
        command: String,
        success: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_summary: Option<String>,
    },

    Deploy {
        target: String,
        version: String,
        success: bool,
    },

    /// Values are never recorded, only a digest.
    EnvvarChange {
        name: String,
        operation: EnvvarOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_digest: Option<String>,
    },

    Postmortem {
        incident: String,
        summary: String,
        #[serde(default)]
        contributing_factors: Vec<String>,
        #[serde(default)]
        action_items: Vec<String>,
    },

    FileAdded {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_hash: Option<String>,
    },

    FileRemoved {
        path: String,
    },

    FileRenamed {
        from: String,
        to: String,
    },

    FileSplit {
        source: String,
        targets: Vec<String>,
    },

    FileMerged {
        sources: Vec<String>,
        target: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::PlanDrafted { .. } => EventKind::PlanDrafted,
            EventPayload::PlanApproved { .. } => EventKind::PlanApproved,
            EventPayload::PlanDenied { .. } => EventKind::PlanDenied,
            EventPayload::PlanUnsafe { .. } => EventKind::PlanUnsafe,
            EventPayload::HaltAndReport { .. } => EventKind::HaltAndReport,
            EventPayload::Reconciliation { .. } => EventKind::Reconciliation,
            EventPayload::RogueEditDetected { .. } => EventKind::RogueEditDetected,
            EventPayload::Build { .. } => EventKind::Build,
            EventPayload::Deploy { .. } => EventKind::Deploy,
            EventPayload::EnvvarChange { .. } => EventKind::EnvvarChange,
            EventPayload::Postmortem { .. } => EventKind::Postmortem,
            EventPayload::FileAdded { .. } => EventKind::FileAdded,
            EventPayload::FileRemoved { .. } => EventKind::FileRemoved,
            EventPayload::FileRenamed { .. } => EventKind::FileRenamed,
            EventPayload::FileSplit { .. } => EventKind::FileSplit,
            EventPayload::FileMerged { .. } => EventKind::FileMerged,
        }
    }
}

/// Fieldless mirror of `EventPayload`, for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PlanDrafted,
    PlanApproved,
    PlanDenied,
    PlanUnsafe,
    HaltAndReport,
    Reconciliation,
    RogueEditDetected,
    Build,
    Deploy,
    EnvvarChange,
    Postmortem,
    FileAdded,
    FileRemoved,
    FileRenamed,
    FileSplit,
    FileMerged,
}

impl EventKind {
    pub const ALL: [EventKind; 16] = [
        EventKind::PlanDrafted,
        EventKind::PlanApproved,
        EventKind::PlanDenied,
        EventKind::PlanUnsafe,
        EventKind::HaltAndReport,
        EventKind::Reconciliation,
        EventKind::RogueEditDetected,
        EventKind::Build,
        EventKind::Deploy,
        EventKind::EnvvarChange,
        EventKind::Postmortem,
        EventKind::FileAdded,
        EventKind::FileRemoved,
        EventKind::FileRenamed,
        EventKind::FileSplit,
        EventKind::FileMerged,
    ];

    /// The wire `type` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlanDrafted => "PlanDrafted",
            EventKind::PlanApproved => "PlanApproved",
            EventKind::PlanDenied => "PlanDenied",
            EventKind::PlanUnsafe => "PlanUnsafe",
            EventKind::HaltAndReport => "HaltAndReport",
            EventKind::Reconciliation => "Reconciliation",
            EventKind::RogueEditDetected => "RogueEditDetected",
            EventKind::Build => "Build",
            EventKind::Deploy => "Deploy",
            EventKind::EnvvarChange => "EnvvarChange",
            EventKind::Postmortem => "Postmortem",
            EventKind::FileAdded => "FileAdded",
            EventKind::FileRemoved => "FileRemoved",
            EventKind::FileRenamed => "FileRenamed",
            EventKind::FileSplit => "FileSplit",
            EventKind::FileMerged => "FileMerged",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Millisecond-precision RFC 3339 timestamps with a `Z` suffix.
///
/// A single rendering keeps hashes stable across a write/read cycle.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
