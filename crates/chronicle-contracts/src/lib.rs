//! # chronicle-contracts
//!
//! Shared types for the agent chronicle: the event model, validation and
//! repair reports, and the error type.
//!
//! No business logic lives in this crate, only data definitions.

pub mod actor;
pub mod error;
pub mod event;
pub mod report;

pub use actor::{Actor, AgentId, AgentType};
pub use error::{ChronicleError, ChronicleResult, ErrorCode};
pub use event::{
    filter_by_kind, ChronicleEvent, EnvvarOperation, EventId, EventKind, EventPayload,
    EVENT_ID_HEX_LEN,
};
pub use report::{
    ChainLink, ChainValidation, ChronicleAnalysis, ChronicleRepairResult, CorruptLine,
};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn actor() -> Actor {
        Actor::new("planner", "planner-1")
    }

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600 + secs, 0).unwrap()
    }

    // ── Wire format ──────────────────────────────────────────────────────────

    #[test]
    fn event_serializes_flat_with_type_tag() {
        let event = ChronicleEvent::draft(
            actor(),
            at(0),
            EventPayload::FileRenamed {
                from: "src/a.rs".to_string(),
                to: "src/b.rs".to_string(),
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "FileRenamed");
        assert_eq!(value["from"], "src/a.rs");
        assert_eq!(value["to"], "src/b.rs");
        assert_eq!(value["actor"]["agentType"], "planner");
        assert_eq!(value["actor"]["agentId"], "planner-1");
        assert_eq!(value["timestamp"], "2026-01-01T00:00:00.000Z");
        assert!(value["previousEventId"].is_null());
    }

    #[test]
    fn event_parses_from_wire_json() {
        let raw = json!({
            "eventId": "ab".repeat(32),
            "type": "PlanApproved",
            "timestamp": "2026-01-01T00:00:05.250Z",
            "actor": { "agentType": "reviewer", "agentId": "r-7" },
            "previousEventId": "cd".repeat(32),
            "planId": "plan-1",
            "approvedBy": "operator"
        });

        let event: ChronicleEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind(), EventKind::PlanApproved);
        assert_eq!(event.previous_event_id.as_deref(), Some("cd".repeat(32).as_str()));
        match &event.payload {
            EventPayload::PlanApproved { plan_id, approved_by, note } => {
                assert_eq!(plan_id, "plan-1");
                assert_eq!(approved_by, "operator");
                assert!(note.is_none());
            }
            other => panic!("expected PlanApproved, got {:?}", other),
        }
    }

    #[test]
    fn missing_previous_event_id_means_genesis() {
        let raw = json!({
            "eventId": "ab".repeat(32),
            "type": "FileRemoved",
            "timestamp": "2026-01-01T00:00:00.000Z",
            "actor": { "agentType": "executor", "agentId": "e-1" },
            "path": "old.rs"
        });

        let event: ChronicleEvent = serde_json::from_value(raw).unwrap();
        assert!(event.is_genesis());
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let raw = json!({
            "eventId": "",
            "type": "Teleported",
            "timestamp": "2026-01-01T00:00:00.000Z",
            "actor": { "agentType": "executor", "agentId": "e-1" }
        });

        assert!(serde_json::from_value::<ChronicleEvent>(raw).is_err());
    }

    #[test]
    fn timestamp_is_rendered_with_millisecond_precision() {
        let ts = Utc.timestamp_opt(1_767_225_600, 123_456_789).unwrap();
        assert_eq!(event::timestamp::format(&ts), "2026-01-01T00:00:00.123Z");
    }

    // ── Discrimination helpers ───────────────────────────────────────────────

    #[test]
    fn kind_tags_round_trip_through_parse() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("Nope"), None);
    }

    #[test]
    fn plan_and_file_predicates() {
        let plan = ChronicleEvent::draft(
            actor(),
            at(0),
            EventPayload::PlanDenied {
                plan_id: "p".to_string(),
                denied_by: "op".to_string(),
                reason: "too broad".to_string(),
            },
        );
        let file = ChronicleEvent::draft(
            actor(),
            at(1),
            EventPayload::FileMerged {
                sources: vec!["a.rs".to_string(), "b.rs".to_string()],
                target: "c.rs".to_string(),
            },
        );

        assert!(plan.is_plan_event());
        assert!(!plan.is_file_event());
        assert!(file.is_file_event());
        assert!(!file.is_plan_event());
        assert!(!plan.is_sealed());
    }

    #[test]
    fn filter_by_kind_keeps_order() {
        let events = vec![
            ChronicleEvent::draft(actor(), at(0), EventPayload::FileRemoved { path: "a".into() }),
            ChronicleEvent::draft(
                actor(),
                at(1),
                EventPayload::Deploy {
                    target: "staging".into(),
                    version: "1.2.0".into(),
                    success: true,
                },
            ),
            ChronicleEvent::draft(actor(), at(2), EventPayload::FileRemoved { path: "b".into() }),
        ];

        let removed = filter_by_kind(&events, EventKind::FileRemoved);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].timestamp, at(0));
        assert_eq!(removed[1].timestamp, at(2));
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn error_codes_are_stable() {
        let io = ChronicleError::io(
            "read",
            PathBuf::from("/tmp/x.ndjson"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(io.code().as_str(), "IO");
        assert!(io.to_string().contains("/tmp/x.ndjson"));
        assert!(io.to_string().contains("read"));

        assert_eq!(ChronicleError::validation("bad").code().as_str(), "VALIDATION");
        assert_eq!(
            ChronicleError::Config { reason: "x".into() }.code(),
            ErrorCode::Validation
        );

        let timeout = ChronicleError::LockTimeout {
            lock_path: PathBuf::from("/tmp/x.ndjson.lock"),
            waited_ms: 250,
        };
        assert_eq!(timeout.code().as_str(), "LOCK_TIMEOUT");
        assert!(timeout.is_retryable());

        let halt = ChronicleError::Halt { reason: "broken link at 3".into() };
        assert_eq!(halt.code().to_string(), "HALT");
        assert!(!halt.is_retryable());
    }

    #[test]
    fn actor_spawn_generates_distinct_ids() {
        let a = Actor::spawn("executor");
        let b = Actor::spawn("executor");
        assert_eq!(a.agent_type, b.agent_type);
        assert_ne!(a.agent_id, b.agent_id);
    }

    #[test]
    fn analysis_health_reflects_findings() {
        let mut analysis = ChronicleAnalysis {
            path: PathBuf::from("c.ndjson"),
            total_events: 3,
            duplicate_count: 0,
            chain_breaks: vec![],
            invalid_ids: vec![],
            corrupt_line_count: 0,
            last_valid_event_id: None,
            chronicle_hash: String::new(),
        };
        assert!(analysis.is_healthy());

        analysis.chain_breaks.push(2);
        assert!(!analysis.is_healthy());
    }
}
