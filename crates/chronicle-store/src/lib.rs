//! # chronicle-store
//!
//! The durable half of the agent chronicle: an append-only NDJSON log per
//! path, guarded by a cross-process lock, with hash-chained events.
//!
//! ## Overview
//!
//! Producers hand an unsealed event to `append_with_causal_chain` (or to
//! `Chronicle::record`).  Under the chronicle lock the engine reads the
//! current tail, links the event to it, computes its content-hash id, and
//! writes it as one complete line.  A retry of the tail's content is
//! suppressed.  Readers never lock; corrupt lines are skipped and counted.
//! `repair_chronicle` is the only rewrite path and starts a new epoch.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chronicle_store::{Chronicle, ChronicleConfig};
//!
//! let chronicle = Chronicle::new(ChronicleConfig::default());
//! let stored = chronicle.record("/tmp/chronicle/plan-1.ndjson", actor, payload)?;
//! assert_eq!(chronicle.get_chain_tail("/tmp/chronicle/plan-1.ndjson")?, Some(stored.event_id));
//! ```

pub mod append;
pub mod causal;
pub mod chronicle;
pub mod config;
pub mod index;
pub mod lock;
pub mod path;
pub mod repair;
pub mod storage;

pub use append::{
    append_missing_events, atomic_append_event, deduplicate_consecutive_events,
    validate_event_shape, AppendOptions, AppendOutcome, ReconcileOutcome,
};
pub use causal::{append_with_causal_chain, get_chain_tail, get_complete_chain};
pub use chronicle::{append_event, Chronicle};
pub use config::{ChronicleConfig, LockConfig, RepairConfig};
pub use index::{batch_check_duplicates, is_duplicate_using_index, EventIndex, EventIndexCache};
pub use lock::{acquire_lock, clean_stale_locks, with_lock, ChronicleLock, LockOptions, LockOwner};
pub use path::{resolve_chronicle_path, validate_chronicle_path};
pub use repair::{
    analyze_chronicle, format_analysis_report, read_epoch_ledger, repair_chronicle, EpochRecord,
    RepairOptions,
};
pub use storage::{
    ensure_chronicle_directory, file_exists, parse_event_line, read_chronicle_detailed,
    read_chronicle_file, serialize_event, tail_chronicle_file, write_chronicle_atomic,
    ParsedChronicle,
};

// ── Tests ─────────────────────────────────────────────────────────────────────
