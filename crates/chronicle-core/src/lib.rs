//! # chronicle-core
//!
//! Pure algorithms behind the agent chronicle: canonical serialization,
//! content-hash identity, duplicate grouping, and causal-chain validation.
//!
//! Nothing in this crate touches the filesystem.  `chronicle-store` builds
//! the durable, locked log on top of these functions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chronicle_core::{link_event, validate_causal_chain, verify_event_id};
//!
//! let first = link_event(draft_a, None)?;
//! let second = link_event(draft_b, Some(first.event_id.clone()))?;
//! assert!(verify_event_id(&second));
//! assert!(validate_causal_chain(&[first, second]).valid);
//! ```

pub mod canonical;
pub mod chain;
pub mod clock;

pub use canonical::{
    canonical_json, canonicalize, compute_chronicle_hash, compute_event_id, compute_event_ids,
    content_hash, events_are_identical, find_duplicate_events, is_duplicate_event,
    is_well_formed_id, verify_event_id,
};
pub use chain::{
    build_causal_chain, find_chain_breaks, link_break_reason, link_event, rethread_chain,
    validate_causal_chain,
};
pub use clock::{Clock, ManualClock, SystemClock};

// ── Tests ─────────────────────────────────────────────────────────────────────
