//! `Chronicle`: the configured entry point producers and auditors use.
//!
//! The free functions in the sibling modules take an already-validated path
//! and explicit options.  `Chronicle` bundles a `ChronicleConfig` and a
//! `Clock`, validates and resolves every path it is given, and derives lock
//! and repair options from the config.  Any invalid path is rejected with a
//! `Validation` error before a lock is taken.

use std::path::{Path, PathBuf};

use chronicle_contracts::{
    actor::Actor,
    error::{ChronicleError, ChronicleResult},
    event::{ChronicleEvent, EventId, EventPayload},
    report::{ChronicleAnalysis, ChronicleRepairResult},
};
use chronicle_core::{Clock, SystemClock};

use crate::append::{self, AppendOptions, AppendOutcome, ReconcileOutcome};
use crate::causal;
use crate::config::ChronicleConfig;
use crate::index::EventIndexCache;
use crate::lock;
use crate::path::resolve_chronicle_path;
use crate::repair::{self, RepairOptions};
use crate::storage;

/// A configured chronicle engine.
///
/// Holds no per-file state; one `Chronicle` serves any number of paths and
/// may be shared across threads.
pub struct Chronicle<C: Clock = SystemClock> {
    config: ChronicleConfig,
    clock: C,
}

impl Chronicle<SystemClock> {
    pub fn new(config: ChronicleConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Chronicle<C> {
    /// Use `clock` for event timestamps and repair stamps.
    pub fn with_clock(config: ChronicleConfig, clock: C) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Validate `path` and return where it resolves to.
    pub fn resolve(&self, path: impl AsRef<Path>) -> ChronicleResult<PathBuf> {
        resolve_chronicle_path(path.as_ref(), &self.config)
    }

    fn append_options(&self) -> AppendOptions {
        AppendOptions::with_lock(self.config.lock_options())
    }

    /// Stamp `payload` with the clock's current time and append it to the
    /// chain.  Returns the event as stored.
    pub fn record(
        &self,
        path: impl AsRef<Path>,
        actor: Actor,
        payload: EventPayload,
    ) -> ChronicleResult<ChronicleEvent> {
        let draft = ChronicleEvent::draft(actor, self.clock.now(), payload);
        self.append_with_causal_chain(path, draft)
    }

    /// Append an already-sealed event exactly as given.
    pub fn append_event(
        &self,
        path: impl AsRef<Path>,
        event: &ChronicleEvent,
    ) -> ChronicleResult<AppendOutcome> {
        let path = self.resolve(path)?;
        append::atomic_append_event(&path, event, &self.append_options())
    }

    /// Link `event` onto the current tail and append it.
    pub fn append_with_causal_chain(
        &self,
        path: impl AsRef<Path>,
        event: ChronicleEvent,
    ) -> ChronicleResult<ChronicleEvent> {
        let path = self.resolve(path)?;
        causal::append_with_causal_chain(&path, event, &self.append_options())
    }

    /// Append each event whose content the chronicle lacks.
    pub fn append_missing_events(
        &self,
        path: impl AsRef<Path>,
        events: Vec<ChronicleEvent>,
        cache: &mut EventIndexCache,
    ) -> ChronicleResult<ReconcileOutcome> {
        let path = self.resolve(path)?;
        append::append_missing_events(&path, events, cache, &self.append_options())
    }

    pub fn read_chronicle(&self, path: impl AsRef<Path>) -> ChronicleResult<Vec<ChronicleEvent>> {
        storage::read_chronicle_file(&self.resolve(path)?)
    }

    pub fn tail_chronicle(
        &self,
        path: impl AsRef<Path>,
        n: usize,
    ) -> ChronicleResult<Vec<ChronicleEvent>> {
        storage::tail_chronicle_file(&self.resolve(path)?, n)
    }

    pub fn get_chain_tail(&self, path: impl AsRef<Path>) -> ChronicleResult<Option<EventId>> {
        causal::get_chain_tail(&self.resolve(path)?)
    }

    pub fn get_complete_chain(
        &self,
        path: impl AsRef<Path>,
    ) -> ChronicleResult<Vec<ChronicleEvent>> {
        causal::get_complete_chain(&self.resolve(path)?)
    }

    pub fn analyze_chronicle(&self, path: impl AsRef<Path>) -> ChronicleResult<ChronicleAnalysis> {
        repair::analyze_chronicle(&self.resolve(path)?)
    }

    /// Repair `path`.  `backup` overrides `[repair] backup` from the config.
    pub fn repair_chronicle(
        &self,
        path: impl AsRef<Path>,
        backup: Option<bool>,
    ) -> ChronicleResult<ChronicleRepairResult> {
        let path = self.resolve(path)?;
        let options = RepairOptions {
            backup: backup.unwrap_or(self.config.repair.backup),
            lock: self.config.lock_options(),
        };
        repair::repair_chronicle(&path, &options, &self.clock)
    }

    /// Sweep abandoned lock sidecars under the configured root.
    pub fn clean_stale_locks(&self) -> ChronicleResult<Vec<PathBuf>> {
        let root = self.config.root.as_deref().ok_or_else(|| ChronicleError::Config {
            reason: "clean_stale_locks needs a configured root".to_string(),
        })?;
        self.clean_stale_locks_under(root)
    }

    /// Sweep abandoned lock sidecars under `root`, using the configured
    /// staleness threshold.
    pub fn clean_stale_locks_under(&self, root: &Path) -> ChronicleResult<Vec<PathBuf>> {
        lock::clean_stale_locks(root, self.config.lock.stale_after())
    }
}

/// Validate `path` against `config` and append a sealed event.
pub fn append_event(
    path: &Path,
    event: &ChronicleEvent,
    config: &ChronicleConfig,
) -> ChronicleResult<AppendOutcome> {
    let path = resolve_chronicle_path(path, config)?;
    append::atomic_append_event(&path, event, &AppendOptions::with_lock(config.lock_options()))
}
