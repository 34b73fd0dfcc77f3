//! Integrity analysis and epoch-starting repair.
//!
//! Analysis is a read-only full scan.  Repair is the only sanctioned rewrite
//! of a chronicle: it drops corrupt lines, keeps the first occurrence of each
//! logical event, and re-threads the chain over the survivors.  Re-threading
//! changes `previousEventId` values and therefore ids, so a repair that
//! changes anything begins a new epoch.  The superseded epoch's fingerprint
//! is recorded in the `<chronicle>.epochs` ledger so holders of old ids can
//! tell which history they refer to.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chronicle_contracts::{
    error::{ChronicleError, ChronicleResult},
    event::{ChronicleEvent, EventId},
    report::{ChronicleAnalysis, ChronicleRepairResult},
};
use chronicle_core::{
    compute_chronicle_hash, content_hash, find_chain_breaks, find_duplicate_events,
    link_break_reason, rethread_chain, verify_event_id, Clock,
};

use crate::lock::{with_lock, LockOptions};
use crate::storage::{read_chronicle_detailed, write_chronicle_atomic};

pub const EPOCH_LEDGER_SUFFIX: &str = ".epochs";

#[derive(Debug, Clone, Copy)]
pub struct RepairOptions {
    /// Copy the original file aside before replacing it.
    pub backup: bool,
    pub lock: LockOptions,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            backup: true,
            lock: LockOptions::default(),
        }
    }
}

/// One ledger line per repair that changed a chronicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochRecord {
    /// Whole-log fingerprint of the chronicle before the repair.
    pub prior_epoch_hash: String,
    pub prior_tail_id: Option<EventId>,
    pub new_tail_id: Option<EventId>,
    pub fixed_count: usize,
    pub removed_count: usize,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    #[serde(with = "chronicle_contracts::event::timestamp")]
    pub repaired_at: DateTime<Utc>,
}

pub fn epoch_ledger_path(chronicle: &Path) -> PathBuf {
    let mut name = chronicle.as_os_str().to_owned();
    name.push(EPOCH_LEDGER_SUFFIX);
    PathBuf::from(name)
}

/// Read every record from the epoch ledger of `chronicle`, oldest first.
/// A chronicle that was never repaired has an empty ledger.
pub fn read_epoch_ledger(chronicle: &Path) -> ChronicleResult<Vec<EpochRecord>> {
    let ledger = epoch_ledger_path(chronicle);
    let text = match fs::read_to_string(&ledger) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ChronicleError::io("read", &ledger, e)),
    };

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| ChronicleError::Halt {
                reason: format!("epoch ledger '{}' is corrupt: {}", ledger.display(), e),
            })
        })
        .collect()
}

/// Scan `path` and report duplicates, broken links, bad ids and corrupt
/// lines.  Never modifies the file and never takes the lock.
pub fn analyze_chronicle(path: &Path) -> ChronicleResult<ChronicleAnalysis> {
    let parsed = read_chronicle_detailed(path)?;
    let events = &parsed.events;

    let duplicate_count = find_duplicate_events(events)?
        .iter()
        .map(|group| group.len() - 1)
        .sum();
    let chain_breaks = find_chain_breaks(events);
    let invalid_ids: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| !verify_event_id(event))
        .map(|(idx, _)| idx)
        .collect();

    let intact_prefix = events
        .iter()
        .enumerate()
        .take_while(|(idx, event)| {
            link_break_reason(events, *idx).is_none() && verify_event_id(event)
        })
        .count();
    let last_valid_event_id = intact_prefix
        .checked_sub(1)
        .map(|idx| events[idx].event_id.clone());

    Ok(ChronicleAnalysis {
        path: path.to_path_buf(),
        total_events: events.len(),
        duplicate_count,
        chain_breaks,
        invalid_ids,
        corrupt_line_count: parsed.corrupt_lines.len(),
        last_valid_event_id,
        chronicle_hash: compute_chronicle_hash(events),
    })
}

/// Keep the first occurrence of each logical event, in order.
fn first_occurrences(events: Vec<ChronicleEvent>) -> ChronicleResult<Vec<ChronicleEvent>> {
    let mut seen: HashSet<String> = HashSet::with_capacity(events.len());
    let mut kept = Vec::with_capacity(events.len());
    for event in events {
        if seen.insert(content_hash(&event)?) {
            kept.push(event);
        }
    }
    Ok(kept)
}

/// `<file>.<UTC stamp>.bak`, with a numeric suffix if that name is taken.
fn backup_path_for(chronicle: &Path, at: DateTime<Utc>) -> PathBuf {
    let stamp = at.format("%Y%m%dT%H%M%S%.3fZ").to_string().replace('.', "");
    let base = chronicle.as_os_str().to_owned();

    let mut attempt = 0u32;
    loop {
        let mut name = base.clone();
        if attempt == 0 {
            name.push(format!(".{}.bak", stamp));
        } else {
            name.push(format!(".{}-{}.bak", stamp, attempt));
        }
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

fn append_epoch_record(chronicle: &Path, record: &EpochRecord) -> ChronicleResult<()> {
    let ledger = epoch_ledger_path(chronicle);
    let mut line = serde_json::to_string(record).map_err(|e| {
        ChronicleError::validation(format!("failed to serialize epoch record: {}", e))
    })?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&ledger)
        .map_err(|e| ChronicleError::io("open for append", &ledger, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| ChronicleError::io("append", &ledger, e))?;
    file.sync_data()
        .map_err(|e| ChronicleError::io("sync", &ledger, e))
}

/// Rewrite `path` as a clean chain, holding the lock for the whole rewrite.
///
/// A chronicle that is already clean is left untouched (no backup, no
/// ledger entry), so repeating a repair is a no-op.
pub fn repair_chronicle(
    path: &Path,
    options: &RepairOptions,
    clock: &dyn Clock,
) -> ChronicleResult<ChronicleRepairResult> {
    if !path.exists() {
        return Ok(ChronicleRepairResult::unchanged(None));
    }

    with_lock(path, &options.lock, || {
        let parsed = read_chronicle_detailed(path)?;
        let original = parsed.events;
        let prior_tail_id = original.last().map(|e| e.event_id.clone());

        let survivors = first_occurrences(original.clone())?;
        let duplicates_removed = original.len() - survivors.len();
        let (rethreaded, fixed_count) = rethread_chain(survivors)?;
        let removed_count = parsed.corrupt_lines.len() + duplicates_removed;

        if fixed_count == 0 && removed_count == 0 {
            debug!(path = %path.display(), "chronicle is intact; nothing to repair");
            return Ok(ChronicleRepairResult::unchanged(prior_tail_id));
        }

        let repaired_at = clock.now();
        let backup_path = if options.backup {
            let backup = backup_path_for(path, repaired_at);
            fs::copy(path, &backup).map_err(|e| ChronicleError::io("back up", &backup, e))?;
            Some(backup)
        } else {
            None
        };

        write_chronicle_atomic(path, &rethreaded)?;

        let result = ChronicleRepairResult {
            fixed_count,
            removed_count,
            backup_path,
            prior_epoch_hash: Some(compute_chronicle_hash(&original)),
            new_tail_id: rethreaded.last().map(|e| e.event_id.clone()),
        };

        append_epoch_record(
            path,
            &EpochRecord {
                prior_epoch_hash: compute_chronicle_hash(&original),
                prior_tail_id,
                new_tail_id: result.new_tail_id.clone(),
                fixed_count,
                removed_count,
                backup_path: result.backup_path.clone(),
                repaired_at,
            },
        )?;

        info!(
            path = %path.display(),
            fixed = fixed_count,
            removed = removed_count,
            backup = ?result.backup_path,
            "chronicle repaired; new epoch started"
        );
        Ok(result)
    })
}

/// Human-readable rendering of an analysis.
pub fn format_analysis_report(analysis: &ChronicleAnalysis) -> String {
    let mut out = String::new();
    let status = if analysis.is_healthy() { "HEALTHY" } else { "NEEDS REPAIR" };

    let _ = writeln!(out, "Chronicle: {}", analysis.path.display());
    let _ = writeln!(out, "Status:    {}", status);
    let _ = writeln!(out, "Events:          {}", analysis.total_events);
    let _ = writeln!(out, "Duplicates:      {}", analysis.duplicate_count);
    let _ = writeln!(out, "Corrupt lines:   {}", analysis.corrupt_line_count);
    let _ = writeln!(out, "Chain breaks:    {}", index_list(&analysis.chain_breaks));
    let _ = writeln!(out, "Invalid ids:     {}", index_list(&analysis.invalid_ids));
    let _ = writeln!(
        out,
        "Last valid id:   {}",
        analysis.last_valid_event_id.as_deref().unwrap_or("(none)")
    );
    let _ = write!(out, "Chronicle hash:  {}", analysis.chronicle_hash);
    out
}

fn index_list(indices: &[usize]) -> String {
    if indices.is_empty() {
        return "none".to_string();
    }
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    use chronicle_contracts::{Actor, EventPayload};
    use chronicle_core::{link_event, validate_causal_chain, ManualClock};

    use super::*;
    use crate::append::AppendOptions;
    use crate::causal::append_with_causal_chain;
    use crate::storage::{append_line, read_chronicle_file, serialize_event};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600, 0).unwrap()
    }

    fn removed(n: i64) -> ChronicleEvent {
        ChronicleEvent::draft(
            Actor::new("executor", "e-1"),
            t0() + Duration::seconds(n),
            EventPayload::FileRemoved {
                path: format!("src/old_{}.rs", n),
            },
        )
    }

    fn clock() -> ManualClock {
        ManualClock::new(t0() + Duration::days(1), Duration::seconds(1))
    }

    fn chained(dir: &TempDir, count: i64) -> PathBuf {
        let path = dir.path().join("repair.ndjson");
        for n in 0..count {
            append_with_causal_chain(&path, removed(n), &AppendOptions::default()).unwrap();
        }
        path
    }

    /// Replace the first hex digit of `previousEventId` on line `line_idx`.
    fn flip_previous_id(path: &Path, line_idx: usize) {
        let text = fs::read_to_string(path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        let marker = "\"previousEventId\":\"";
        let at = lines[line_idx].find(marker).unwrap() + marker.len();
        let original = lines[line_idx].as_bytes()[at];
        let replacement = if original == b'0' { "1" } else { "0" };
        lines[line_idx].replace_range(at..at + 1, replacement);
        fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    // ── Analysis ──────────────────────────────────────────────────────────────

    #[test]
    fn clean_chronicle_analyzes_healthy() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 4);
        let analysis = analyze_chronicle(&path).unwrap();

        assert!(analysis.is_healthy(), "fresh chain must be healthy: {:?}", analysis);
        assert_eq!(analysis.total_events, 4);
        let events = read_chronicle_file(&path).unwrap();
        assert_eq!(analysis.last_valid_event_id.as_ref(), Some(&events[3].event_id));
        assert_eq!(analysis.chronicle_hash, compute_chronicle_hash(&events));
    }

    #[test]
    fn missing_chronicle_analyzes_empty() {
        let dir = TempDir::new().unwrap();
        let analysis = analyze_chronicle(&dir.path().join("none.ndjson")).unwrap();
        assert_eq!(analysis.total_events, 0);
        assert!(analysis.is_healthy());
        assert!(analysis.last_valid_event_id.is_none());
    }

    #[test]
    fn flipped_previous_id_is_reported_at_its_index() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 3);
        let intact = read_chronicle_file(&path).unwrap();
        flip_previous_id(&path, 1);

        let events = read_chronicle_file(&path).unwrap();
        let validation = validate_causal_chain(&events);
        assert!(!validation.valid);
        assert_eq!(validation.broken_at_index, Some(1));

        let analysis = analyze_chronicle(&path).unwrap();
        assert_eq!(analysis.chain_breaks, vec![1]);
        assert_eq!(analysis.invalid_ids, vec![1], "prev is hashed into the id");
        assert_eq!(analysis.last_valid_event_id.as_ref(), Some(&intact[0].event_id));
    }

    #[test]
    fn analysis_counts_duplicates_and_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 2);
        append_line(&path, "{ garbage\n").unwrap();
        // Same content as event 0, linked as a fresh genesis.
        let again = link_event(removed(0), None).unwrap();
        append_line(&path, &serialize_event(&again).unwrap()).unwrap();

        let analysis = analyze_chronicle(&path).unwrap();
        assert_eq!(analysis.total_events, 3);
        assert_eq!(analysis.corrupt_line_count, 1);
        assert_eq!(analysis.duplicate_count, 1);
        assert_eq!(analysis.chain_breaks, vec![2]);
        assert!(!analysis.is_healthy());
    }

    // ── Repair ────────────────────────────────────────────────────────────────

    #[test]
    fn repair_of_clean_chronicle_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 3);
        let before = fs::read(&path).unwrap();

        let result = repair_chronicle(&path, &RepairOptions::default(), &clock()).unwrap();
        assert!(!result.changed_anything());
        assert!(result.backup_path.is_none());
        assert!(result.prior_epoch_hash.is_none());
        assert_eq!(fs::read(&path).unwrap(), before, "file must be untouched");
        assert!(read_epoch_ledger(&path).unwrap().is_empty());
    }

    #[test]
    fn repair_drops_garbage_and_duplicates_and_rethreads() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 3);
        let original_events = read_chronicle_file(&path).unwrap();
        append_line(&path, "not json at all\n").unwrap();
        let again = link_event(removed(1), Some(original_events[2].event_id.clone())).unwrap();
        append_line(&path, &serialize_event(&again).unwrap()).unwrap();
        let before_bytes = fs::read(&path).unwrap();
        let before_events = read_chronicle_file(&path).unwrap();

        let result = repair_chronicle(&path, &RepairOptions::default(), &clock()).unwrap();
        assert_eq!(result.removed_count, 2, "one corrupt line plus one duplicate");
        assert_eq!(result.fixed_count, 0, "survivors were already linked correctly");
        assert_eq!(
            result.prior_epoch_hash.as_deref(),
            Some(compute_chronicle_hash(&before_events).as_str())
        );

        let backup = result.backup_path.clone().expect("backup requested by default");
        assert_eq!(fs::read(&backup).unwrap(), before_bytes);

        let repaired = read_chronicle_file(&path).unwrap();
        assert_eq!(repaired, original_events);
        assert!(validate_causal_chain(&repaired).valid);
        assert!(analyze_chronicle(&path).unwrap().is_healthy());
        assert_eq!(result.new_tail_id.as_ref(), Some(&repaired[2].event_id));
    }

    #[test]
    fn repair_fixes_broken_link_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 4);
        flip_previous_id(&path, 2);

        let first = repair_chronicle(&path, &RepairOptions::default(), &clock()).unwrap();
        assert_eq!(first.fixed_count, 1);
        assert_eq!(first.removed_count, 0);
        assert!(analyze_chronicle(&path).unwrap().is_healthy());

        let second = repair_chronicle(&path, &RepairOptions::default(), &clock()).unwrap();
        assert_eq!(second.fixed_count, 0);
        assert_eq!(second.removed_count, 0);
        assert_eq!(read_epoch_ledger(&path).unwrap().len(), 1);
    }

    #[test]
    fn repair_records_epoch_in_ledger() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 2);
        let before = read_chronicle_file(&path).unwrap();
        append_line(&path, "{\n").unwrap();

        let options = RepairOptions {
            backup: false,
            ..RepairOptions::default()
        };
        let result = repair_chronicle(&path, &options, &clock()).unwrap();
        assert!(result.backup_path.is_none());

        let ledger = read_epoch_ledger(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        let record = &ledger[0];
        assert_eq!(record.prior_epoch_hash, compute_chronicle_hash(&before));
        assert_eq!(record.prior_tail_id.as_ref(), Some(&before[1].event_id));
        assert_eq!(record.new_tail_id, result.new_tail_id);
        assert_eq!(record.removed_count, 1);
        assert_eq!(record.repaired_at, t0() + Duration::days(1));
    }

    #[test]
    fn repair_of_missing_file_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.ndjson");
        let result = repair_chronicle(&path, &RepairOptions::default(), &clock()).unwrap();
        assert_eq!(result, ChronicleRepairResult::unchanged(None));
        assert!(!path.exists());
    }

    #[test]
    fn backup_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.ndjson");
        let at = t0();
        let first = backup_path_for(&path, at);
        fs::write(&first, b"x").unwrap();
        let second = backup_path_for(&path, at);
        assert_ne!(first, second);
        assert!(first.to_string_lossy().ends_with(".20260101T000000000Z.bak"));
    }

    // ── Report ────────────────────────────────────────────────────────────────

    #[test]
    fn report_mentions_status_and_breaks() {
        let dir = TempDir::new().unwrap();
        let path = chained(&dir, 3);
        flip_previous_id(&path, 1);

        let report = format_analysis_report(&analyze_chronicle(&path).unwrap());
        assert!(report.contains("NEEDS REPAIR"), "report: {}", report);
        assert!(report.contains("Chain breaks:    1"), "report: {}", report);
        assert!(report.contains("Events:          3"));
    }
}
