//! Cross-process exclusive locking per chronicle.
//!
//! The lock for `plan.ndjson` is an `fs2` advisory lock on the sidecar
//! `plan.ndjson.lock`.  While held, the sidecar contains the owner's pid and
//! acquisition time as JSON.  Releasing removes the sidecar (truncates it on
//! platforms that cannot unlink open files).
//!
//! Because a sidecar can be unlinked while another process is blocked on it,
//! every successful `try_lock_exclusive` is followed by a check that the
//! locked handle is still the file at the sidecar path; if not, acquisition
//! starts over.  That makes removal (on release or by the stale sweep) safe.
//!
//! Advisory locks die with their process, so a crashed writer never blocks
//! others: its leftover sidecar is simply locked by the next acquirer.  A
//! contended lock proves a live holder, so acquisition never removes a held
//! sidecar; it backs off until the holder releases or `timeout` elapses.
//! `clean_stale_locks` only tidies sidecars nobody holds.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chronicle_contracts::error::{ChronicleError, ChronicleResult};

use crate::storage::ensure_chronicle_directory;

pub const LOCK_SUFFIX: &str = ".lock";

/// Backoff exponent cap: delays stop doubling after `retry_base * 2^6`.
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up with `LockTimeout` after this long.
    pub timeout: Duration,
    pub retry_base: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_base: Duration::from_millis(5),
        }
    }
}

impl LockOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Owner metadata written into a held sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOwner {
    pub pid: u32,
    #[serde(with = "chronicle_contracts::event::timestamp")]
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }
}

/// The sidecar path guarding `chronicle`.
pub fn lock_path_for(chronicle: &Path) -> PathBuf {
    let mut name = chronicle
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(LOCK_SUFFIX);
    chronicle.with_file_name(name)
}

/// A held chronicle lock.  Released on drop if not released explicitly.
#[derive(Debug)]
pub struct ChronicleLock {
    file: File,
    lock_path: PathBuf,
    released: bool,
}

impl ChronicleLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Release the lock, reporting any failure.
    pub fn release(mut self) -> ChronicleResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> ChronicleResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        clear_sidecar(&self.file, &self.lock_path)?;
        self.file
            .unlock()
            .map_err(|e| ChronicleError::io("unlock", &self.lock_path, e))?;
        debug!(lock_path = %self.lock_path.display(), "chronicle lock released");
        Ok(())
    }
}

impl Drop for ChronicleLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "failed to release chronicle lock cleanly");
        }
    }
}

/// Remove the sidecar if it is still ours.  The advisory lock itself is
/// released separately (or when the handle closes).
#[cfg(unix)]
fn clear_sidecar(file: &File, lock_path: &Path) -> ChronicleResult<()> {
    if !same_file(file, lock_path) {
        return Ok(());
    }
    match fs::remove_file(lock_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChronicleError::io("remove lock sidecar", lock_path, e)),
    }
}

#[cfg(not(unix))]
fn clear_sidecar(file: &File, lock_path: &Path) -> ChronicleResult<()> {
    file.set_len(0)
        .map_err(|e| ChronicleError::io("truncate lock sidecar", lock_path, e))
}

/// Acquire the exclusive lock for `chronicle`, waiting up to
/// `options.timeout`.
///
/// On timeout nothing has been written and the error is retryable.
pub fn acquire_lock(chronicle: &Path, options: &LockOptions) -> ChronicleResult<ChronicleLock> {
    let lock_path = lock_path_for(chronicle);
    ensure_chronicle_directory(&lock_path)?;

    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ChronicleError::io("open lock sidecar", &lock_path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                if !same_file(&file, &lock_path) {
                    // The sidecar was removed while we waited on it.
                    continue;
                }
                write_owner(&file).map_err(|e| ChronicleError::io("write lock owner", &lock_path, e))?;
                debug!(
                    lock_path = %lock_path.display(),
                    attempts = attempt + 1,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "chronicle lock acquired"
                );
                return Ok(ChronicleLock {
                    file,
                    lock_path,
                    released: false,
                });
            }
            Err(e) if is_contended(&e) => {
                drop(file);

                let elapsed = start.elapsed();
                if elapsed >= options.timeout {
                    warn!(
                        lock_path = %lock_path.display(),
                        waited_ms = elapsed.as_millis() as u64,
                        attempts = attempt + 1,
                        "timed out waiting for chronicle lock"
                    );
                    return Err(ChronicleError::LockTimeout {
                        lock_path,
                        waited_ms: elapsed.as_millis() as u64,
                    });
                }

                let remaining = options.timeout - elapsed;
                thread::sleep(backoff_delay(options.retry_base, attempt).min(remaining));
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(ChronicleError::io("lock", &lock_path, e)),
        }
    }
}

/// Run `f` while holding the lock for `chronicle`.  The lock is released on
/// every exit path, including an error from `f`.
pub fn with_lock<T>(
    chronicle: &Path,
    options: &LockOptions,
    f: impl FnOnce() -> ChronicleResult<T>,
) -> ChronicleResult<T> {
    let lock = acquire_lock(chronicle, options)?;
    let result = f();
    let released = lock.release();
    let value = result?;
    released?;
    Ok(value)
}

/// Remove abandoned lock sidecars anywhere under `root`.
///
/// Only sidecars no process holds are candidates.  One is removed when its
/// recorded owner is missing or dead, or when it is older than
/// `stale_after`.  Held sidecars are never touched.  Returns the removed
/// paths.
pub fn clean_stale_locks(root: &Path, stale_after: Duration) -> ChronicleResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ChronicleError::io("read directory", &dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| ChronicleError::io("read directory", &dir, e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| ChronicleError::io("stat", &path, e))?;

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && is_lock_sidecar(&path) && sweep_one(&path, stale_after)? {
                removed.push(path);
            }
        }
    }

    if !removed.is_empty() {
        warn!(root = %root.display(), count = removed.len(), "removed stale chronicle locks");
    }
    Ok(removed)
}

fn is_lock_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(LOCK_SUFFIX) && n.len() > LOCK_SUFFIX.len())
}

fn sweep_one(lock_path: &Path, stale_after: Duration) -> ChronicleResult<bool> {
    let mut file = match OpenOptions::new().read(true).write(true).open(lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ChronicleError::io("open lock sidecar", lock_path, e)),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let result = if is_abandoned(read_owner(&mut file).as_ref(), stale_after) {
                remove_sidecar_if_same(&file, lock_path)
            } else {
                Ok(false)
            };
            let _ = file.unlock();
            result
        }
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(ChronicleError::io("lock", lock_path, e)),
    }
}

/// Staleness of a sidecar the caller has locked itself.
fn is_abandoned(owner: Option<&LockOwner>, stale_after: Duration) -> bool {
    match owner {
        None => true,
        Some(owner) => !pid_alive(owner.pid) || (!stale_after.is_zero() && owner.age() >= stale_after),
    }
}

fn remove_sidecar_if_same(file: &File, lock_path: &Path) -> ChronicleResult<bool> {
    if !same_file(file, lock_path) {
        return Ok(false);
    }
    match fs::remove_file(lock_path) {
        Ok(()) => {
            debug!(lock_path = %lock_path.display(), "removed abandoned chronicle lock");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ChronicleError::io("remove lock sidecar", lock_path, e)),
    }
}

/// Owner metadata read through an open sidecar handle.
fn read_owner(file: &mut File) -> Option<LockOwner> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    serde_json::from_str(content.trim()).ok()
}

fn write_owner(file: &File) -> io::Result<()> {
    let owner = serde_json::to_string(&LockOwner::current())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut handle = file;
    handle.set_len(0)?;
    handle.seek(SeekFrom::Start(0))?;
    handle.write_all(owner.as_bytes())?;
    handle.sync_data()
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// True when the open handle and the path name the same inode.
#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    pid != 0 && (pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

#[cfg(not(unix))]
fn pid_alive(pid: u32) -> bool {
    // No cheap liveness check; rely on the age threshold.
    pid != 0
}

/// Exponential backoff with jitter of up to half the base delay.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = (base.as_millis() as u64).max(1) << attempt.min(MAX_BACKOFF_SHIFT);
    let jitter = thread_jitter_ms(base_ms / 2 + 1);
    Duration::from_millis(base_ms + jitter)
}

/// Per-thread xorshift64 so contending threads do not retry in lockstep.
fn thread_jitter_ms(range: u64) -> u64 {
    thread_local! {
        static STATE: Cell<u64> = Cell::new({
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            let mut hasher = DefaultHasher::new();
            thread::current().id().hash(&mut hasher);
            (nanos ^ hasher.finish()) | 1
        });
    }

    STATE.with(|cell| {
        let mut s = cell.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        cell.set(s);
        s % range.max(1)
    })
}
