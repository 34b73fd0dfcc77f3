//! NDJSON file storage.
//!
//! One event per line, each line the canonical JSON of the event followed by
//! `\n`.  Readers never take the chronicle lock, so every mutation is made
//! observable only as whole lines:
//!
//! - appends build the complete line (plus a leading `\n` if the file ends in
//!   a torn line) and issue it as one `write_all` on an `O_APPEND` handle;
//! - full rewrites go to a temporary file in the same directory which is then
//!   renamed over the original.
//!
//! Lines that fail to parse are skipped with a warning.  A missing file reads
//! as an empty chronicle.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::warn;

use chronicle_contracts::{
    error::{ChronicleError, ChronicleResult},
    event::ChronicleEvent,
    report::CorruptLine,
};
use chronicle_core::canonicalize;

/// Bytes read per step when scanning backward from EOF.
const TAIL_CHUNK: u64 = 8 * 1024;

/// A chronicle file split into parsed events and the lines that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedChronicle {
    pub events: Vec<ChronicleEvent>,
    pub corrupt_lines: Vec<CorruptLine>,
    /// False when the file did not exist.
    pub exists: bool,
}

/// Parse one NDJSON line into an event.
pub fn parse_event_line(line: &[u8]) -> Result<ChronicleEvent, String> {
    let text = std::str::from_utf8(line).map_err(|e| format!("invalid UTF-8: {}", e))?;
    serde_json::from_str(text).map_err(|e| e.to_string())
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

/// Serialize an event as one complete NDJSON line, newline included.
pub fn serialize_event(event: &ChronicleEvent) -> ChronicleResult<String> {
    let mut line = canonicalize(event)?;
    line.push('\n');
    Ok(line)
}

/// Read every parseable event and record each corrupt line.
pub fn read_chronicle_detailed(path: &Path) -> ChronicleResult<ParsedChronicle> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ParsedChronicle::default()),
        Err(e) => return Err(ChronicleError::io("read", path, e)),
    };

    let mut parsed = ParsedChronicle {
        exists: true,
        ..ParsedChronicle::default()
    };

    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if is_blank(line) {
            continue;
        }
        match parse_event_line(line) {
            Ok(event) => parsed.events.push(event),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    line_number = idx + 1,
                    error = %error,
                    "skipping corrupt chronicle line"
                );
                parsed.corrupt_lines.push(CorruptLine {
                    line_number: idx + 1,
                    error,
                });
            }
        }
    }

    Ok(parsed)
}

/// Read the whole chronicle in file order.
pub fn read_chronicle_file(path: &Path) -> ChronicleResult<Vec<ChronicleEvent>> {
    Ok(read_chronicle_detailed(path)?.events)
}

/// The last `n` parseable events, in file order.
///
/// Scans backward from EOF in fixed-size chunks and stops once `n` events
/// are found, skipping blank and corrupt lines exactly as the full parse
/// does.
pub fn tail_chronicle_file(path: &Path, n: usize) -> ChronicleResult<Vec<ChronicleEvent>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ChronicleError::io("open", path, e)),
    };
    let len = file
        .metadata()
        .map_err(|e| ChronicleError::io("stat", path, e))?
        .len();

    let mut found: Vec<ChronicleEvent> = Vec::with_capacity(n);
    // Bytes of the line that straddles the current chunk boundary.
    let mut carry: Vec<u8> = Vec::new();
    let mut pos = len;

    while pos > 0 && found.len() < n {
        let step = TAIL_CHUNK.min(pos);
        pos -= step;

        let mut data = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(pos))
            .and_then(|_| file.read_exact(&mut data))
            .map_err(|e| ChronicleError::io("read", path, e))?;
        data.extend_from_slice(&carry);

        let mut segments: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
        // Unless we reached the start of the file, the first segment may be
        // the tail end of a longer line.
        let head = if pos > 0 { segments.remove(0).to_vec() } else { Vec::new() };

        for segment in segments.iter().rev() {
            if found.len() == n {
                break;
            }
            if is_blank(segment) {
                continue;
            }
            match parse_event_line(segment) {
                Ok(event) => found.push(event),
                Err(error) => warn!(
                    path = %path.display(),
                    error = %error,
                    "skipping corrupt chronicle line near tail"
                ),
            }
        }

        carry = head;
    }

    found.reverse();
    Ok(found)
}

/// Create the chronicle's parent directory (recursively).  No-op if present.
pub fn ensure_chronicle_directory(path: &Path) -> ChronicleResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| ChronicleError::io("create directory", parent, e)),
        _ => Ok(()),
    }
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Append one already-serialized line with a single write.
///
/// The caller must hold the chronicle lock.  If a foreign writer left a torn
/// final line, a `\n` is prepended so the new line stands on its own.
pub fn append_line(path: &Path, line: &str) -> ChronicleResult<()> {
    ensure_chronicle_directory(path)?;

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| ChronicleError::io("open for append", path, e))?;

    let mut buf = Vec::with_capacity(line.len() + 1);
    if !ends_with_newline(&mut file).map_err(|e| ChronicleError::io("read", path, e))? {
        warn!(path = %path.display(), "chronicle ends in a torn line; starting a new line");
        buf.push(b'\n');
    }
    buf.extend_from_slice(line.as_bytes());

    file.write_all(&buf)
        .map_err(|e| ChronicleError::io("append", path, e))?;
    file.sync_data()
        .map_err(|e| ChronicleError::io("sync", path, e))?;
    Ok(())
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Replace the whole chronicle with `events` via write-to-temp-then-rename.
///
/// The caller must hold the chronicle lock for the duration.
pub fn write_chronicle_atomic(path: &Path, events: &[ChronicleEvent]) -> ChronicleResult<()> {
    ensure_chronicle_directory(path)?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut body = String::new();
    for event in events {
        body.push_str(&serialize_event(event)?);
    }

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ChronicleError::io("create temp file", parent, e))?;
    temp.write_all(body.as_bytes())
        .map_err(|e| ChronicleError::io("write temp file", temp.path().to_path_buf(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ChronicleError::io("sync temp file", temp.path().to_path_buf(), e))?;
    temp.persist(path)
        .map_err(|e| ChronicleError::io("rename over", path, e.error))?;
    Ok(())
}
