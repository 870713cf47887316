//! Crash-safe tail of the game's rotating `Journal.*.log` files plus the
//! `Status.json`/`Cargo.json` snapshot files, per SPEC_FULL.md §4.4.
//!
//! The reader never blocks a UI thread: it runs as a `tokio::spawn`ed task
//! polling on a `tokio::time::interval` and forwards parsed records to the
//! dispatcher over an unbounded `mpsc` channel.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::JournalError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOCK_RETRY_ATTEMPTS: u32 = 3;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A single parsed line, or a synthetic snapshot from `Status.json`/`Cargo.json`.
/// Forwarded to the dispatcher (C5), which owns JSON-line-to-`JournalEvent`
/// parsing so this module stays ignorant of event shapes.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Line(String),
    Status(StatusSnapshot),
    Cargo(CargoSnapshot),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "Cargo")]
    pub cargo: Option<f64>,
    #[serde(rename = "CargoCapacity")]
    pub cargo_capacity: Option<u32>,
    #[serde(rename = "SystemName")]
    pub system_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CargoInventoryItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Name_Localised")]
    pub name_localised: Option<String>,
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "Stolen", default)]
    pub stolen: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CargoSnapshot {
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "Inventory", default)]
    pub inventory: Vec<CargoInventoryItem>,
}

/// Persisted `(filename, byte-offset)` cursor, so a restart resumes exactly
/// where the previous run stopped rather than re-reading the whole journal.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JournalCursor {
    pub filename: Option<String>,
    pub offset: u64,
}

impl JournalCursor {
    pub fn load(state_path: impl AsRef<Path>) -> JournalCursor {
        let path = state_path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => JournalCursor::default(),
        }
    }

    /// Atomic write-temp-then-rename, the same primitive `EliteMiningConfig::save` uses.
    pub fn save(&self, state_path: impl AsRef<Path>) -> Result<(), JournalError> {
        let path = state_path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("journal_cursor")
        ));
        let contents = serde_json::to_string_pretty(self).unwrap_or_default();
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// How a fresh install (no persisted cursor, journals already present)
/// should behave: skip straight to "now" or replay everything on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstRunPolicy {
    SkipToEnd,
    ReplayAll,
}

/// Finds the newest `Journal.*.log` file in `dir` by modification time.
pub fn find_newest_journal(dir: &Path) -> Result<Option<PathBuf>, JournalError> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !name.starts_with("Journal.") || !name.ends_with(".log") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        match &newest {
            Some((best_time, _)) if *best_time >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }
    Ok(newest.map(|(_, p)| p))
}

/// Reads whatever bytes were appended to `path` past `offset`, retrying a
/// short backoff window on transient permission errors (the game process can
/// briefly hold an exclusive lock while rotating files).
fn read_new_lines(path: &Path, offset: u64) -> Result<(Vec<String>, u64), JournalError> {
    let mut attempt = 0;
    loop {
        match try_read_new_lines(path, offset) {
            Ok(result) => return Ok(result),
            Err(e) if is_transient(&e) && attempt + 1 < LOCK_RETRY_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(err: &JournalError) -> bool {
    matches!(
        err,
        JournalError::Io(e) if matches!(e.kind(), std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::WouldBlock)
    )
}

fn try_read_new_lines(path: &Path, offset: u64) -> Result<(Vec<String>, u64), JournalError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len <= offset {
        return Ok((Vec::new(), offset.min(len)));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;

    // Keep only complete lines; a partial trailing line (file still being
    // written) is left for the next poll by reporting a shorter new offset.
    let mut consumed = offset;
    let mut lines = Vec::new();
    for line in buf.split_inclusive('\n') {
        if !line.ends_with('\n') {
            break;
        }
        consumed += line.len() as u64;
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok((lines, consumed))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// Reads and parses `Status.json`. Returns `None` if the file is missing or
/// momentarily unreadable mid-write; both are expected and non-fatal.
fn read_status(path: &Path) -> Option<StatusSnapshot> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn read_cargo(path: &Path) -> Option<CargoSnapshot> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// One tick of the poll loop: advances the live-journal cursor and checks the
/// two snapshot files for a fresh mtime. Exposed standalone so tests and a
/// headless import tool can drive it without spinning up a `tokio` task.
pub struct JournalTail {
    dir: PathBuf,
    cursor: JournalCursor,
    status_mtime: Option<SystemTime>,
    cargo_mtime: Option<SystemTime>,
}

impl JournalTail {
    pub fn new(dir: PathBuf, first_run: FirstRunPolicy) -> Result<Self, JournalError> {
        let cursor = match find_newest_journal(&dir)? {
            Some(path) => {
                let filename = path.file_name().unwrap().to_string_lossy().into_owned();
                let offset = match first_run {
                    FirstRunPolicy::SkipToEnd => std::fs::metadata(&path)?.len(),
                    FirstRunPolicy::ReplayAll => 0,
                };
                JournalCursor { filename: Some(filename), offset }
            }
            None => JournalCursor::default(),
        };
        Ok(Self { dir, cursor, status_mtime: None, cargo_mtime: None })
    }

    pub fn resume(dir: PathBuf, cursor: JournalCursor) -> Self {
        Self { dir, cursor, status_mtime: None, cargo_mtime: None }
    }

    pub fn cursor(&self) -> &JournalCursor {
        &self.cursor
    }

    /// Reads everything newly appended since the last call, rediscovering
    /// the newest journal if the tracked file was rotated away or deleted.
    pub fn poll(&mut self) -> Result<Vec<RawRecord>, JournalError> {
        let mut out = Vec::new();

        let current_path = self.cursor.filename.as_ref().map(|f| self.dir.join(f));
        let live_path = match &current_path {
            Some(p) if p.exists() => p.clone(),
            _ => match find_newest_journal(&self.dir)? {
                Some(p) => {
                    self.cursor = JournalCursor {
                        filename: Some(p.file_name().unwrap().to_string_lossy().into_owned()),
                        offset: 0,
                    };
                    p
                }
                None => return Ok(out),
            },
        };

        // The game may have rotated to a newer file even though the
        // currently-tracked one still exists; always prefer the newest.
        if let Some(newest) = find_newest_journal(&self.dir)? {
            if newest != live_path {
                self.cursor = JournalCursor {
                    filename: Some(newest.file_name().unwrap().to_string_lossy().into_owned()),
                    offset: 0,
                };
                let (lines, new_offset) = read_new_lines(&newest, 0)?;
                self.cursor.offset = new_offset;
                out.extend(lines.into_iter().map(RawRecord::Line));
            } else {
                let (lines, new_offset) = read_new_lines(&live_path, self.cursor.offset)?;
                self.cursor.offset = new_offset;
                out.extend(lines.into_iter().map(RawRecord::Line));
            }
        }

        let status_path = self.dir.join("Status.json");
        let status_mtime = mtime(&status_path);
        if status_mtime.is_some() && status_mtime != self.status_mtime {
            self.status_mtime = status_mtime;
            if let Some(snapshot) = read_status(&status_path) {
                out.push(RawRecord::Status(snapshot));
            }
        }

        let cargo_path = self.dir.join("Cargo.json");
        let cargo_mtime = mtime(&cargo_path);
        if cargo_mtime.is_some() && cargo_mtime != self.cargo_mtime {
            self.cargo_mtime = cargo_mtime;
            if let Some(snapshot) = read_cargo(&cargo_path) {
                out.push(RawRecord::Cargo(snapshot));
            }
        }

        Ok(out)
    }
}

/// Spawns the poll loop as a background task. One bad tick is logged and
/// skipped rather than killing the task, matching the rest of this crate's
/// background-engine error policy.
pub fn spawn(
    journal_dir: PathBuf,
    cursor_state_path: PathBuf,
    first_run: FirstRunPolicy,
) -> Result<mpsc::UnboundedReceiver<RawRecord>, JournalError> {
    let initial_cursor = JournalCursor::load(&cursor_state_path);
    let mut tail = if initial_cursor.filename.is_some() {
        JournalTail::resume(journal_dir.clone(), initial_cursor)
    } else {
        JournalTail::new(journal_dir.clone(), first_run)?
    };

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        tracing::info!("journal reader: watching {}", journal_dir.display());
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            interval.tick().await;
            match tail.poll() {
                Ok(records) => {
                    if !records.is_empty() {
                        if let Err(e) = tail.cursor().save(&cursor_state_path) {
                            tracing::warn!("journal reader: failed to persist cursor: {e}");
                        }
                        for record in records {
                            if tx.send(record).is_err() {
                                tracing::info!("journal reader: receiver dropped, stopping");
                                return;
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("journal reader: poll failed: {e}"),
            }
        }
    });
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_journal(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn finds_newest_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        write_journal(dir.path(), "Journal.2024-01-01T000000.01.log", "{}\n");
        std::thread::sleep(Duration::from_millis(10));
        let newest = write_journal(dir.path(), "Journal.2024-01-02T000000.01.log", "{}\n");

        let found = find_newest_journal(dir.path()).unwrap().unwrap();
        assert_eq!(found, newest);
    }

    #[test]
    fn poll_reads_only_new_lines_and_keeps_partial_line_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_journal(dir.path(), "Journal.2024-01-01T000000.01.log", "{\"a\":1}\n");

        let mut tail = JournalTail::new(dir.path().to_path_buf(), FirstRunPolicy::ReplayAll).unwrap();
        let first = tail.poll().unwrap();
        assert_eq!(first.len(), 1);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"b\":2}\n{\"partial\":").unwrap();
        let second = tail.poll().unwrap();
        assert_eq!(second.len(), 1);

        f.write_all(b"3}\n").unwrap();
        let third = tail.poll().unwrap();
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn first_run_skip_to_end_ignores_preexisting_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_journal(dir.path(), "Journal.2024-01-01T000000.01.log", "{\"old\":true}\n");

        let mut tail = JournalTail::new(dir.path().to_path_buf(), FirstRunPolicy::SkipToEnd).unwrap();
        let records = tail.poll().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn cursor_round_trips_through_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("journal_cursor.json");
        let cursor = JournalCursor { filename: Some("Journal.x.log".to_string()), offset: 42 };
        cursor.save(&state_path).unwrap();

        let loaded = JournalCursor::load(&state_path);
        assert_eq!(loaded.filename.as_deref(), Some("Journal.x.log"));
        assert_eq!(loaded.offset, 42);
    }

    #[test]
    fn rotation_to_newer_file_restarts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_journal(dir.path(), "Journal.2024-01-01T000000.01.log", "{\"a\":1}\n");
        let mut tail = JournalTail::new(dir.path().to_path_buf(), FirstRunPolicy::ReplayAll).unwrap();
        tail.poll().unwrap();

        std::thread::sleep(Duration::from_millis(10));
        write_journal(dir.path(), "Journal.2024-01-02T000000.01.log", "{\"b\":2}\n");
        let records = tail.poll().unwrap();
        assert_eq!(records.len(), 1);
    }
}
