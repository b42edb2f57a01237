//! Durable storage for the timer origin.
//!
//! The origin lives in a small JSON document:
//!
//! ```json
//! {"last_reset": "2026-01-25T10:30:45+00:00", "version": 1}
//! ```
//!
//! Writes go to a temporary file in the target's directory which is then
//! renamed over the target, so a reader (including another process) only ever
//! sees the previous complete document or the new complete document.

use crate::common::Timestamp;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// The schema tag written with every record.
pub const RECORD_VERSION: u32 = 1;

/// The on-disk document.
///
/// Both fields are optional on the way in so that a partially valid file can
/// be diagnosed precisely instead of failing as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(default)]
    pub last_reset: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
}

impl PersistedRecord {
    /// Builds the record for `timestamp` at the current schema version.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            last_reset: Some(timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            version: Some(RECORD_VERSION),
        }
    }
}

/// Reads and writes the persisted origin at a fixed path.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    /// Serializes saves from this process.
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Creates a store for the record at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted origin.
    ///
    /// Returns `None` when there is no usable record. Every failure mode is
    /// logged with its own message; none of them is an error for the caller.
    pub fn load(&self) -> Option<Timestamp> {
        let record = self.read_record()?;

        match record.version {
            Some(RECORD_VERSION) => {}
            Some(other) => warn!(
                "Record {} has unknown version {}; reading it as version {}.",
                self.path.display(),
                other,
                RECORD_VERSION
            ),
            None => debug!("Record {} has no version tag.", self.path.display()),
        }

        let Some(raw) = record.last_reset else {
            warn!(
                "'last_reset' key not found in {}. No prior state.",
                self.path.display()
            );
            return None;
        };

        match parse_timestamp(&raw) {
            Some(timestamp) => {
                info!("Loaded last_reset from {}: {}", self.path.display(), timestamp);
                Some(timestamp)
            }
            None => {
                warn!(
                    "Unparseable last_reset '{}' in {}. No prior state.",
                    raw,
                    self.path.display()
                );
                None
            }
        }
    }

    /// Reads the raw record without interpreting the timestamp.
    ///
    /// Exposed so that read-only tools can show exactly what is on disk.
    pub fn read_record(&self) -> Option<PersistedRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Persistence file not found at {}.", self.path.display());
                return None;
            }
            Err(e) => {
                error!(
                    "Could not read persistence file {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        if contents.trim().is_empty() {
            warn!("Persistence file {} is empty.", self.path.display());
            return None;
        }

        match serde_json::from_str::<PersistedRecord>(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    "Persistence file {} is corrupt ({}).",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persists `timestamp` with a write-to-temp-then-rename.
    ///
    /// Saves are serialized; the last call to return `Ok` is what is on disk,
    /// whether or not its timestamp is newer than the previous one.
    pub fn save(&self, timestamp: Timestamp) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let result = self.write_atomically(&PersistedRecord::new(timestamp));
        match &result {
            Ok(()) => debug!("Saved state to {}: {}", self.path.display(), timestamp),
            Err(e) => error!("Failed to save state to {}: {:#}", self.path.display(), e),
        }
        result
    }

    fn write_atomically(&self, record: &PersistedRecord) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating state directory {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        serde_json::to_writer(&mut tmp, record).context("serializing state record")?;
        tmp.flush().context("flushing temporary state file")?;
        tmp.as_file()
            .sync_all()
            .context("syncing temporary state file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("renaming temporary file over {}", self.path.display()))?;
        Ok(())
    }
}

/// Parses a stored timestamp.
///
/// RFC 3339 strings carry their own offset. Strings without an offset were
/// written by older firmware in local time and are interpreted that way.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn sample_time() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 1, 25, 10, 30, 45).unwrap()
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("last_reset.json"));

        store.save(sample_time()).unwrap();

        assert!(store.path().exists());
        assert_eq!(store.load(), Some(sample_time()));
    }

    #[test]
    fn round_trip_keeps_sub_second_precision() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("last_reset.json"));
        let precise = sample_time() + Duration::microseconds(123_456);

        store.save(precise).unwrap();

        assert_eq!(store.load(), Some(precise));
    }

    #[test]
    fn saved_file_has_version_and_iso_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("last_reset.json"));
        store.save(sample_time()).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["last_reset"], "2026-01-25T10:30:45+00:00");
    }

    #[test]
    fn corrupt_or_missing_records_load_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        let store = StateStore::new(&path);

        assert_eq!(store.load(), None, "missing file");

        for contents in ["", "   \n", "{invalid", "{}", r#"{"version":1}"#, "[1,2]"] {
            fs::write(&path, contents).unwrap();
            assert_eq!(store.load(), None, "contents {:?}", contents);
        }

        fs::write(&path, r#"{"last_reset":"not a time","version":1}"#).unwrap();
        assert_eq!(store.load(), None);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_loads_as_absent() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        fs::write(&path, r#"{"last_reset":"2026-01-25T10:30:45+00:00","version":1}"#).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores file modes; only assert when the read actually fails.
        let readable = fs::read_to_string(&path).is_ok();
        let loaded = StateStore::new(&path).load();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        if !readable {
            assert_eq!(loaded, None);
        }
    }

    #[test]
    fn unknown_version_still_reads_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        fs::write(&path, r#"{"last_reset":"2026-01-25T10:30:45Z","version":7}"#).unwrap();

        assert_eq!(StateStore::new(&path).load(), Some(sample_time()));
    }

    #[test]
    fn naive_legacy_timestamp_is_read_as_local_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        fs::write(&path, r#"{"last_reset":"2026-01-25T10:30:45","version":1}"#).unwrap();

        let expected = Local
            .with_ymd_and_hms(2026, 1, 25, 10, 30, 45)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(StateStore::new(&path).load(), Some(expected));
    }

    #[test]
    fn save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/state/last_reset.json"));

        store.save(sample_time()).unwrap();

        assert_eq!(store.load(), Some(sample_time()));
    }

    #[test]
    fn save_leaves_no_temporary_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("last_reset.json"));
        for offset in 0..5 {
            store.save(sample_time() + Duration::seconds(offset)).unwrap();
        }

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn save_reports_failure_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "plain file").unwrap();
        let store = StateStore::new(blocker.join("last_reset.json"));

        assert!(store.save(sample_time()).is_err());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn earlier_timestamp_after_clock_step_back_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("last_reset.json"));
        let earlier = sample_time() - Duration::seconds(30);

        store.save(sample_time()).unwrap();
        store.save(earlier).unwrap();

        assert_eq!(store.load(), Some(earlier));
    }

    #[test]
    fn concurrent_reader_never_sees_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_reset.json");
        let store = Arc::new(StateStore::new(&path));
        store.save(sample_time()).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for offset in 1..=200 {
                    store.save(sample_time() + Duration::seconds(offset)).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut reads = 0;
        while !done.load(Ordering::SeqCst) {
            let raw = fs::read_to_string(&path).unwrap();
            let record: PersistedRecord = serde_json::from_str(&raw)
                .unwrap_or_else(|e| panic!("partial read {:?}: {}", raw, e));
            assert!(record.last_reset.is_some());
            reads += 1;
        }
        writer.join().unwrap();

        assert!(reads > 0);
        assert_eq!(store.load(), Some(sample_time() + Duration::seconds(200)));
    }

    #[test]
    fn parse_accepts_offsets_and_normalizes_to_utc() {
        let parsed = parse_timestamp("2026-01-25T12:30:45+02:00").unwrap();
        assert_eq!(parsed, sample_time());
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
