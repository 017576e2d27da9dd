//! Append-only NDJSON logs, one file per session.

use crate::{
    signal::{IngestReceipt, Signal, StoredRecord},
    Error, Result,
};
use log::{debug, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    /// Signal ids already on disk; loaded on first append
    seen: Option<HashSet<Uuid>>,
}

impl SessionLog {
    fn seen_ids(&mut self) -> Result<&mut HashSet<Uuid>> {
        if self.seen.is_none() {
            let ids = load_signal_ids(&self.path)?;
            debug!("Loaded {} signal ids from {}", ids.len(), self.path.display());
            self.seen = Some(ids);
        }
        Ok(self.seen.get_or_insert_with(HashSet::new))
    }
}

/// Per-session log files under one data directory. Appends to the same session are
/// serialized; different sessions never contend beyond a brief map lookup.
#[derive(Debug)]
pub struct SignalStore {
    data_dir: PathBuf,
    logs: Mutex<HashMap<String, Arc<Mutex<SessionLog>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SignalStore {
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            logs: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn log_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("signals_{session_id}.ndjson"))
    }

    fn session(&self, session_id: &str) -> Arc<Mutex<SessionLog>> {
        lock(&self.logs)
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SessionLog {
                    path: self.log_path(session_id),
                    seen: None,
                }))
            })
            .clone()
    }

    /// Append signals in order, one line each. Signals whose id is already stored are
    /// skipped. The whole batch goes out in a single write.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read, encoded, or written
    pub fn append(&self, session_id: &str, signals: &[Signal]) -> Result<IngestReceipt> {
        let session = self.session(session_id);
        let mut log = lock(&session);
        let seen = log.seen_ids()?;

        let mut buffer = String::new();
        let mut fresh_ids = Vec::new();
        let mut written = 0;
        let mut duplicates = 0;
        for signal in signals {
            if let Some(id) = signal.signal_id {
                if seen.contains(&id) || fresh_ids.contains(&id) {
                    duplicates += 1;
                    continue;
                }
                fresh_ids.push(id);
            }
            let record = StoredRecord {
                signal: signal.clone(),
                session_id: session_id.to_string(),
            };
            buffer.push_str(&serde_json::to_string(&record)?);
            buffer.push('\n');
            written += 1;
        }

        if written > 0 {
            let path = log.path.clone();
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(buffer.as_bytes())?;
            file.sync_data()?;
            debug!("Appended {} records to {}", written, path.display());
        }

        // Only after the write landed
        log.seen_ids()?.extend(fresh_ids);
        Ok(IngestReceipt { written, duplicates })
    }

    /// The last `limit` records in arrival order
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the session has no log yet
    pub fn tail(&self, session_id: &str, limit: usize) -> Result<Vec<StoredRecord>> {
        // Reads never register a session that has nothing on disk
        let existing = lock(&self.logs).get(session_id).cloned();
        let session = match existing {
            Some(session) => session,
            None if self.log_path(session_id).exists() => self.session(session_id),
            None => return Err(Error::NotFound(format!("no data yet for session {session_id}"))),
        };
        let log = lock(&session);

        let file = match File::open(&log.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("no data yet for session {session_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut window: VecDeque<String> = VecDeque::with_capacity(limit);
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if window.len() == limit {
                window.pop_front();
            }
            window.push_back(line);
        }

        Ok(window
            .iter()
            .filter_map(|line| match serde_json::from_str::<StoredRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable record in {}: {}", log.path.display(), e);
                    None
                }
            })
            .collect())
    }
}

fn load_signal_ids(path: &Path) -> Result<HashSet<Uuid>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .and_then(|v| v.get("signal_id").and_then(|id| id.as_str()).and_then(|s| Uuid::parse_str(s).ok()));
        if let Some(id) = id {
            ids.insert(id);
        }
    }
    Ok(ids)
}
