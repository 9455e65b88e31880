//! Session store: bounded per-session turn history with idle eviction.
//!
//! Each session lives in its own slot behind its own lock, so recording a
//! turn for one session never waits on another. The shared map lock is only
//! held to look a slot up or insert it. Idle sessions are removed by a
//! background sweeper, never on the request path.
//!
//! Storage is pluggable through [`SessionBackend`]: an in-memory map, or a
//! directory of JSON files (one `{session_id, history}` record per session)
//! reloaded at startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::interval;

use tcm_core::config::SessionSettings;
use tcm_core::{SessionRecord, Turn};

/// Errors from a session backend.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage behind the [`SessionStore`].
pub trait SessionBackend: Send + Sync {
    /// Chronological turns of a session; empty when the session is unknown.
    fn history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError>;

    /// Append a turn, creating the session if needed, and evict the oldest
    /// turns past `cap`. Returns the number of evicted turns.
    fn append(&self, session_id: &str, turn: Turn, cap: usize) -> Result<usize, SessionError>;

    /// Drop a session. Returns whether it existed.
    fn remove(&self, session_id: &str) -> Result<bool, SessionError>;

    /// Drop every session last accessed before `cutoff`. Returns their ids.
    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SessionError>;

    /// Number of live sessions.
    fn len(&self) -> usize;
}

// ── In-Memory Backend ────────────────────────────────────────────

struct Slot {
    record: SessionRecord,
    /// Set once the slot has been removed from the map.
    evicted: bool,
}

type SharedSlot = Arc<Mutex<Slot>>;

/// Sessions kept in process memory only.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<String, SharedSlot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_records(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        let sessions = records
            .into_iter()
            .map(|record| {
                let id = record.session_id.clone();
                let slot = Slot {
                    record,
                    evicted: false,
                };
                (id, Arc::new(Mutex::new(slot)))
            })
            .collect();
        Self {
            sessions: RwLock::new(sessions),
        }
    }

    fn slot(&self, session_id: &str) -> Option<SharedSlot> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn slot_or_insert(&self, session_id: &str) -> SharedSlot {
        if let Some(slot) = self.slot(session_id) {
            return slot;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    // Stamped by the first turn.
                    record: SessionRecord::new(session_id, DateTime::<Utc>::MIN_UTC),
                    evicted: false,
                }))
            })
            .clone()
    }

    /// Run `f` on the session record under its own lock, creating the
    /// session if it does not exist.
    fn update<R>(&self, session_id: &str, mut f: impl FnMut(&mut SessionRecord) -> R) -> R {
        loop {
            let slot = self.slot_or_insert(session_id);
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            // Lost a race with the sweeper; the next lookup inserts a fresh slot.
            if guard.evicted {
                continue;
            }
            return f(&mut guard.record);
        }
    }
}

impl SessionBackend for MemoryBackend {
    fn history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        Ok(self
            .slot(session_id)
            .map(|slot| {
                let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
                guard.record.history.clone()
            })
            .unwrap_or_default())
    }

    fn append(&self, session_id: &str, turn: Turn, cap: usize) -> Result<usize, SessionError> {
        let mut turn = Some(turn);
        Ok(self.update(session_id, |record| match turn.take() {
            Some(t) => record.push_turn(t, cap),
            None => 0,
        }))
    }

    fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        match removed {
            Some(slot) => {
                slot.lock().unwrap_or_else(PoisonError::into_inner).evicted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SessionError> {
        let is_idle = |slot: &SharedSlot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record
                .last_access
                < cutoff
        };

        let candidates: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| is_idle(slot))
            .map(|(id, _)| id.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut swept = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(slot) = sessions.get(&id).cloned() else {
                continue;
            };
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            // Re-check: a turn may have landed since the first pass.
            if guard.record.last_access < cutoff {
                guard.evicted = true;
                drop(guard);
                sessions.remove(&id);
                swept.push(id);
            }
        }
        Ok(swept)
    }

    fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ── JSON File Backend ────────────────────────────────────────────

/// Durable sessions: one pretty-printed JSON file per session under a
/// directory, written through on every turn and reloaded at startup.
pub struct JsonFileBackend {
    dir: PathBuf,
    memory: MemoryBackend,
}

impl JsonFileBackend {
    /// Open (or create) the session directory and load every record in it.
    /// Unreadable files are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }

        tracing::info!(dir = %dir.display(), sessions = records.len(), "Session files loaded");
        Ok(Self {
            dir,
            memory: MemoryBackend::from_records(records),
        })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(session_id)))
    }

    fn write_record(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let path = self.path_for(&record.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        tracing::debug!(
            session_id = %record.session_id,
            path = %path.display(),
            turns = record.history.len(),
            "Session saved"
        );
        Ok(())
    }

    fn delete_file(&self, session_id: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.path_for(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionBackend for JsonFileBackend {
    fn history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        self.memory.history(session_id)
    }

    fn append(&self, session_id: &str, turn: Turn, cap: usize) -> Result<usize, SessionError> {
        let mut turn = Some(turn);
        // The file is written while the session lock is held so writes for
        // one session land in the same order as the turns.
        self.memory.update(session_id, |record| {
            let evicted = match turn.take() {
                Some(t) => record.push_turn(t, cap),
                None => 0,
            };
            self.write_record(record).map(|()| evicted)
        })
    }

    fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        let existed = self.memory.remove(session_id)?;
        self.delete_file(session_id)?;
        Ok(existed)
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, SessionError> {
        let swept = self.memory.sweep(cutoff)?;
        for id in &swept {
            self.delete_file(id)?;
        }
        Ok(swept)
    }

    fn len(&self) -> usize {
        self.memory.len()
    }
}

fn read_record(path: &Path) -> Result<SessionRecord, SessionError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// File-safe name for a session id; anything outside `[A-Za-z0-9_-]` is
/// percent-encoded byte by byte.
fn file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

// ── Session Store ────────────────────────────────────────────────

/// Owner of all session state.
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    history_cap: usize,
    idle_ttl: chrono::Duration,
    /// Per-session request gates, present when strict arrival ordering is on.
    gates: Option<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, settings: &SessionSettings) -> Self {
        // Clamped so the conversion cannot overflow.
        let ttl_secs = settings.idle_ttl_secs.min(i64::MAX as u64 / 1_000) as i64;
        Self {
            backend,
            history_cap: settings.history_cap.max(1),
            idle_ttl: chrono::Duration::seconds(ttl_secs),
            gates: settings
                .serialize_requests
                .then(|| Mutex::new(HashMap::new())),
        }
    }

    /// Build the store described by the settings: file-backed when
    /// `persist_path` is set, in-memory otherwise.
    pub fn from_settings(settings: &SessionSettings) -> Result<Self, SessionError> {
        let backend: Arc<dyn SessionBackend> = match &settings.persist_path {
            Some(dir) => Arc::new(JsonFileBackend::open(dir)?),
            None => Arc::new(MemoryBackend::new()),
        };
        Ok(Self::new(backend, settings))
    }

    /// Prior turns of a session, oldest first.
    pub fn get_context(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        self.backend.history(session_id)
    }

    /// Append an answered turn and refresh the session's last access.
    pub fn record_turn(&self, session_id: &str, turn: Turn) -> Result<(), SessionError> {
        let evicted = self.backend.append(session_id, turn, self.history_cap)?;
        if evicted > 0 {
            tracing::debug!(session_id, evicted, "Oldest turns evicted");
        }
        Ok(())
    }

    /// Forget a session entirely. Returns whether it existed.
    pub fn reset(&self, session_id: &str) -> Result<bool, SessionError> {
        let existed = self.backend.remove(session_id)?;
        self.drop_gates(std::iter::once(session_id));
        Ok(existed)
    }

    /// Drop sessions idle longer than the TTL. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let Some(cutoff) = now.checked_sub_signed(self.idle_ttl) else {
            return Ok(0);
        };
        let swept = self.backend.sweep(cutoff)?;
        self.drop_gates(swept.iter().map(String::as_str));
        Ok(swept.len())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    /// Wait for exclusive use of a session when strict ordering is enabled.
    /// Returns `None` (no waiting) otherwise.
    pub async fn acquire(&self, session_id: &str) -> Option<OwnedMutexGuard<()>> {
        let gates = self.gates.as_ref()?;
        let gate = gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone();
        Some(gate.lock_owned().await)
    }

    fn drop_gates<'a>(&self, ids: impl Iterator<Item = &'a str>) {
        let Some(gates) = &self.gates else {
            return;
        };
        let mut gates = gates.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            // Keep gates someone is holding or waiting on.
            if gates.get(id).is_some_and(|g| Arc::strong_count(g) == 1) {
                gates.remove(id);
            }
        }
    }

    /// Start the background sweeper. It runs until the runtime shuts down
    /// or the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                match store.sweep(Utc::now()) {
                    Ok(0) => {}
                    Ok(swept) => {
                        tracing::info!(swept, remaining = store.len(), "Idle sessions evicted");
                    }
                    Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
                }
            }
        })
    }
}
