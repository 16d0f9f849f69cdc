//! # Storage Module - Durable queue and position persistence
//!
//! Sled-backed persistence for the gateway's two durable concerns: last-known GPS
//! positions per mesh node, and the note queue that carries each accepted report from
//! admission through its terminal outcome. Rows are JSON-serialized into named trees;
//! the store is the source of truth for queue state, while the position cache and the
//! worker's retry map treat it as ground truth they mirror.
//!
//! ```text
//! <data_dir>/queue/
//! ├── positions   ← node_id -> Position (JSON)
//! ├── notes       ← queue_id -> NoteRecord (JSON), key order = creation order
//! └── meta        ← monotonic counters (note sequence)
//! ```
//!
//! Queue ids are `Q-%06d` from a monotonic counter and are never reused; zero-padding
//! keeps sled's lexicographic key order aligned with creation order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const TREE_POSITIONS: &str = "positions";
const TREE_NOTES: &str = "notes";
const TREE_META: &str = "meta";

const KEY_NOTE_SEQ: &[u8] = b"note_seq";

/// Storage-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no queue entry with id {0}")]
    NoteNotFound(String),
}

/// Last-known GPS observation for one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub received_at: DateTime<Utc>,
    pub seen_count: u64,
}

/// Queue entry lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteState {
    /// Accepted, awaiting submission to OSM.
    Pending,
    /// Submitted successfully; device not yet informed.
    Sent,
    /// Retry ceiling exceeded; terminal.
    Failed,
    /// Submitted and the device has been informed.
    Notified,
}

impl NoteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteState::Pending => "pending",
            NoteState::Sent => "sent",
            NoteState::Failed => "failed",
            NoteState::Notified => "notified",
        }
    }
}

/// Durable record of one report from acceptance through terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    pub queue_id: String,
    pub node_id: String,
    pub lat: f64,
    pub lon: f64,
    pub text_original: String,
    pub text_normalized: String,
    pub state: NoteState,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osm_note_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osm_note_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,
}

/// Per-node queue totals, used for the periodic privacy reminder and `#osmlist`.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub total: u64,
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Sled-backed store. Cloning is cheap (trees share one database handle), which is
/// how the position cache, validator, worker, and dispatcher all see the same rows.
#[derive(Clone)]
pub struct Store {
    _db: sled::Db,
    positions: sled::Tree,
    notes: sled::Tree,
    meta: sled::Tree,
}

impl Store {
    /// Open (or create) the store under `<data_dir>/queue`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let path: PathBuf = data_dir.as_ref().join("queue");
        std::fs::create_dir_all(&path).map_err(|e| StoreError::Db(sled::Error::Io(e)))?;
        let db = sled::open(&path)?;
        let positions = db.open_tree(TREE_POSITIONS)?;
        let notes = db.open_tree(TREE_NOTES)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self {
            _db: db,
            positions,
            notes,
            meta,
        })
    }

    // ---- positions -------------------------------------------------------

    /// Persist one position observation, overwriting any previous row for the node.
    pub fn save_position(
        &self,
        node_id: &str,
        lat: f64,
        lon: f64,
        received_at: DateTime<Utc>,
        seen_count: u64,
    ) -> Result<(), StoreError> {
        let pos = Position {
            lat,
            lon,
            received_at,
            seen_count,
        };
        let value = serde_json::to_vec(&pos)?;
        self.positions.insert(node_id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get_position(&self, node_id: &str) -> Result<Option<Position>, StoreError> {
        match self.positions.get(node_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load every persisted position. Rows that fail to deserialize are skipped
    /// rather than poisoning startup.
    pub fn load_all_positions(&self) -> Result<HashMap<String, Position>, StoreError> {
        let mut out = HashMap::new();
        for item in self.positions.iter() {
            let (key, raw) = item?;
            let node_id = String::from_utf8_lossy(&key).to_string();
            match serde_json::from_slice::<Position>(&raw) {
                Ok(pos) => {
                    out.insert(node_id, pos);
                }
                Err(e) => {
                    log::warn!("Skipping corrupt position row for {}: {}", node_id, e);
                }
            }
        }
        Ok(out)
    }

    /// Delete positions older than `max_age_secs`. Returns the number removed.
    pub fn cleanup_old_positions(&self, max_age_secs: u64) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(max_age_secs as i64);
        let mut stale: Vec<Vec<u8>> = Vec::new();
        for item in self.positions.iter() {
            let (key, raw) = item?;
            if let Ok(pos) = serde_json::from_slice::<Position>(&raw) {
                if pos.received_at < cutoff {
                    stale.push(key.to_vec());
                }
            }
        }
        for key in &stale {
            self.positions.remove(key)?;
        }
        Ok(stale.len())
    }

    // ---- note queue ------------------------------------------------------

    /// Create a pending queue entry and return its new queue id.
    pub fn create_note(
        &self,
        node_id: &str,
        lat: f64,
        lon: f64,
        text_original: &str,
        text_normalized: &str,
    ) -> Result<String, StoreError> {
        let seq = self.next_note_seq()?;
        let queue_id = format!("Q-{:06}", seq);
        let record = NoteRecord {
            queue_id: queue_id.clone(),
            node_id: node_id.to_string(),
            lat,
            lon,
            text_original: text_original.to_string(),
            text_normalized: text_normalized.to_string(),
            state: NoteState::Pending,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            osm_note_id: None,
            osm_note_url: None,
            notified_at: None,
        };
        self.put_note(&record)?;
        Ok(queue_id)
    }

    pub fn get_note_by_queue_id(&self, queue_id: &str) -> Result<Option<NoteRecord>, StoreError> {
        match self.notes.get(queue_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Oldest-first pending entries, up to `limit`.
    pub fn get_pending_notes(&self, limit: usize) -> Result<Vec<NoteRecord>, StoreError> {
        self.scan_notes(limit, |n| n.state == NoteState::Pending)
    }

    /// Entries submitted to OSM whose device has not been informed yet.
    pub fn get_pending_for_notification(&self) -> Result<Vec<NoteRecord>, StoreError> {
        self.scan_notes(usize::MAX, |n| {
            n.state == NoteState::Sent && n.notified_at.is_none()
        })
    }

    /// Dead-lettered entries whose device has not been informed yet.
    pub fn get_failed_for_notification(&self) -> Result<Vec<NoteRecord>, StoreError> {
        self.scan_notes(usize::MAX, |n| {
            n.state == NoteState::Failed && n.notified_at.is_none()
        })
    }

    /// Record a failed submission attempt: bumps the persisted retry count and
    /// stores the classified error. State stays pending.
    pub fn update_note_error(
        &self,
        queue_id: &str,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), StoreError> {
        let mut note = self.require_note(queue_id)?;
        note.retry_count = retry_count;
        note.last_error = Some(last_error.to_string());
        self.put_note(&note)
    }

    /// Transition an entry to `sent` with its remote identifier and URL.
    pub fn mark_note_sent(
        &self,
        queue_id: &str,
        osm_note_id: i64,
        osm_note_url: &str,
    ) -> Result<(), StoreError> {
        let mut note = self.require_note(queue_id)?;
        note.state = NoteState::Sent;
        note.osm_note_id = Some(osm_note_id);
        note.osm_note_url = Some(osm_note_url.to_string());
        note.last_error = None;
        self.put_note(&note)
    }

    /// Dead-letter an entry after the retry ceiling.
    pub fn mark_note_failed(&self, queue_id: &str, last_error: &str) -> Result<(), StoreError> {
        let mut note = self.require_note(queue_id)?;
        note.state = NoteState::Failed;
        note.last_error = Some(last_error.to_string());
        self.put_note(&note)
    }

    /// Record that the device has been informed of the entry's terminal outcome.
    /// Sent entries advance to `notified`; failed entries keep their state (still
    /// visible as failures in `#osmlist`) and only gain the timestamp.
    pub fn mark_notified(&self, queue_id: &str) -> Result<(), StoreError> {
        let mut note = self.require_note(queue_id)?;
        note.notified_at = Some(Utc::now());
        if note.state == NoteState::Sent {
            note.state = NoteState::Notified;
        }
        self.put_note(&note)
    }

    /// Exact-text duplicate check: same node, same normalized text, created within
    /// `window_secs`, and not already dead-lettered. Returns the matching queue id.
    pub fn find_recent_duplicate(
        &self,
        node_id: &str,
        text_normalized: &str,
        window_secs: u64,
    ) -> Result<Option<String>, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(window_secs as i64);
        for item in self.notes.iter() {
            let (_, raw) = item?;
            let note: NoteRecord = match serde_json::from_slice(&raw) {
                Ok(n) => n,
                Err(_) => continue,
            };
            if note.node_id == node_id
                && note.text_normalized == text_normalized
                && note.created_at >= cutoff
                && matches!(
                    note.state,
                    NoteState::Pending | NoteState::Sent | NoteState::Notified
                )
            {
                return Ok(Some(note.queue_id));
            }
        }
        Ok(None)
    }

    /// Most-recent-first entries for one node, up to `limit`.
    pub fn list_notes_for_node(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<NoteRecord>, StoreError> {
        let mut out = Vec::new();
        for item in self.notes.iter().rev() {
            let (_, raw) = item?;
            let note: NoteRecord = match serde_json::from_slice(&raw) {
                Ok(n) => n,
                Err(_) => continue,
            };
            if note.node_id == node_id {
                out.push(note);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Queue totals for one node.
    pub fn get_node_stats(&self, node_id: &str) -> Result<NodeStats, StoreError> {
        let mut stats = NodeStats::default();
        for item in self.notes.iter() {
            let (_, raw) = item?;
            let note: NoteRecord = match serde_json::from_slice(&raw) {
                Ok(n) => n,
                Err(_) => continue,
            };
            if note.node_id != node_id {
                continue;
            }
            stats.total += 1;
            match note.state {
                NoteState::Pending => stats.pending += 1,
                NoteState::Sent | NoteState::Notified => stats.sent += 1,
                NoteState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    // ---- internals -------------------------------------------------------

    fn put_note(&self, note: &NoteRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(note)?;
        self.notes.insert(note.queue_id.as_bytes(), value)?;
        Ok(())
    }

    fn require_note(&self, queue_id: &str) -> Result<NoteRecord, StoreError> {
        self.get_note_by_queue_id(queue_id)?
            .ok_or_else(|| StoreError::NoteNotFound(queue_id.to_string()))
    }

    fn scan_notes<F>(&self, limit: usize, keep: F) -> Result<Vec<NoteRecord>, StoreError>
    where
        F: Fn(&NoteRecord) -> bool,
    {
        let mut out = Vec::new();
        for item in self.notes.iter() {
            let (_, raw) = item?;
            let note: NoteRecord = match serde_json::from_slice(&raw) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("Skipping corrupt queue row: {}", e);
                    continue;
                }
            };
            if keep(&note) {
                out.push(note);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn next_note_seq(&self) -> Result<u64, StoreError> {
        let raw = self.meta.update_and_fetch(KEY_NOTE_SEQ, |old| {
            let next = match old {
                Some(bytes) => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    u64::from_be_bytes(buf) + 1
                }
                None => 1,
            };
            Some(next.to_be_bytes().to_vec())
        })?;
        let raw = raw.expect("update_and_fetch always writes a value");
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&raw);
        Ok(u64::from_be_bytes(buf))
    }
}
