//! Recording rows: the canonical lock against double-dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_domain::Result;

use crate::persist::{load_map, save_map, snapshot_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Pending,
    Orphan,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// External platform id when known.
    pub id: String,
    pub bucket_name: String,
    /// Folder or file key in the bucket.
    pub object_key: String,
    /// Per-speaker track keys. `None` for single-file recordings; an empty
    /// list is invalid input upstream.
    #[serde(default)]
    pub track_keys: Option<Vec<String>>,
    pub recorded_at: DateTime<Utc>,
    /// `None` marks an orphan.
    #[serde(default)]
    pub meeting_id: Option<String>,
    pub status: RecordingStatus,
}

pub struct RecordingStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, Recording>>,
}

impl RecordingStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "recordings");
        let rows = load_map(&path);
        tracing::info!(rows = rows.len(), path = %path.display(), "recording store loaded");
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    /// Insert a recording already linked to its meeting.
    ///
    /// Atomic on the recording id: exactly one of any set of concurrent
    /// callers gets `true`, and only that caller may dispatch processing.
    pub fn try_create_with_meeting(&self, recording: Recording) -> bool {
        let mut rows = self.rows.write();
        if rows.contains_key(&recording.id) {
            return false;
        }
        rows.insert(recording.id.clone(), recording);
        true
    }

    /// Record a recording that matched no meeting.
    ///
    /// Idempotent: rediscovering the same orphan is a no-op, and there is
    /// never more than one row per id.
    pub fn create_orphan(&self, mut recording: Recording) -> Recording {
        recording.meeting_id = None;
        recording.status = RecordingStatus::Orphan;

        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(&recording.id) {
            return existing.clone();
        }
        tracing::warn!(recording_id = %recording.id, "recording stored as orphan");
        rows.insert(recording.id.clone(), recording.clone());
        recording
    }

    pub fn get(&self, id: &str) -> Option<Recording> {
        self.rows.read().get(id).cloned()
    }

    pub fn get_by_ids(&self, ids: &[String]) -> Vec<Recording> {
        let rows = self.rows.read();
        ids.iter().filter_map(|id| rows.get(id).cloned()).collect()
    }

    pub fn set_status(&self, id: &str, status: RecordingStatus) {
        if let Some(row) = self.rows.write().get_mut(id) {
            row.status = status;
        }
    }

    pub fn delete(&self, id: &str) {
        self.rows.write().remove(id);
    }

    pub fn list_by_meeting(&self, meeting_id: &str) -> Vec<Recording> {
        self.rows
            .read()
            .values()
            .filter(|r| r.meeting_id.as_deref() == Some(meeting_id))
            .cloned()
            .collect()
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RecordingStore {
        let dir = tempfile::tempdir().unwrap();
        RecordingStore::open(dir.path()).unwrap()
    }

    fn recording(id: &str) -> Recording {
        Recording {
            id: id.into(),
            bucket_name: "test-bucket".into(),
            object_key: "recordings/room-20260114".into(),
            track_keys: Some(vec!["t1.webm".into(), "t2.webm".into()]),
            recorded_at: Utc::now(),
            meeting_id: Some("meeting-1".into()),
            status: RecordingStatus::Pending,
        }
    }

    #[test]
    fn exactly_one_creator_wins() {
        let store = store();
        assert!(store.try_create_with_meeting(recording("rec-1")));
        assert!(!store.try_create_with_meeting(recording("rec-1")));
    }

    #[test]
    fn concurrent_creators_race_cleanly() {
        let store = std::sync::Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.try_create_with_meeting(recording("rec-racy"))
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn orphan_creation_is_idempotent() {
        let store = store();
        let first = store.create_orphan(recording("rec-orphan"));
        assert_eq!(first.status, RecordingStatus::Orphan);
        assert!(first.meeting_id.is_none());

        // Second discovery is a no-op.
        let second = store.create_orphan(recording("rec-orphan"));
        assert_eq!(second.status, RecordingStatus::Orphan);

        let all: Vec<_> = [store.get("rec-orphan")].into_iter().flatten().collect();
        assert_eq!(all.len(), 1);
    }
}
