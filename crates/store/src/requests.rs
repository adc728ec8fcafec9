//! Recording request registry.
//!
//! Each request the platform acknowledges gets a row keyed by the external
//! recording id. Stop/restart within one meeting session appends another
//! row under the same `instance_id`; rows are never deleted by the
//! reconciler.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use rf_domain::transcript::{RecordingKind, RecordingRequest};
use rf_domain::Result;

use crate::persist::{load_map, save_map, snapshot_path};

pub struct RequestStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, RecordingRequest>>,
}

impl RequestStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "recording_requests");
        let rows = load_map(&path);
        tracing::info!(rows = rows.len(), path = %path.display(), "request store loaded");
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    /// Insert a request row; the recording id is unique, so a duplicate
    /// insert (webhook + poller racing) is a no-op returning `false`.
    pub fn create(&self, request: RecordingRequest) -> bool {
        let mut rows = self.rows.write();
        if rows.contains_key(&request.recording_id) {
            return false;
        }
        rows.insert(request.recording_id.clone(), request);
        true
    }

    /// Exact match for an incoming recording. This wins over time-based
    /// matching.
    pub fn find_by_recording_id(&self, recording_id: &str) -> Option<(String, RecordingKind)> {
        self.rows
            .read()
            .get(recording_id)
            .map(|r| (r.meeting_id.clone(), r.kind))
    }

    pub fn get_by_meeting_id(&self, meeting_id: &str) -> Vec<RecordingRequest> {
        let mut rows: Vec<RecordingRequest> = self
            .rows
            .read()
            .values()
            .filter(|r| r.meeting_id == meeting_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        rows
    }

    pub fn delete_by_meeting_id(&self, meeting_id: &str) {
        self.rows.write().retain(|_, r| r.meeting_id != meeting_id);
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}
