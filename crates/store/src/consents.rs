//! Per-meeting consent rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_domain::Result;

use crate::persist::{load_map, save_map, snapshot_path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingConsent {
    pub meeting_id: String,
    pub user_id: String,
    pub consent_given: bool,
    pub consent_timestamp: DateTime<Utc>,
}

pub struct ConsentStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, MeetingConsent>>,
}

impl ConsentStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "consents");
        let rows = load_map(&path);
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    /// One row per (meeting, user); the latest answer wins.
    pub fn upsert(&self, consent: MeetingConsent) {
        let key = format!("{}:{}", consent.meeting_id, consent.user_id);
        self.rows.write().insert(key, consent);
    }

    /// Whether any participant denied consent for the meeting.
    pub fn any_denied(&self, meeting_id: &str) -> bool {
        self.rows
            .read()
            .values()
            .any(|c| c.meeting_id == meeting_id && !c.consent_given)
    }

    pub fn delete_by_meeting(&self, meeting_id: &str) {
        self.rows.write().retain(|_, c| c.meeting_id != meeting_id);
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}
