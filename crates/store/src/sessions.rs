//! Participant session rows, keyed `meeting_id:session_id`.
//!
//! Rows can go stale (the participant left but `left_at` is still NULL);
//! the presence reconciler treats the platform API as truth and only falls
//! back to these rows when the API is unavailable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_domain::Result;

use crate::persist::{load_map, save_map, snapshot_path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSession {
    pub meeting_id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub user_name: String,
    pub joined_at: DateTime<Utc>,
    /// `None` while the session is (believed to be) open.
    #[serde(default)]
    pub left_at: Option<DateTime<Utc>>,
}

impl ParticipantSession {
    fn key(&self) -> String {
        session_key(&self.meeting_id, &self.session_id)
    }
}

fn session_key(meeting_id: &str, session_id: &str) -> String {
    format!("{meeting_id}:{session_id}")
}

pub struct SessionStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, ParticipantSession>>,
}

impl SessionStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "participant_sessions");
        let rows = load_map(&path);
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    /// Insert or refresh a joined session.
    pub fn upsert_joined(&self, session: ParticipantSession) {
        self.rows.write().insert(session.key(), session);
    }

    pub fn mark_left(&self, meeting_id: &str, session_id: &str) {
        let key = session_key(meeting_id, session_id);
        if let Some(row) = self.rows.write().get_mut(&key) {
            row.left_at = Some(Utc::now());
        }
    }

    /// Sessions with no recorded leave time.
    pub fn get_active_by_meeting(&self, meeting_id: &str) -> Vec<ParticipantSession> {
        self.rows
            .read()
            .values()
            .filter(|s| s.meeting_id == meeting_id && s.left_at.is_none())
            .cloned()
            .collect()
    }

    /// Whether the meeting ever had a participant.
    pub fn has_any_by_meeting(&self, meeting_id: &str) -> bool {
        self.rows
            .read()
            .values()
            .any(|s| s.meeting_id == meeting_id)
    }

    pub fn delete_by_meeting(&self, meeting_id: &str) {
        self.rows.write().retain(|_, s| s.meeting_id != meeting_id);
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        let dir = tempfile::tempdir().unwrap();
        SessionStore::open(dir.path()).unwrap()
    }

    fn session(meeting: &str, session_id: &str) -> ParticipantSession {
        ParticipantSession {
            meeting_id: meeting.into(),
            session_id: session_id.into(),
            user_id: Some("u1".into()),
            user_name: "User One".into(),
            joined_at: Utc::now(),
            left_at: None,
        }
    }

    #[test]
    fn active_sessions_exclude_left() {
        let store = store();
        store.upsert_joined(session("m1", "s1"));
        store.upsert_joined(session("m1", "s2"));
        store.mark_left("m1", "s1");

        let active = store.get_active_by_meeting("m1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s2");
        assert!(store.has_any_by_meeting("m1"));
    }

    #[test]
    fn upsert_same_key_replaces() {
        let store = store();
        store.upsert_joined(session("m1", "s1"));
        store.upsert_joined(session("m1", "s1"));
        assert_eq!(store.get_active_by_meeting("m1").len(), 1);
    }
}
