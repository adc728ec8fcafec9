//! Meeting rows and time-based recording matching.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_domain::Result;

use crate::persist::{load_map, save_map, snapshot_path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    /// Platform-assigned name, normally carrying a timestamp suffix.
    pub room_name: String,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub num_clients: u32,
    #[serde(default = "d_true")]
    pub is_active: bool,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub platform: String,
    /// Composed cloud recording, written at most once.
    #[serde(default)]
    pub cloud_recording_key: Option<String>,
    #[serde(default)]
    pub cloud_recording_duration: Option<u64>,
}

fn d_true() -> bool {
    true
}

pub struct MeetingStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, Meeting>>,
}

impl MeetingStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "meetings");
        let rows = load_map(&path);
        tracing::info!(rows = rows.len(), path = %path.display(), "meeting store loaded");
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn create(&self, meeting: Meeting) -> Meeting {
        self.rows
            .write()
            .insert(meeting.id.clone(), meeting.clone());
        meeting
    }

    pub fn get(&self, id: &str) -> Option<Meeting> {
        self.rows.read().get(id).cloned()
    }

    pub fn list_active(&self) -> Vec<Meeting> {
        self.rows
            .read()
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect()
    }

    pub fn list_by_room(&self, room_id: &str) -> Vec<Meeting> {
        self.rows
            .read()
            .values()
            .filter(|m| m.room_id.as_deref() == Some(room_id))
            .cloned()
            .collect()
    }

    /// Match a recording to a meeting by room name and proximity in time.
    ///
    /// The window is inclusive on both ends. Among candidates the one
    /// closest to `recording_start` wins; exact ties break on the
    /// lexicographically smallest meeting id so concurrent pollers agree.
    pub fn get_by_room_name_and_time(
        &self,
        room_name: &str,
        recording_start: DateTime<Utc>,
        window_hours: u32,
    ) -> Option<Meeting> {
        let window = Duration::hours(window_hours as i64);
        let window_start = recording_start - window;
        let window_end = recording_start + window;

        let rows = self.rows.read();
        let mut candidates: Vec<&Meeting> = rows
            .values()
            .filter(|m| {
                m.room_name == room_name
                    && m.start_date >= window_start
                    && m.start_date <= window_end
            })
            .collect();

        candidates.sort_by(|a, b| {
            let da = (a.start_date - recording_start).abs();
            let db = (b.start_date - recording_start).abs();
            da.cmp(&db).then_with(|| a.id.cmp(&b.id))
        });

        candidates.first().map(|m| (*m).clone())
    }

    /// First write wins; later writers get `false` and must not overwrite.
    pub fn set_cloud_recording_if_missing(
        &self,
        meeting_id: &str,
        s3_key: &str,
        duration: u64,
    ) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(meeting_id) {
            Some(meeting) if meeting.cloud_recording_key.is_none() => {
                meeting.cloud_recording_key = Some(s3_key.to_string());
                meeting.cloud_recording_duration = Some(duration);
                true
            }
            _ => false,
        }
    }

    pub fn deactivate(&self, meeting_id: &str) {
        let mut rows = self.rows.write();
        if let Some(meeting) = rows.get_mut(meeting_id) {
            meeting.is_active = false;
            meeting.end_date = Some(Utc::now());
            tracing::info!(meeting_id = %meeting_id, "meeting deactivated");
        }
    }

    pub fn set_num_clients(&self, meeting_id: &str, num_clients: u32) {
        if let Some(meeting) = self.rows.write().get_mut(meeting_id) {
            meeting.num_clients = num_clients;
        }
    }

    pub fn delete(&self, meeting_id: &str) {
        self.rows.write().remove(meeting_id);
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}
