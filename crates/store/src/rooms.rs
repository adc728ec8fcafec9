//! Room rows: the addressable conference identities that own meetings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_domain::Result;

use crate::persist::{load_map, save_map, snapshot_path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    /// Unique human-facing name.
    pub name: String,
    pub user_id: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub recording_type: String,
    #[serde(default)]
    pub recording_trigger: String,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

pub struct RoomStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, Room>>,
}

impl RoomStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "rooms");
        let rows = load_map(&path);
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn create(&self, room: Room) -> Room {
        self.rows.write().insert(room.id.clone(), room.clone());
        room
    }

    pub fn get(&self, id: &str) -> Option<Room> {
        self.rows.read().get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Room> {
        self.rows.read().values().find(|r| r.name == name).cloned()
    }

    pub fn delete(&self, id: &str) {
        self.rows.write().remove(id);
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = RoomStore::open(dir.path()).unwrap();
        store.create(Room {
            id: "room-1".into(),
            name: "standup".into(),
            user_id: "u1".into(),
            platform: "daily".into(),
            recording_type: "raw-tracks".into(),
            recording_trigger: "automatic".into(),
            is_shared: false,
            webhook_url: None,
        });
        assert_eq!(store.get_by_name("standup").unwrap().id, "room-1");
        assert!(store.get_by_name("missing").is_none());
    }
}
