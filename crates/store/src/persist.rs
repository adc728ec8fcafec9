//! JSON snapshot helpers shared by the stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use rf_domain::{Error, Result};

/// Resolve the snapshot file for a store.
pub(crate) fn snapshot_path(state_path: &Path, name: &str) -> PathBuf {
    state_path.join(format!("{name}.json"))
}

/// Load a map snapshot, tolerating a missing or corrupt file.
pub(crate) fn load_map<T: DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    if !path.exists() {
        return HashMap::new();
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

/// Write a map snapshot.
pub(crate) fn save_map<T: Serialize>(path: &Path, rows: &HashMap<String, T>) -> Result<()> {
    let json = serde_json::to_string_pretty(rows)
        .map_err(|e| Error::Other(format!("serializing snapshot: {e}")))?;
    std::fs::write(path, json).map_err(Error::Io)?;
    Ok(())
}
