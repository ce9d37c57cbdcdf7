use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const APP_DIR: &str = "camdeck";
const HISTORY_FILE: &str = "snapshot_history.json";

/// One successful snapshot action. Records are accumulated locally and
/// never produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub camera_id: String,
    pub ts: i64,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotHistory {
    pub records: Vec<SnapshotRecord>,
}

impl SnapshotHistory {
    /// New records go to the front; existing entries are never removed
    /// or reordered.
    pub fn prepend(&mut self, record: SnapshotRecord) {
        self.records.insert(0, record);
    }
}

pub fn history_path() -> Result<PathBuf> {
    Ok(data_root()?.join(APP_DIR).join(HISTORY_FILE))
}

pub fn load_history() -> Result<SnapshotHistory> {
    let path = history_path()?;
    if !path.exists() {
        return Ok(SnapshotHistory::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading snapshot history at {}", path.display()))?;
    let parsed = serde_json::from_str::<SnapshotHistory>(&raw)
        .with_context(|| format!("failed parsing snapshot history at {}", path.display()))?;
    Ok(parsed)
}

pub fn save_history(history: &SnapshotHistory) -> Result<()> {
    let path = history_path()?;
    ensure_parent_dir(&path)?;

    let payload =
        serde_json::to_string_pretty(history).context("failed serializing snapshot history")?;
    fs::write(&path, payload)
        .with_context(|| format!("failed writing snapshot history at {}", path.display()))?;
    Ok(())
}

#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating data directory {}", parent.display()))?;
    }
    Ok(())
}

fn data_root() -> Result<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("unable to determine user data directory")
}

#[cfg(test)]
mod tests {
    use super::{SnapshotHistory, SnapshotRecord};

    fn record(camera_id: &str, ts: i64) -> SnapshotRecord {
        SnapshotRecord {
            camera_id: camera_id.to_owned(),
            ts,
            url: format!("http://backend/snapshots/{camera_id}/{ts}.jpg"),
        }
    }

    #[test]
    fn prepend_is_append_at_front() {
        let mut history = SnapshotHistory::default();
        history.prepend(record("cam1", 100));
        history.prepend(record("cam2", 200));
        history.prepend(record("cam1", 300));

        let order: Vec<i64> = history.records.iter().map(|r| r.ts).collect();
        assert_eq!(order, vec![300, 200, 100]);
    }

    #[test]
    fn prepend_never_drops_existing_entries() {
        let mut history = SnapshotHistory::default();
        for ts in 0..64 {
            history.prepend(record("cam1", ts));
        }
        assert_eq!(history.records.len(), 64);
        assert_eq!(history.records.last().map(|r| r.ts), Some(0));
    }

    #[test]
    fn history_round_trips_through_json() {
        let mut history = SnapshotHistory::default();
        history.prepend(record("cam1", 42));
        let raw = serde_json::to_string(&history).unwrap();
        let parsed: SnapshotHistory = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.records, history.records);
    }
}
