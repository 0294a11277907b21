//! Named view store.
//!
//! A view is a structural record of a layout: tile count, mode, the virtual
//! window and one optional channel per tile slot.  Stored as a single JSON
//! document `{"views": {name: record}}`, rewritten atomically on every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::channel::{lenient_assignment, normalize_assignment, Assignment};
use crate::state::tmp_path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub tile_count: usize,
    #[serde(default)]
    pub virtual_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_channel_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_column: Option<usize>,
    #[serde(default = "empty_assignment", deserialize_with = "lenient_assignment")]
    pub channel_assignment: Assignment,
}

fn empty_assignment() -> Assignment {
    normalize_assignment(Vec::new())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ViewsFile {
    #[serde(default)]
    views: BTreeMap<String, ViewRecord>,
}

pub struct ViewStore {
    path: PathBuf,
    data: ViewsFile,
}

impl ViewStore {
    /// Open the store at `path`.  A missing or malformed file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("views file {} unreadable, starting empty: {}", path.display(), e);
                ViewsFile::default()
            }),
            Err(_) => ViewsFile::default(),
        };
        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// View names, sorted case-insensitively.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.data.views.keys().cloned().collect();
        names.sort_by_key(|n| n.to_lowercase());
        names
    }

    /// Names are matched with surrounding whitespace ignored.
    pub fn get(&self, name: &str) -> Option<&ViewRecord> {
        self.data.views.get(name.trim())
    }

    pub async fn save_view(&mut self, name: &str, record: ViewRecord) -> anyhow::Result<()> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("view name must not be empty");
        }
        self.data.views.insert(name.to_string(), record);
        self.flush().await
    }

    /// Returns whether a view was removed.
    pub async fn delete(&mut self, name: &str) -> anyhow::Result<bool> {
        if self.data.views.remove(name.trim()).is_none() {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    async fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;

    fn record(tiles: usize) -> ViewRecord {
        let mut assign = empty_assignment();
        assign[0] = ChannelId::new(4);
        assign[1] = ChannelId::new(9);
        ViewRecord {
            tile_count: tiles,
            virtual_mode: false,
            active_channel_count: None,
            viewport_column: None,
            channel_assignment: assign,
        }
    }

    #[tokio::test]
    async fn test_save_list_reload_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.json");

        let mut store = ViewStore::open(&path);
        assert!(store.list_names().is_empty());
        store.save_view("lobby", record(4)).await.unwrap();
        store.save_view("Garage", record(2)).await.unwrap();
        store.save_view("annex", record(1)).await.unwrap();
        assert_eq!(store.list_names(), vec!["annex", "Garage", "lobby"]);

        let reopened = ViewStore::open(&path);
        assert_eq!(reopened.get("lobby"), Some(&record(4)));

        let mut store = reopened;
        assert!(store.delete("Garage").await.unwrap());
        assert!(!store.delete("Garage").await.unwrap());
        assert_eq!(ViewStore::open(&path).list_names(), vec!["annex", "lobby"]);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ViewStore::open(dir.path().join("views.json"));
        assert!(store.save_view("  ", record(4)).await.is_err());
    }

    #[tokio::test]
    async fn test_padded_names_resolve_to_trimmed_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ViewStore::open(dir.path().join("views.json"));
        store.save_view(" Lobby ", record(4)).await.unwrap();
        assert_eq!(store.list_names(), vec!["Lobby"]);
        assert_eq!(store.get(" Lobby "), Some(&record(4)));
        assert_eq!(store.get("Lobby"), Some(&record(4)));
        assert!(store.delete("  Lobby").await.unwrap());
        assert!(store.list_names().is_empty());
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.json");
        std::fs::write(&path, "{\"views\": 12}").unwrap();
        assert!(ViewStore::open(&path).list_names().is_empty());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_value(record(4)).unwrap();
        assert!(json.get("viewport_column").is_none());
        let parsed: ViewRecord =
            serde_json::from_str(r#"{"tile_count": 6, "virtual_mode": true, "viewport_column": 2}"#)
                .unwrap();
        assert_eq!(parsed.viewport_column, Some(2));
        assert_eq!(parsed.channel_assignment, empty_assignment());
    }
}
