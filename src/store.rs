//! Saved dictionary entries and learner settings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const GOALS_KEY: &str = "goals";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleSentence {
    pub target: String,
    pub native: String,
}

/// One dictionary lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryEntry {
    pub id: String,
    pub term: String,
    pub target_term: String,
    pub definition: String,
    pub target_lang: String,
    pub native_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronunciation: Option<String>,
    /// Illustration as a `data:` URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub examples: Vec<ExampleSentence>,
    #[serde(default)]
    pub usage_note: String,
}

/// A dictionary entry the learner kept, with the save time in epoch millis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEntry {
    #[serde(flatten)]
    pub entry: DictionaryEntry,
    pub saved_at: i64,
}

impl SavedEntry {
    pub fn now(entry: DictionaryEntry) -> Self {
        Self {
            entry,
            saved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }
}

/// Key-value persistence for the notebook and settings
#[async_trait]
pub trait NotebookStore: Send + Sync {
    /// Every saved entry, newest first
    async fn all_entries(&self) -> Result<Vec<SavedEntry>>;

    /// Insert or replace by id
    async fn put_entry(&self, entry: SavedEntry) -> Result<()>;

    /// Returns whether an entry was removed
    async fn remove_entry(&self, id: &str) -> Result<bool>;

    async fn entry(&self, id: &str) -> Result<Option<SavedEntry>>;

    /// Learner goals; anything other than a list of strings reads as empty
    async fn goals(&self) -> Result<Vec<String>>;

    async fn save_goals(&self, goals: Vec<String>) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotebookFile {
    #[serde(default)]
    notebook: BTreeMap<String, SavedEntry>,
    #[serde(default)]
    settings: BTreeMap<String, serde_json::Value>,
}

/// Whole-document JSON store, rewritten atomically on every change
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<NotebookFile>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse notebook file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No notebook at {}, starting empty", path.display());
                NotebookFile::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read notebook file {}", path.display()))
            }
        };

        info!(
            "Notebook store opened at {} ({} entries)",
            path.display(),
            data.notebook.len()
        );

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &NotebookFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let bytes = serde_json::to_vec_pretty(data).context("Failed to serialize notebook")?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[async_trait]
impl NotebookStore for JsonFileStore {
    async fn all_entries(&self) -> Result<Vec<SavedEntry>> {
        let data = self.data.lock().await;
        let mut entries: Vec<SavedEntry> = data.notebook.values().cloned().collect();
        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(entries)
    }

    async fn put_entry(&self, entry: SavedEntry) -> Result<()> {
        let mut data = self.data.lock().await;
        debug!("Saving notebook entry {}", entry.id());
        data.notebook.insert(entry.id().to_string(), entry);
        self.persist(&data).await
    }

    async fn remove_entry(&self, id: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        if data.notebook.remove(id).is_none() {
            return Ok(false);
        }
        self.persist(&data).await?;
        Ok(true)
    }

    async fn entry(&self, id: &str) -> Result<Option<SavedEntry>> {
        Ok(self.data.lock().await.notebook.get(id).cloned())
    }

    async fn goals(&self) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        let goals = match data.settings.get(GOALS_KEY) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(goals)
    }

    async fn save_goals(&self, goals: Vec<String>) -> Result<()> {
        let mut data = self.data.lock().await;
        data.settings
            .insert(GOALS_KEY.to_string(), serde_json::Value::from(goals));
        self.persist(&data).await
    }
}
