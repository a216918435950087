use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::llm::VideoClips;

/// Key under which the latest pipeline result array is stored
pub const RESULTS_KEY: &str = "aiScenarioResults";

/// Key-value store for results handed to the surrounding app
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Insert or overwrite `key`
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Overwrite the stored pipeline results.
pub async fn save_results(store: &dyn ResultStore, results: &[VideoClips]) -> Result<()> {
    store.set(RESULTS_KEY, serde_json::to_value(results)?).await
}

/// Latest stored pipeline results; empty when nothing was stored yet.
pub async fn load_results(store: &dyn ResultStore) -> Result<Vec<VideoClips>> {
    match store.get(RESULTS_KEY).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

/// In-process store, used by tests and by the CLI when no directory is wanted
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// One pretty-printed JSON file per key, fronted by an in-memory cache
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    /// Base directory for value files
    dir: PathBuf,

    /// In-memory cache (thread-safe)
    cache: Arc<RwLock<HashMap<String, Value>>>,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating it and loading existing entries
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;

        let store = Self {
            dir,
            cache: Arc::new(RwLock::new(HashMap::new())),
        };
        store.load_existing().await?;

        let cached = store.cache.read().await.len();
        info!("📊 Result store at {} opened with {} entries", store.dir.display(), cached);
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load_existing(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut cache = self.cache.write().await;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(key) = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()) else {
                continue;
            };

            match Self::read_value(&path).await {
                Ok(value) => {
                    cache.insert(key, value);
                }
                Err(e) => warn!("Failed to load stored value {}: {}", path.display(), e),
            }
        }

        debug!("📁 Loaded {} stored values from disk", cache.len());
        Ok(())
    }

    async fn read_value(path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PipelineError::Storage(format!("Invalid store key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        let content = serde_json::to_string_pretty(&value)?;
        fs::write(&path, content).await?;
        self.cache.write().await.insert(key.to_string(), value);

        debug!("💾 Stored '{}' at {}", key, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ClipSuggestion;
    use serde_json::json;

    fn clips(title: &str) -> VideoClips {
        VideoClips {
            title: title.to_string(),
            video_id: format!("{}-id", title),
            score: 8.0,
            clips: vec![ClipSuggestion {
                start: "01:00".to_string(),
                end: "02:00".to_string(),
                title: "Intro".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_memory_store_overwrites() {
        let store = MemoryStore::new();
        save_results(&store, &[clips("first")]).await.unwrap();
        save_results(&store, &[clips("second"), clips("third")]).await.unwrap();

        let stored = load_results(&store).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].title, "second");
    }

    #[tokio::test]
    async fn test_empty_store_has_no_results() {
        assert!(load_results(&MemoryStore::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::new(dir.path().to_path_buf()).await.unwrap();
            save_results(&store, &[clips("kept")]).await.unwrap();
            store.set("settings", json!({"theme": "dark"})).await.unwrap();
        }

        let reopened = JsonFileStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(load_results(&reopened).await.unwrap()[0].video_id, "kept-id");
        assert_eq!(
            reopened.get("settings").await.unwrap(),
            Some(json!({"theme": "dark"}))
        );
        assert!(dir.path().join("aiScenarioResults.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().to_path_buf()).await.unwrap();
        let err = store.set("../escape", json!(1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
