//! Key-addressable JSON stores for settings and replied-review markers.
//!
//! All mutations of one store go through a single async mutex and are written
//! with temp-file-plus-rename, so concurrent runs for different locations can
//! never interleave partial writes of the backing file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::automation::AutomationConfig;
use crate::error::StoreError;

/// A mutation applied to one location's settings under the store lock.
pub type SettingsMutation = Box<dyn FnOnce(Option<AutomationConfig>) -> AutomationConfig + Send>;

/// Durable mapping from location id to automation configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, location_id: &str) -> Result<Option<AutomationConfig>, StoreError>;

    async fn put(&self, location_id: &str, config: AutomationConfig) -> Result<(), StoreError>;

    /// Atomic read-modify-write of one location's settings.
    async fn update(
        &self,
        location_id: &str,
        mutation: SettingsMutation,
    ) -> Result<AutomationConfig, StoreError>;

    async fn list(&self) -> Result<Vec<(String, AutomationConfig)>, StoreError>;
}

/// Append-only per-location set of review ids that already received a reply.
#[async_trait]
pub trait RepliedReviewStore: Send + Sync {
    async fn replied_ids(&self, location_id: &str) -> Result<HashSet<String>, StoreError>;

    /// Record a reply. Returns false when the id was already present.
    async fn mark_replied(&self, location_id: &str, review_id: &str) -> Result<bool, StoreError>;
}

/// String-keyed map of JSON documents, optionally mirrored to a file.
pub struct JsonStore<T> {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, T>>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Open a file-backed store, loading existing entries if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened JSON store");

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn entries(&self) -> Vec<(String, T)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Apply `f` to the slot for `key` and persist the result.
    ///
    /// The in-memory map only changes once the file write succeeded.
    pub async fn modify<R, F>(&self, key: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Option<T>) -> R + Send,
        R: Send,
    {
        let mut entries = self.entries.lock().await;
        let mut slot = entries.get(key).cloned();
        let out = f(&mut slot);

        let mut next = entries.clone();
        match slot {
            Some(value) => {
                next.insert(key.to_string(), value);
            }
            None => {
                next.remove(key);
            }
        }

        self.persist(&next).await?;
        *entries = next;
        Ok(out)
    }

    async fn persist(&self, entries: &BTreeMap<String, T>) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_json_atomic(path, entries).await,
            None => Ok(()),
        }
    }
}

/// Serialize `value` to `path` through a sibling temp file and a rename.
pub(crate) async fn write_json_atomic<V: Serialize + ?Sized>(
    path: &Path,
    value: &V,
) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[async_trait]
impl SettingsStore for JsonStore<AutomationConfig> {
    async fn get(&self, location_id: &str) -> Result<Option<AutomationConfig>, StoreError> {
        Ok(JsonStore::get(self, location_id).await)
    }

    async fn put(&self, location_id: &str, config: AutomationConfig) -> Result<(), StoreError> {
        self.modify(location_id, move |slot| *slot = Some(config))
            .await
    }

    async fn update(
        &self,
        location_id: &str,
        mutation: SettingsMutation,
    ) -> Result<AutomationConfig, StoreError> {
        self.modify(location_id, move |slot| {
            let next = mutation(slot.take());
            *slot = Some(next.clone());
            next
        })
        .await
    }

    async fn list(&self) -> Result<Vec<(String, AutomationConfig)>, StoreError> {
        Ok(self.entries().await)
    }
}

#[async_trait]
impl RepliedReviewStore for JsonStore<Vec<String>> {
    async fn replied_ids(&self, location_id: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .get(location_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    async fn mark_replied(&self, location_id: &str, review_id: &str) -> Result<bool, StoreError> {
        let review_id = review_id.to_string();
        self.modify(location_id, move |slot| {
            let ids = slot.get_or_insert_with(Vec::new);
            if ids.contains(&review_id) {
                false
            } else {
                ids.push(review_id);
                true
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::automation::{AutoPostingConfig, AutomationConfig};

    fn posting_config(name: &str) -> AutomationConfig {
        AutomationConfig {
            auto_posting: Some(AutoPostingConfig {
                enabled: true,
                business_name: name.to_string(),
                ..AutoPostingConfig::default()
            }),
            ..AutomationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_settings_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store: JsonStore<AutomationConfig> = JsonStore::open(&path).await.unwrap();
        SettingsStore::put(&store, "loc-1", posting_config("Acme Cafe"))
            .await
            .unwrap();

        let reopened: JsonStore<AutomationConfig> = JsonStore::open(&path).await.unwrap();
        let loaded = SettingsStore::get(&reopened, "loc-1").await.unwrap().unwrap();
        assert_eq!(
            loaded.auto_posting.unwrap().business_name,
            "Acme Cafe".to_string()
        );
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<AutomationConfig> =
            JsonStore::open(dir.path().join("nested/settings.json"))
                .await
                .unwrap();
        assert!(SettingsStore::list(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<JsonStore<AutomationConfig>, _> = JsonStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_updates_for_different_locations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store: Arc<JsonStore<AutomationConfig>> =
            Arc::new(JsonStore::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let name = format!("Business {i}");
                SettingsStore::update(
                    store.as_ref(),
                    &format!("loc-{i}"),
                    Box::new(move |_| posting_config(&name)),
                )
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reopened: JsonStore<AutomationConfig> = JsonStore::open(&path).await.unwrap();
        assert_eq!(SettingsStore::list(&reopened).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_mark_replied_is_idempotent() {
        let store: JsonStore<Vec<String>> = JsonStore::in_memory();

        assert!(store.mark_replied("loc-1", "review-a").await.unwrap());
        assert!(!store.mark_replied("loc-1", "review-a").await.unwrap());
        assert!(store.mark_replied("loc-1", "review-b").await.unwrap());

        let ids = store.replied_ids("loc-1").await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(store.replied_ids("loc-2").await.unwrap().is_empty());
        assert_eq!(store.get("loc-1").await.unwrap(), vec!["review-a", "review-b"]);
    }
}
