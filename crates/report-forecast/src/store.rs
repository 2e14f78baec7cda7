//! Forecast artifact store
//!
//! Artifacts are keyed by ticker, series fingerprint and configuration
//! digest, and never overwritten: a second `put` for the same key returns
//! the id of the artifact already stored. `latest` picks by generation
//! timestamp, not by insertion order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact::{ArtifactId, ForecastArtifact};
use crate::error::StoreError;

/// Storage for forecast artifacts, safe for concurrent use
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist an artifact, or return the id of the one already stored
    async fn put(&self, artifact: Arc<ForecastArtifact>) -> Result<ArtifactId, StoreError>;

    /// Load an artifact by id
    async fn get(&self, id: &ArtifactId) -> Result<Arc<ForecastArtifact>, StoreError>;

    /// Most recently generated artifact for a ticker
    async fn latest(&self, ticker: &str) -> Result<Option<Arc<ForecastArtifact>>, StoreError>;

    /// Number of stored artifacts
    async fn len(&self) -> Result<usize, StoreError>;
}

fn pick_latest(
    candidates: impl IntoIterator<Item = Arc<ForecastArtifact>>,
) -> Option<Arc<ForecastArtifact>> {
    // ties broken by id so the answer does not depend on iteration order
    candidates
        .into_iter()
        .max_by(|a, b| {
            a.generated_at()
                .cmp(&b.generated_at())
                .then_with(|| a.id().cmp(&b.id()))
        })
}

/// Process-local store
#[derive(Debug, Default, Clone)]
pub struct InMemoryArtifactStore {
    artifacts: Arc<RwLock<HashMap<ArtifactId, Arc<ForecastArtifact>>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, artifact: Arc<ForecastArtifact>) -> Result<ArtifactId, StoreError> {
        let id = artifact.id();
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&id) {
            debug!("Artifact {} already stored", id);
        } else {
            artifacts.insert(id.clone(), artifact);
        }
        Ok(id)
    }

    async fn get(&self, id: &ArtifactId) -> Result<Arc<ForecastArtifact>, StoreError> {
        let artifacts = self.artifacts.read().await;
        artifacts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn latest(&self, ticker: &str) -> Result<Option<Arc<ForecastArtifact>>, StoreError> {
        let artifacts = self.artifacts.read().await;
        Ok(pick_latest(
            artifacts
                .values()
                .filter(|a| a.ticker() == ticker)
                .cloned(),
        ))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.artifacts.read().await.len())
    }
}

/// One JSON file per artifact under `<root>/<ticker>/<fingerprint>-<config>.json`
///
/// Files are written to a temporary name and hard-linked into place, which
/// fails if the target exists, so two writers racing on the same key never
/// replace each other's file.
#[derive(Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileArtifactStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for_id(&self, id: &ArtifactId) -> Result<PathBuf, StoreError> {
        let (ticker, fingerprint, config) = id
            .parts()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(self
            .root
            .join(ticker)
            .join(format!("{fingerprint}-{config}.json")))
    }

    async fn load(&self, path: &Path, id: &str) -> Result<ForecastArtifact, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        let artifact: ForecastArtifact =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        artifact.validate().map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(artifact)
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn put(&self, artifact: Arc<ForecastArtifact>) -> Result<ArtifactId, StoreError> {
        let id = artifact.id();
        let path = self.path_for_id(&id)?;

        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            debug!("Artifact {} already on disk", id);
            return Ok(id);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let json = serde_json::to_vec_pretty(artifact.as_ref())?;
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        tokio::fs::remove_file(&tmp).await?;
        match linked {
            Ok(()) => {
                debug!("Stored artifact {} at {}", id, path.display());
                Ok(id)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(id),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &ArtifactId) -> Result<Arc<ForecastArtifact>, StoreError> {
        let path = self.path_for_id(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(Arc::new(self.load(&path, id.as_str()).await?))
    }

    async fn latest(&self, ticker: &str) -> Result<Option<Arc<ForecastArtifact>>, StoreError> {
        let dir = self.root.join(ticker);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(None);
        }

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = path.display().to_string();
            match self.load(&path, &name).await {
                Ok(artifact) if artifact.ticker() == ticker => found.push(Arc::new(artifact)),
                Ok(_) => {}
                Err(StoreError::Corrupt { id, reason }) => {
                    warn!("Skipping corrupt artifact {}: {}", id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(pick_latest(found))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        let mut tickers = tokio::fs::read_dir(&self.root).await?;
        while let Some(ticker) = tickers.next_entry().await? {
            if !ticker.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(ticker.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if file.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::test_support::{sample_artifact, sample_artifact_for};
    use crate::config::ForecastConfig;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = InMemoryArtifactStore::new();
        let first = Arc::new(sample_artifact("TST", 1, 0));
        // same key, later timestamp
        let second = Arc::new(sample_artifact("TST", 1, 5));

        let id1 = store.put(first.clone()).await.unwrap();
        let id2 = store.put(second).await.unwrap();

        assert_eq!(id1, id2);
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get(&id1).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_latest_uses_generation_time() {
        let store = InMemoryArtifactStore::new();
        let newer = Arc::new(sample_artifact("TST", 2, 10));
        let older = Arc::new(sample_artifact("TST", 3, 1));
        store.put(newer.clone()).await.unwrap();
        store.put(older).await.unwrap();
        store.put(Arc::new(sample_artifact("OTHER", 4, 20))).await.unwrap();

        let latest = store.latest("TST").await.unwrap().unwrap();
        assert_eq!(latest, newer);
        assert!(store.latest("NONE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryArtifactStore::new();
        let id = sample_artifact("TST", 1, 0).id();
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_puts_keep_first_artifact() {
        let store = InMemoryArtifactStore::new();
        let handles: Vec<_> = (0..8)
            .map(|day| {
                let store = store.clone();
                tokio::spawn(async move { store.put(Arc::new(sample_artifact("TST", 7, day))).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();

        let artifact = Arc::new(sample_artifact("TST", 1, 0));
        let id = store.put(artifact.clone()).await.unwrap();
        let again = store.put(Arc::new(sample_artifact("TST", 1, 9))).await.unwrap();

        assert_eq!(id, again);
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get(&id).await.unwrap(), artifact);
    }

    #[tokio::test]
    async fn test_file_store_latest_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();

        let newer = Arc::new(sample_artifact("TST", 2, 10));
        store.put(newer.clone()).await.unwrap();
        store.put(Arc::new(sample_artifact("TST", 3, 1))).await.unwrap();

        let digest = newer.config_digest();
        let bad = dir
            .path()
            .join("TST")
            .join(format!("{}-{digest}.json", "ff".repeat(32)));
        tokio::fs::write(&bad, b"{not json").await.unwrap();

        let latest = store.latest("TST").await.unwrap().unwrap();
        assert_eq!(latest, newer);

        let bad_id = ArtifactId::parse(&format!("TST-{}-{digest}", "ff".repeat(32))).unwrap();
        assert!(matches!(
            store.get(&bad_id).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_crossing_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();
        let artifact = sample_artifact("TST", 5, 0);
        let id = store.put(Arc::new(artifact.clone())).await.unwrap();

        let path = dir
            .path()
            .join("TST")
            .join(format!(
                "{}-{}.json",
                artifact.fingerprint(),
                artifact.config_digest()
            ));
        let mut json: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        json["curves"][0]["values"][0] = serde_json::json!(500.0);
        tokio::fs::write(&path, serde_json::to_vec(&json).unwrap())
            .await
            .unwrap();

        assert!(matches!(store.get(&id).await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_same_series_under_new_config_is_stored_separately() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();
        let longer = ForecastConfig::builder().horizon(10).build().unwrap();

        let first = Arc::new(sample_artifact("TST", 1, 0));
        let second = Arc::new(sample_artifact_for(&longer, "TST", 1, 1));
        let id1 = store.put(first.clone()).await.unwrap();
        let id2 = store.put(second.clone()).await.unwrap();

        assert_ne!(id1, id2);
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.get(&id1).await.unwrap(), first);
        assert_eq!(store.get(&id2).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_two_file_stores_racing_on_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(FileArtifactStore::open(dir.path()).await.unwrap());
        let b = Arc::new(FileArtifactStore::open(dir.path()).await.unwrap());

        let handles: Vec<_> = (0..8)
            .map(|day| {
                let store = if day % 2 == 0 { a.clone() } else { b.clone() };
                tokio::spawn(async move { store.put(Arc::new(sample_artifact("TST", 4, day))).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(a.len().await.unwrap(), 1);

        let leftovers = std::fs::read_dir(dir.path().join("TST"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    proptest! {
        #[test]
        fn prop_store_size_counts_distinct_fingerprints(keys in prop::collection::vec(0u8..6, 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryArtifactStore::new();
                for (day, key) in keys.iter().enumerate() {
                    store.put(Arc::new(sample_artifact("TST", *key, day as i64))).await.unwrap();
                }
                let mut distinct = keys.clone();
                distinct.sort_unstable();
                distinct.dedup();
                prop_assert_eq!(store.len().await.unwrap(), distinct.len());
                Ok(())
            })?;
        }
    }
}
