//! Persistence of finalized run records, keyed by run id

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::run::PipelineRun;

/// Storage for [`PipelineRun`] records
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Store a run, replacing any earlier record with the same id
    async fn save(&self, run: &PipelineRun) -> Result<()>;

    async fn load(&self, id: Uuid) -> Result<PipelineRun>;

    /// All stored runs, oldest first
    async fn list(&self) -> Result<Vec<PipelineRun>>;
}

/// Run store kept in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, PipelineRun>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<PipelineRun> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::RunNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

/// Run store writing one JSON file per run under a directory
#[derive(Debug, Clone)]
pub struct FileRunStore {
    root: PathBuf,
}

impl FileRunStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        let path = self.path_for(run.id);
        let tmp = self.root.join(format!(".{}.tmp", run.id));
        let json = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id = %run.id, path = %path.display(), "Saved run record");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<PipelineRun> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::RunNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self) -> Result<Vec<PipelineRun>> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| Uuid::parse_str(s).is_ok())
                && path.extension().is_some_and(|e| e == "json");
            if !is_record {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<PipelineRun>(&bytes) {
                Ok(run) => runs.push(run),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable run record"),
            }
        }
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ReportRequest, Ticker, Timeframe};
    use crate::stage::Stage;

    fn finished_run(ticker: &str) -> PipelineRun {
        let mut run = PipelineRun::new(ReportRequest::new(
            Ticker::new(ticker).unwrap(),
            Timeframe::OneYear,
        ));
        run.abort(Stage::Ingest).unwrap();
        run
    }

    #[tokio::test]
    async fn test_in_memory_save_and_load() {
        let store = InMemoryRunStore::new();
        let run = finished_run("AAPL");
        store.save(&run).await.unwrap();

        assert_eq!(store.load(run.id).await.unwrap(), run);
        assert!(matches!(
            store.load(Uuid::new_v4()).await,
            Err(PipelineError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path().join("runs")).await.unwrap();

        let first = finished_run("AAPL");
        let second = finished_run("MSFT");
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        // saving again replaces, it does not duplicate
        store.save(&first).await.unwrap();

        assert_eq!(store.load(second.id).await.unwrap(), second);

        std::fs::write(store.root().join("notes.txt"), "ignored").unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|r| r.id == first.id));
    }

    #[tokio::test]
    async fn test_file_store_missing_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.load(Uuid::new_v4()).await,
            Err(PipelineError::RunNotFound(_))
        ));
    }
}
