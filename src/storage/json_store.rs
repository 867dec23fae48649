use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::*;
use crate::storage::StateStore;

/// File-based JSON state store. Each run is stored as a separate JSON file.
pub struct JsonStateStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonStateStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// File for `run_id`. Ids that could name a file outside `base_dir` are
    /// rejected.
    fn run_path(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty()
            || run_id.starts_with('.')
            || run_id.contains(['/', '\\', '\0'])
        {
            anyhow::bail!("Invalid run id: {:?}", run_id);
        }
        Ok(self.base_dir.join(format!("{}.json", run_id)))
    }

    async fn read_run(&self, run_id: &str) -> Result<RunState> {
        let path = self.run_path(run_id)?;
        let data = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read run file: {}", path.display()))?;
        let state: RunState =
            serde_json::from_str(&data).with_context(|| format!("Failed to parse run: {}", run_id))?;
        Ok(state)
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn persist(&self, snapshot: &RunState) -> Result<()> {
        let path = self.run_path(&snapshot.id)?;
        let _lock = self.lock.write().await;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("Failed to create store dir: {}", self.base_dir.display()))?;

        // Write then rename so readers never see a partial document.
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunState> {
        let _lock = self.lock.read().await;
        self.read_run(run_id).await
    }

    async fn list_runs(&self, status_filter: Option<RunStatus>) -> Result<Vec<RunState>> {
        let _lock = self.lock.read().await;

        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(data) = tokio::fs::read_to_string(&path).await
                && let Ok(state) = serde_json::from_str::<RunState>(&data)
            {
                if let Some(filter) = status_filter
                    && state.status != filter
                {
                    continue;
                }
                runs.push(state);
            }
        }

        // Sort by start time, newest first
        runs.sort_by(|a, b| b.started.cmp(&a.started));

        Ok(runs)
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id)?;
        let _lock = self.lock.write().await;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
