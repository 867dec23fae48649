use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::*;
use crate::storage::StateStore;

/// In-memory store. Holds run documents only for the lifetime of the instance.
#[derive(Default)]
pub struct MemoryStateStore {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunState>> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn persist(&self, snapshot: &RunState) -> Result<()> {
        self.runs().insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunState> {
        self.runs()
            .get(run_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))
    }

    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<RunState>> {
        let mut runs: Vec<RunState> = self
            .runs()
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started.cmp(&a.started));
        Ok(runs)
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.runs().remove(run_id);
        Ok(())
    }
}
