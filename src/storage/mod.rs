pub mod json_store;
pub mod memory_store;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::engine::publisher::{StatePublisher, SubscriptionId};
use crate::engine::types::*;

/// Durable home for run documents.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write a snapshot, replacing any older copy of the same run.
    async fn persist(&self, snapshot: &RunState) -> Result<()>;

    /// Load a run document by id.
    async fn load(&self, run_id: &str) -> Result<RunState>;

    /// List runs, newest first, optionally filtered by status.
    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<RunState>>;

    /// Delete a run document.
    async fn delete_run(&self, run_id: &str) -> Result<()>;

    /// Most recent run that was never finished, if any.
    async fn latest_unfinished(&self) -> Result<Option<RunState>> {
        let runs = self.list_runs(None).await?;
        Ok(runs.into_iter().find(|r| !r.is_finished()))
    }
}

/// Background task writing every published snapshot to a store.
pub struct Persister {
    subscription: SubscriptionId,
    handle: JoinHandle<()>,
}

impl Persister {
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Stop receiving new snapshots and wait until queued ones are written.
    pub async fn shutdown(self, publisher: &StatePublisher) -> Result<()> {
        publisher.unsubscribe(self.subscription);
        self.handle.await?;
        Ok(())
    }
}

/// Subscribe `store` to `publisher`. Failed writes are logged and not retried;
/// the next snapshot supersedes them.
///
/// Snapshots dropped from a lagging queue are made up for from the
/// publisher's latest snapshot, so the newest revision of a run is always
/// written, including after shutdown is requested.
pub fn spawn_persister(store: Arc<dyn StateStore>, publisher: &StatePublisher) -> Persister {
    let mut subscription = publisher.subscribe();
    let latest = publisher.watch();
    let id = subscription.id();

    let handle = tokio::spawn(async move {
        let mut written = Written::default();

        while let Some(snapshot) = subscription.recv().await {
            written.persist(store.as_ref(), &snapshot).await;
            let newest = latest.borrow().clone();
            if let Some(newest) = newest {
                written.persist(store.as_ref(), &newest).await;
            }
        }

        let newest = latest.borrow().clone();
        if let Some(newest) = newest {
            written.persist(store.as_ref(), &newest).await;
        }
    });

    Persister {
        subscription: id,
        handle,
    }
}

/// Highest revision written per run, so older snapshots never overwrite a
/// newer document.
#[derive(Default)]
struct Written(HashMap<String, u64>);

impl Written {
    async fn persist(&mut self, store: &dyn StateStore, snapshot: &RunState) {
        if self
            .0
            .get(&snapshot.id)
            .is_some_and(|&revision| revision >= snapshot.revision)
        {
            return;
        }

        match store.persist(snapshot).await {
            Ok(()) => debug!(
                run_id = %snapshot.id,
                revision = snapshot.revision,
                "Persisted run state"
            ),
            Err(e) => error!(
                run_id = %snapshot.id,
                revision = snapshot.revision,
                error = %format!("{:#}", e),
                "Failed to persist run state"
            ),
        }
        // Failed writes are not retried.
        self.0.insert(snapshot.id.clone(), snapshot.revision);
    }
}
