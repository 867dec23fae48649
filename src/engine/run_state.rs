use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::error::CoreError;
use crate::engine::outcomes::OutcomeTable;
use crate::engine::publisher::{DEFAULT_SUBSCRIBER_CAPACITY, Snapshot, StatePublisher, Subscription};
use crate::engine::registry::CaseRegistry;
use crate::engine::resolver::DependencyResolver;
use crate::engine::types::*;

/// The run currently owned by the engine.
struct ActiveRun {
    registry: Arc<CaseRegistry>,
    document: RunState,
    snapshot: Snapshot,
}

impl ActiveRun {
    fn new(registry: Arc<CaseRegistry>, document: RunState) -> Self {
        let snapshot = Arc::new(document.clone());
        Self {
            registry,
            document,
            snapshot,
        }
    }

    /// Bump the revision and refresh the shared snapshot after a mutation.
    fn commit(&mut self) -> Snapshot {
        self.document.revision += 1;
        self.snapshot = Arc::new(self.document.clone());
        self.snapshot.clone()
    }
}

/// Sole owner and writer of the run document.
///
/// All mutations go through one lock, and the change notification for a
/// mutation is published before the lock is released, so subscribers observe
/// transitions in the order they were applied.
pub struct RunStateEngine {
    publisher: Arc<StatePublisher>,
    run: RwLock<Option<ActiveRun>>,
}

impl Default for RunStateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateEngine {
    pub fn new() -> Self {
        Self::with_publisher(Arc::new(StatePublisher::new(DEFAULT_SUBSCRIBER_CAPACITY)))
    }

    pub fn with_publisher(publisher: Arc<StatePublisher>) -> Self {
        Self {
            publisher,
            run: RwLock::new(None),
        }
    }

    pub fn publisher(&self) -> &Arc<StatePublisher> {
        &self.publisher
    }

    pub fn subscribe(&self) -> Subscription {
        self.publisher.subscribe()
    }

    /// Begin a new run from the collected cases. Every case starts NOT_RUN.
    pub async fn start_run(&self, plan: &str, registry: CaseRegistry) -> Result<Snapshot, CoreError> {
        let mut guard = self.run.write().await;
        if let Some(active) = guard.as_ref()
            && !active.document.is_finished()
        {
            return Err(CoreError::AlreadyRunning(active.document.id.clone()));
        }

        let modules = registry
            .modules()
            .into_iter()
            .map(|(name, cases)| ModuleEntry {
                name,
                cases: cases
                    .into_iter()
                    .map(|c| {
                        let mut record = CaseRecord::new(c.id.clone(), c.dependencies.clone());
                        record.defect = c.defect.clone();
                        record
                    })
                    .collect(),
            })
            .collect();

        let document = RunState {
            id: Uuid::new_v4().to_string(),
            plan: plan.to_string(),
            status: RunStatus::Running,
            revision: 0,
            started: Utc::now(),
            ended: None,
            abort_reason: None,
            modules,
        };

        info!(
            run_id = %document.id,
            plan = %plan,
            cases = registry.len(),
            "Starting run"
        );

        let active = ActiveRun::new(Arc::new(registry), document);
        let snapshot = active.snapshot.clone();
        *guard = Some(active);
        self.publisher.publish(snapshot.clone());

        Ok(snapshot)
    }

    /// Reinstall an unfinished run document, e.g. after a process restart.
    /// Outcomes already recorded stay as they are.
    pub async fn resume_run(&self, mut document: RunState) -> Result<Snapshot, CoreError> {
        let mut guard = self.run.write().await;
        if let Some(active) = guard.as_ref()
            && !active.document.is_finished()
        {
            return Err(CoreError::AlreadyRunning(active.document.id.clone()));
        }
        if document.is_finished() {
            return Err(CoreError::RunFinished(document.id));
        }

        let registry = Arc::new(CaseRegistry::from_run_state(&document));
        document.status = document.derive_status();

        info!(
            run_id = %document.id,
            revision = document.revision,
            pending = document.pending().len(),
            "Resuming run"
        );

        let mut active = ActiveRun::new(registry, document);
        let snapshot = active.commit();
        *guard = Some(active);
        self.publisher.publish(snapshot.clone());

        Ok(snapshot)
    }

    /// Record the outcome of a case. Outcomes are write-once.
    pub async fn apply_outcome(
        &self,
        id: &CaseId,
        outcome: Outcome,
        details: OutcomeDetails,
    ) -> Result<Snapshot, CoreError> {
        let mut guard = self.run.write().await;
        let active = guard.as_mut().ok_or(CoreError::NoActiveRun)?;
        let document = &mut active.document;

        if document.is_finished() {
            return Err(CoreError::RunFinished(document.id.clone()));
        }

        let record = document
            .case_mut(id)
            .ok_or_else(|| CoreError::UnknownCase(id.clone()))?;

        if record.outcome.is_terminal() || !outcome.is_terminal() {
            error!(
                case = %id,
                current = %record.outcome,
                requested = %outcome,
                "Rejected outcome transition"
            );
            return Err(CoreError::InvalidTransition {
                case: id.clone(),
                current: record.outcome,
                requested: outcome,
            });
        }

        let now = Utc::now();
        record.outcome = outcome;
        record.message = details.message;
        record.steps = details.steps;
        record.instrument = details.instrument;
        record.blocked_by = details.blocked_by;
        record.started = details.started.or(Some(now));
        record.finished = Some(now);

        let previous = document.status;
        document.status = document.derive_status();
        if previous == RunStatus::Failed {
            document.status = RunStatus::Failed;
        }

        match outcome {
            Outcome::Failed => warn!(case = %id, "Case failed"),
            Outcome::Blocked => warn!(
                case = %id,
                blocked_by = ?document.case(id).and_then(|c| c.blocked_by.as_ref()).map(CaseId::as_str),
                "Case blocked"
            ),
            _ => info!(case = %id, outcome = %outcome, "Case finished"),
        }

        let snapshot = active.commit();
        self.publisher.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Close the run. Every case must have a terminal outcome.
    pub async fn finish_run(&self) -> Result<Snapshot, CoreError> {
        let mut guard = self.run.write().await;
        let active = guard.as_mut().ok_or(CoreError::NoActiveRun)?;
        let document = &mut active.document;

        if document.is_finished() {
            return Err(CoreError::RunFinished(document.id.clone()));
        }

        let pending = document.pending();
        if !pending.is_empty() {
            return Err(CoreError::RunIncomplete {
                run_id: document.id.clone(),
                pending,
            });
        }

        document.ended = Some(Utc::now());
        document.status = document.derive_status();

        let counts = document.counts();
        info!(
            run_id = %document.id,
            status = %document.status,
            passed = counts.passed,
            failed = counts.failed,
            skipped = counts.skipped,
            blocked = counts.blocked,
            "Run finished"
        );

        let snapshot = active.commit();
        self.publisher.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Stop the run early. Cases still NOT_RUN become SKIPPED, the run is
    /// marked FAILED and closed.
    pub async fn abort_run(&self, reason: &str) -> Result<Snapshot, CoreError> {
        let mut guard = self.run.write().await;
        let active = guard.as_mut().ok_or(CoreError::NoActiveRun)?;
        let document = &mut active.document;

        if document.is_finished() {
            return Err(CoreError::RunFinished(document.id.clone()));
        }

        let now = Utc::now();
        let mut skipped = 0usize;
        for case in document
            .modules
            .iter_mut()
            .flat_map(|m| m.cases.iter_mut())
            .filter(|c| c.outcome == Outcome::NotRun)
        {
            case.outcome = Outcome::Skipped;
            case.message = Some(format!("aborted: {}", reason));
            case.finished = Some(now);
            skipped += 1;
        }

        document.abort_reason = Some(reason.to_string());
        document.ended = Some(now);
        document.status = RunStatus::Failed;

        error!(run_id = %document.id, reason = %reason, skipped, "Run aborted");

        let snapshot = active.commit();
        self.publisher.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Decide whether a case may run, against the latest committed snapshot.
    pub async fn resolve(&self, id: &CaseId) -> Result<Verdict, CoreError> {
        let (registry, table) = {
            let guard = self.run.read().await;
            let active = guard.as_ref().ok_or(CoreError::NoActiveRun)?;
            (
                active.registry.clone(),
                OutcomeTable::new(active.snapshot.clone()),
            )
        };
        DependencyResolver::new(&registry, &table).resolve(id)
    }

    pub async fn outcome_table(&self) -> Result<OutcomeTable, CoreError> {
        let guard = self.run.read().await;
        let active = guard.as_ref().ok_or(CoreError::NoActiveRun)?;
        Ok(OutcomeTable::new(active.snapshot.clone()))
    }

    /// Latest committed document, if a run was ever started or resumed.
    pub async fn snapshot(&self) -> Option<Snapshot> {
        self.run.read().await.as_ref().map(|a| a.snapshot.clone())
    }

    /// Status of the engine's current document; `Created` before any run.
    pub async fn status(&self) -> RunStatus {
        self.run
            .read()
            .await
            .as_ref()
            .map(|a| a.document.status)
            .unwrap_or(RunStatus::Created)
    }

    /// True while a run is started and not yet finished or aborted.
    pub async fn is_active(&self) -> bool {
        self.run
            .read()
            .await
            .as_ref()
            .is_some_and(|a| !a.document.is_finished())
    }
}
