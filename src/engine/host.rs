use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::engine::error::{ConfigError, CoreError, ErrorKind};
use crate::engine::publisher::Snapshot;
use crate::engine::registry::CaseRegistry;
use crate::engine::run_state::RunStateEngine;
use crate::engine::types::*;

/// Entry points for the test-execution runtime that drives a run.
///
/// The host calls [`register_discovered_case`](Self::register_discovered_case)
/// during collection, [`begin`](Self::begin) once, then for every case in
/// declaration order [`before_case_execute`](Self::before_case_execute) and,
/// if the case was eligible, [`after_case_execute`](Self::after_case_execute).
pub struct HostSession {
    engine: Arc<RunStateEngine>,
    plan: String,
    registry: Option<CaseRegistry>,
    order: Vec<CaseId>,
    config_errors: Vec<ConfigError>,
}

impl HostSession {
    pub fn new(engine: Arc<RunStateEngine>, plan: impl Into<String>) -> Self {
        Self {
            engine,
            plan: plan.into(),
            registry: Some(CaseRegistry::new()),
            order: Vec::new(),
            config_errors: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Arc<RunStateEngine> {
        &self.engine
    }

    /// Register a case found during collection.
    ///
    /// Malformed ids and duplicates are rejected outright. A case that depends
    /// on itself or closes a cycle is still registered, quarantined, so it
    /// ends up BLOCKED with the offending reference as the reason. In every
    /// error case the error is returned to the host as well.
    pub fn register_discovered_case<I, S>(&mut self, id: &str, dependencies: I) -> Result<CaseId, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = self.registry.as_mut().ok_or(CoreError::RegistrySealed)?;

        let result = CaseId::new(id).and_then(|case_id| {
            let deps = dependencies
                .into_iter()
                .map(|d| CaseId::new(d.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((case_id, deps))
        });
        let (case_id, deps) = match result {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(case = %id, error = %e, "Rejected case declaration");
                self.config_errors.push(e.clone());
                return Err(e.into());
            }
        };

        match registry.register(case_id.clone(), deps.clone()) {
            Ok(()) => Ok(case_id),
            Err(e) => {
                let defect = match &e {
                    ConfigError::SelfDependency(_) => Some(Defect::SelfReference),
                    ConfigError::DependencyCycle(path) => Some(Defect::Cycle(path.clone())),
                    _ => None,
                };
                if let Some(defect) = defect {
                    registry.register_quarantined(case_id.clone(), deps, defect)?;
                    warn!(case = %case_id, error = %e, "Case quarantined");
                } else {
                    error!(case = %case_id, error = %e, "Rejected case declaration");
                }
                self.config_errors.push(e.clone());
                Err(e.into())
            }
        }
    }

    /// Configuration errors seen during collection.
    pub fn config_errors(&self) -> &[ConfigError] {
        &self.config_errors
    }

    /// Registered cases in execution order.
    pub fn execution_order(&self) -> &[CaseId] {
        match &self.registry {
            Some(registry) => registry.all_cases(),
            None => &self.order,
        }
    }

    /// Seal the registry and start the run.
    pub async fn begin(&mut self) -> Result<Snapshot, CoreError> {
        let registry = self.registry.take().ok_or(CoreError::RegistrySealed)?;
        let order = registry.all_cases().to_vec();
        match self.engine.start_run(&self.plan, registry.clone()).await {
            Ok(snapshot) => {
                self.order = order;
                Ok(snapshot)
            }
            Err(e) => {
                self.registry = Some(registry);
                Err(e)
            }
        }
    }

    /// Continue a persisted, unfinished run instead of starting a new one.
    /// The cases come from the document; anything registered during
    /// collection is discarded.
    pub async fn resume(&mut self, document: RunState) -> Result<Snapshot, CoreError> {
        let registry = self.registry.take().ok_or(CoreError::RegistrySealed)?;
        match self.engine.resume_run(document).await {
            Ok(snapshot) => {
                self.plan = snapshot.plan.clone();
                self.order = snapshot.cases().map(|c| c.id.clone()).collect();
                Ok(snapshot)
            }
            Err(e) => {
                self.registry = Some(registry);
                Err(e)
            }
        }
    }

    /// Ask whether a case may run. A blocked case is recorded as BLOCKED here,
    /// before the verdict is returned, so its dependents see it. A case that
    /// is already decided is left as it is.
    pub async fn before_case_execute(&self, id: &CaseId) -> Result<Verdict, CoreError> {
        let verdict = match self.engine.resolve(id).await {
            Ok(verdict) => verdict,
            Err(e) => return Err(self.fail_run(e).await),
        };

        match &verdict {
            Verdict::Blocked { dependency, cause } => {
                let details = OutcomeDetails {
                    message: Some(format!("blocked by '{}': {}", dependency, cause)),
                    blocked_by: Some(dependency.clone()),
                    ..OutcomeDetails::default()
                };
                if let Err(e) = self.engine.apply_outcome(id, Outcome::Blocked, details).await {
                    return Err(self.fail_run(e).await);
                }
            }
            Verdict::Decided { outcome } => {
                info!(case = %id, outcome = %outcome, "Case already decided");
            }
            Verdict::Eligible => info!(case = %id, "Case eligible"),
        }

        Ok(verdict)
    }

    /// Report the real outcome of an executed case.
    pub async fn after_case_execute(
        &self,
        id: &CaseId,
        outcome: Outcome,
        details: OutcomeDetails,
    ) -> Result<Snapshot, CoreError> {
        match self.engine.apply_outcome(id, outcome, details).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => Err(self.fail_run(e).await),
        }
    }

    /// A protocol error ends the run: it is aborted with the error as reason.
    async fn fail_run(&self, e: CoreError) -> CoreError {
        if e.kind() == ErrorKind::Protocol {
            match self.engine.abort_run(&e.to_string()).await {
                Ok(_) => error!(error = %e, "Run aborted after protocol error"),
                Err(not_aborted) => {
                    debug!(error = %e, reason = %not_aborted, "Protocol error with no run to abort")
                }
            }
        }
        e
    }

    pub async fn finish(&self) -> Result<Snapshot, CoreError> {
        self.engine.finish_run().await
    }

    pub async fn abort(&self, reason: &str) -> Result<Snapshot, CoreError> {
        self.engine.abort_run(reason).await
    }
}
