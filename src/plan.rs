//! YAML test plans: an ordered list of case declarations with dependencies
//! and, for dry runs, the outcome each case should report.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::engine::error::{ConfigError, CoreError};
use crate::engine::host::HostSession;
use crate::engine::publisher::Snapshot;
use crate::engine::run_state::RunStateEngine;
use crate::engine::types::*;

#[derive(Debug, Clone, Deserialize)]
pub struct TestPlan {
    pub name: String,
    #[serde(default)]
    pub cases: Vec<PlannedCase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedCase {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Scripted result used by dry runs. Defaults to passed.
    #[serde(default)]
    pub simulate: Option<SimulatedResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedResult {
    pub outcome: Outcome,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub instrument: Option<Instrument>,
}

impl SimulatedResult {
    fn details(&self) -> OutcomeDetails {
        OutcomeDetails {
            message: self.message.clone(),
            steps: self.steps.iter().map(StepRecord::note).collect(),
            instrument: self.instrument.clone(),
            ..OutcomeDetails::default()
        }
    }
}

impl TestPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Failed to parse plan file: {}", path.display()))
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yml::from_str(source)?)
    }

    /// Register every planned case with the session, in plan order. Returns
    /// the configuration errors encountered; registration continues past them.
    pub fn register_into(&self, session: &mut HostSession) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for case in &self.cases {
            if let Err(e) = session.register_discovered_case(&case.id, &case.depends_on) {
                match e {
                    CoreError::Config(config) => errors.push(config),
                    other => warn!(case = %case.id, error = %other, "Unexpected registration error"),
                }
            }
        }
        errors
    }

    fn simulated(&self, id: &CaseId) -> Option<&SimulatedResult> {
        self.cases
            .iter()
            .find(|c| c.id == id.as_str())
            .and_then(|c| c.simulate.as_ref())
    }

    /// Drive a complete run through `engine`, reporting the scripted outcome
    /// for every eligible case.
    pub async fn dry_run(&self, engine: Arc<RunStateEngine>) -> Result<Snapshot> {
        let mut session = HostSession::new(engine, self.name.clone());
        let errors = self.register_into(&mut session);
        for e in &errors {
            warn!(error = %e, "Plan configuration error");
        }

        session.begin().await?;
        info!(plan = %self.name, cases = session.execution_order().len(), "Dry run started");

        let order = session.execution_order().to_vec();
        for id in &order {
            let verdict = session.before_case_execute(id).await?;
            if !verdict.is_eligible() {
                continue;
            }

            let (outcome, details) = match self.simulated(id) {
                Some(sim) => (sim.outcome, sim.details()),
                None => (Outcome::Passed, OutcomeDetails::default()),
            };
            session.after_case_execute(id, outcome, details).await?;
        }

        Ok(session.finish().await?)
    }
}
