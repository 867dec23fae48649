use std::sync::Arc;

use crate::engine::types::{CaseId, Outcome, RunState};

/// Read-only view of the latest known outcome of every case.
///
/// Wraps the immutable snapshot the engine hands out after each write, so a
/// table never changes underneath its reader.
#[derive(Debug, Clone)]
pub struct OutcomeTable {
    snapshot: Arc<RunState>,
}

impl OutcomeTable {
    pub fn new(snapshot: Arc<RunState>) -> Self {
        Self { snapshot }
    }

    /// `None` when the case is not part of the run.
    pub fn current_outcome(&self, id: &CaseId) -> Option<Outcome> {
        self.snapshot.case(id).map(|c| c.outcome)
    }

    /// Revision of the run document this table was taken from.
    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    pub fn run_id(&self) -> &str {
        &self.snapshot.id
    }
}
