use crate::engine::error::CoreError;
use crate::engine::outcomes::OutcomeTable;
use crate::engine::registry::CaseRegistry;
use crate::engine::types::{BlockCause, CaseId, Defect, Outcome, Verdict};

/// Decides whether a case may run, just before it would execute.
///
/// A case that already has an outcome is reported as decided. Otherwise
/// dependencies are checked in declaration order and only the first
/// unsatisfied one is reported. Because cases resolve one at a time in
/// declaration order and every refused case is recorded as BLOCKED before its
/// dependents are looked at, blocking cascades without a separate graph pass.
pub struct DependencyResolver<'a> {
    registry: &'a CaseRegistry,
    outcomes: &'a OutcomeTable,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a CaseRegistry, outcomes: &'a OutcomeTable) -> Self {
        Self { registry, outcomes }
    }

    pub fn resolve(&self, id: &CaseId) -> Result<Verdict, CoreError> {
        let case = self
            .registry
            .get(id)
            .ok_or_else(|| CoreError::UnknownCase(id.clone()))?;

        if let Some(outcome) = self.outcomes.current_outcome(id)
            && outcome.is_terminal()
        {
            return Ok(Verdict::Decided { outcome });
        }

        match &case.defect {
            Some(Defect::SelfReference) => {
                return Ok(Verdict::Blocked {
                    dependency: id.clone(),
                    cause: BlockCause::SelfReference,
                });
            }
            Some(Defect::Cycle(path)) => {
                let dependency = path.get(1).cloned().unwrap_or_else(|| id.clone());
                return Ok(Verdict::Blocked {
                    dependency,
                    cause: BlockCause::Cycle { path: path.clone() },
                });
            }
            None => {}
        }

        for dep in &case.dependencies {
            match self.outcomes.current_outcome(dep) {
                Some(Outcome::Passed) => continue,
                // A dependency still NOT_RUN this late was never scheduled by
                // the host, which blocks just like a failure.
                Some(outcome) => {
                    return Ok(Verdict::Blocked {
                        dependency: dep.clone(),
                        cause: BlockCause::NotPassed { outcome },
                    });
                }
                None => {
                    return Ok(Verdict::Blocked {
                        dependency: dep.clone(),
                        cause: BlockCause::UnknownDependency,
                    });
                }
            }
        }

        Ok(Verdict::Eligible)
    }
}
