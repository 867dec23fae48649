use std::collections::{HashMap, HashSet};

use crate::engine::error::ConfigError;
use crate::engine::types::{CaseId, Defect, RunState};

/// A case as declared at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCase {
    pub id: CaseId,
    pub dependencies: Vec<CaseId>,
    pub defect: Option<Defect>,
}

/// All discovered cases of a run, in declaration order.
///
/// Built once during collection; the run-state engine takes ownership when the
/// run starts, after which the registry is only read.
#[derive(Debug, Clone, Default)]
pub struct CaseRegistry {
    order: Vec<CaseId>,
    cases: HashMap<CaseId, RegisteredCase>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a case with its dependencies.
    ///
    /// Rejects duplicates, self-references and declarations that would close
    /// a dependency cycle. Dependencies on cases not registered yet are
    /// accepted; they are checked when the dependent is resolved.
    pub fn register(&mut self, id: CaseId, dependencies: Vec<CaseId>) -> Result<(), ConfigError> {
        if self.cases.contains_key(&id) {
            return Err(ConfigError::DuplicateCase(id));
        }
        if dependencies.contains(&id) {
            return Err(ConfigError::SelfDependency(id));
        }
        if let Some(cycle) = self.find_cycle(&id, &dependencies) {
            return Err(ConfigError::DependencyCycle(cycle));
        }

        self.insert(id, dependencies, None);
        Ok(())
    }

    /// Register a case whose declaration is known to be defective. It takes
    /// its place in the run so the defect is visible, but it is never eligible.
    pub fn register_quarantined(
        &mut self,
        id: CaseId,
        dependencies: Vec<CaseId>,
        defect: Defect,
    ) -> Result<(), ConfigError> {
        if self.cases.contains_key(&id) {
            return Err(ConfigError::DuplicateCase(id));
        }
        self.insert(id, dependencies, Some(defect));
        Ok(())
    }

    /// Rebuild a registry from a persisted run document, keeping its order
    /// and any recorded defects.
    pub fn from_run_state(state: &RunState) -> Self {
        let mut registry = Self::new();
        for case in state.cases() {
            if !registry.cases.contains_key(&case.id) {
                registry.insert(case.id.clone(), case.dependencies.clone(), case.defect.clone());
            }
        }
        registry
    }

    fn insert(&mut self, id: CaseId, dependencies: Vec<CaseId>, defect: Option<Defect>) {
        self.order.push(id.clone());
        self.cases.insert(
            id.clone(),
            RegisteredCase {
                id,
                dependencies,
                defect,
            },
        );
    }

    pub fn get(&self, id: &CaseId) -> Option<&RegisteredCase> {
        self.cases.get(id)
    }

    pub fn contains(&self, id: &CaseId) -> bool {
        self.cases.contains_key(id)
    }

    /// Case ids in declaration order. This is the default execution order.
    pub fn all_cases(&self) -> &[CaseId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredCase> {
        self.order.iter().filter_map(|id| self.cases.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Module names paired with their cases, modules in order of first
    /// appearance, cases in declaration order.
    pub fn modules(&self) -> Vec<(String, Vec<&RegisteredCase>)> {
        let mut modules: Vec<(String, Vec<&RegisteredCase>)> = Vec::new();
        for case in self.iter() {
            let module = case.id.module();
            match modules.iter_mut().find(|(name, _)| name == module) {
                Some((_, cases)) => cases.push(case),
                None => modules.push((module.to_string(), vec![case])),
            }
        }
        modules
    }

    /// Human-readable problems that will block cases at run time: unknown
    /// references, quarantined declarations, and dependencies declared after
    /// their dependents.
    pub fn validate(&self) -> Vec<String> {
        let position: HashMap<&CaseId, usize> =
            self.order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut errors = Vec::new();

        for case in self.iter() {
            match &case.defect {
                Some(Defect::SelfReference) => {
                    errors.push(format!("Case '{}' depends on itself", case.id));
                }
                Some(Defect::Cycle(path)) => {
                    let joined: Vec<&str> = path.iter().map(CaseId::as_str).collect();
                    errors.push(format!(
                        "Case '{}' is part of a dependency cycle: {}",
                        case.id,
                        joined.join(" -> ")
                    ));
                }
                None => {}
            }

            for dep in &case.dependencies {
                match position.get(dep) {
                    None => errors.push(format!(
                        "Case '{}' depends on '{}', which does not exist",
                        case.id, dep
                    )),
                    Some(&dep_pos) if dep_pos > position[&case.id] => errors.push(format!(
                        "Case '{}' depends on '{}', which is declared after it",
                        case.id, dep
                    )),
                    Some(_) => {}
                }
            }
        }

        errors
    }

    /// Would registering `id` with `dependencies` close a loop? Returns the
    /// loop starting and ending at `id`.
    fn find_cycle(&self, id: &CaseId, dependencies: &[CaseId]) -> Option<Vec<CaseId>> {
        let mut visited = HashSet::new();
        for dep in dependencies {
            if let Some(path) = self.path_to(dep, id, &mut visited) {
                let mut cycle = Vec::with_capacity(path.len() + 1);
                cycle.push(id.clone());
                cycle.extend(path);
                return Some(cycle);
            }
        }
        None
    }

    /// Depth-first search along declared dependencies from `from` to `target`.
    fn path_to<'a>(
        &'a self,
        from: &'a CaseId,
        target: &CaseId,
        visited: &mut HashSet<&'a CaseId>,
    ) -> Option<Vec<CaseId>> {
        if from == target {
            return Some(vec![from.clone()]);
        }
        if !visited.insert(from) {
            return None;
        }
        let case = self.cases.get(from)?;
        for dep in &case.dependencies {
            if let Some(mut path) = self.path_to(dep, target, visited) {
                path.insert(0, from.clone());
                return Some(path);
            }
        }
        None
    }
}
