use thiserror::Error;

use crate::engine::types::{CaseId, Outcome};

/// Problems in how cases or their dependencies were declared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("case '{0}' is already registered")]
    DuplicateCase(CaseId),

    #[error("case '{0}' declares a dependency on itself")]
    SelfDependency(CaseId),

    #[error("dependency cycle: {}", join_path(.0))]
    DependencyCycle(Vec<CaseId>),

    #[error("malformed case id '{id}': {reason}")]
    MalformedCaseId { id: String, reason: &'static str },
}

fn join_path(path: &[CaseId]) -> String {
    path.iter()
        .map(CaseId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Broad class of a [`CoreError`], used by hosts to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad declarations. The affected case cannot run; the rest of the run may.
    Configuration,
    /// The host integration called the engine out of order. Fatal to the run.
    Protocol,
    /// A second run was started while one is active.
    Concurrency,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown case '{0}'")]
    UnknownCase(CaseId),

    #[error("invalid transition for case '{case}': {current} -> {requested}")]
    InvalidTransition {
        case: CaseId,
        current: Outcome,
        requested: Outcome,
    },

    #[error("run {0} is finished")]
    RunFinished(String),

    #[error("run {run_id} still has {} case(s) not run", .pending.len())]
    RunIncomplete { run_id: String, pending: Vec<CaseId> },

    #[error("no run is active")]
    NoActiveRun,

    #[error("case registry is sealed once the run has started")]
    RegistrySealed,

    #[error("run {0} is already active")]
    AlreadyRunning(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::AlreadyRunning(_) => ErrorKind::Concurrency,
            CoreError::UnknownCase(_)
            | CoreError::InvalidTransition { .. }
            | CoreError::RunFinished(_)
            | CoreError::RunIncomplete { .. }
            | CoreError::NoActiveRun
            | CoreError::RegistrySealed => ErrorKind::Protocol,
        }
    }
}
