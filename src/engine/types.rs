use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::error::ConfigError;

/// Identity of a test case, conventionally `<module>::<case-name>`.
///
/// Construction validates the identifier: it must be non-empty, free of
/// whitespace and control characters, and contain no empty `::` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaseId(String);

impl CaseId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let reason = if raw.is_empty() {
            Some("identifier is empty")
        } else if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            Some("identifier contains whitespace or control characters")
        } else if raw.split("::").any(str::is_empty) {
            Some("identifier has an empty '::' segment")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ConfigError::MalformedCaseId { id: raw, reason }),
            None => Ok(Self(raw)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Module portion of the identifier; empty for ungrouped cases.
    pub fn module(&self) -> &str {
        self.0.rsplit_once("::").map(|(m, _)| m).unwrap_or("")
    }

    /// Case name without the module prefix.
    pub fn name(&self) -> &str {
        self.0.rsplit_once("::").map(|(_, n)| n).unwrap_or(&self.0)
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CaseId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CaseId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CaseId> for String {
    fn from(id: CaseId) -> Self {
        id.0
    }
}

impl AsRef<str> for CaseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of a single case. Every outcome except `NotRun` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NotRun,
    Passed,
    Failed,
    Skipped,
    /// Forced skip because a dependency was not satisfied.
    Blocked,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Outcome::NotRun)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NotRun => write!(f, "not_run"),
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Blocked => write!(f, "blocked"),
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_run" => Ok(Outcome::NotRun),
            "passed" => Ok(Outcome::Passed),
            "failed" => Ok(Outcome::Failed),
            "skipped" => Ok(Outcome::Skipped),
            "blocked" => Ok(Outcome::Blocked),
            _ => Err(format!(
                "Invalid outcome '{}'. Use: not_run, passed, failed, skipped, blocked",
                s
            )),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Running,
    Passed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Created => write!(f, "created"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Passed => write!(f, "passed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "running" => Ok(RunStatus::Running),
            "passed" => Ok(RunStatus::Passed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!(
                "Invalid status '{}'. Use: created, running, passed, failed",
                s
            )),
        }
    }
}

/// A single instrument reading value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Reading {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for Reading {
    fn from(v: &str) -> Self {
        Reading::Text(v.to_string())
    }
}

impl From<String> for Reading {
    fn from(v: String) -> Self {
        Reading::Text(v)
    }
}

impl From<i64> for Reading {
    fn from(v: i64) -> Self {
        Reading::Integer(v)
    }
}

impl From<f64> for Reading {
    fn from(v: f64) -> Self {
        Reading::Float(v)
    }
}

impl From<DateTime<Utc>> for Reading {
    fn from(v: DateTime<Utc>) -> Self {
        Reading::Timestamp(v)
    }
}

/// A reading together with the time it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedReading {
    pub value: Reading,
    pub at: DateTime<Utc>,
}

/// Metadata about the instrument a case exercised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub readings: BTreeMap<String, TimedReading>,
}

impl Instrument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Record a reading taken now. A later reading under the same key replaces
    /// the earlier one.
    pub fn with_reading(mut self, key: impl Into<String>, value: impl Into<Reading>) -> Self {
        self.readings.insert(
            key.into(),
            TimedReading {
                value: value.into(),
                at: Utc::now(),
            },
        );
        self
    }
}

/// One entry in a case's assertion/step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub at: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

impl StepRecord {
    pub fn note(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
            passed: None,
        }
    }

    pub fn assertion(message: impl Into<String>, passed: bool) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
            passed: Some(passed),
        }
    }
}

/// Extra data attached to a case when its outcome is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeDetails {
    pub message: Option<String>,
    pub steps: Vec<StepRecord>,
    pub instrument: Option<Instrument>,
    pub started: Option<DateTime<Utc>>,
    pub blocked_by: Option<CaseId>,
}

impl OutcomeDetails {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_step(mut self, step: StepRecord) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn with_started(mut self, started: DateTime<Utc>) -> Self {
        self.started = Some(started);
        self
    }
}

/// Declaration problem found while registering a case. The case is kept so it
/// shows up in the run document, but it can never become eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Defect {
    SelfReference,
    /// Closed loop of case ids, first and last element equal.
    Cycle(Vec<CaseId>),
}

/// State of one case within a run document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    #[serde(default)]
    pub dependencies: Vec<CaseId>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defect: Option<Defect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<CaseId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
}

impl CaseRecord {
    pub fn new(id: CaseId, dependencies: Vec<CaseId>) -> Self {
        Self {
            id,
            dependencies,
            outcome: Outcome::NotRun,
            defect: None,
            message: None,
            blocked_by: None,
            steps: Vec::new(),
            instrument: None,
            started: None,
            finished: None,
        }
    }
}

/// Cases grouped under one module, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    pub cases: Vec<CaseRecord>,
}

/// Per-outcome tally of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub not_run: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub blocked: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.not_run + self.passed + self.failed + self.skipped + self.blocked
    }
}

/// The authoritative document describing one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub plan: String,
    pub status: RunStatus,
    /// Incremented on every published mutation.
    pub revision: u64,
    pub started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub modules: Vec<ModuleEntry>,
}

impl RunState {
    pub fn cases(&self) -> impl Iterator<Item = &CaseRecord> {
        self.modules.iter().flat_map(|m| m.cases.iter())
    }

    pub fn case(&self, id: &CaseId) -> Option<&CaseRecord> {
        self.cases().find(|c| &c.id == id)
    }

    pub fn case_mut(&mut self, id: &CaseId) -> Option<&mut CaseRecord> {
        self.modules
            .iter_mut()
            .flat_map(|m| m.cases.iter_mut())
            .find(|c| &c.id == id)
    }

    /// Cases that have not reached a terminal outcome yet.
    pub fn pending(&self) -> Vec<CaseId> {
        self.cases()
            .filter(|c| c.outcome == Outcome::NotRun)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.ended.is_some()
    }

    /// FAILED if any case failed or the run was aborted, PASSED once every
    /// case is terminal, RUNNING otherwise.
    pub fn derive_status(&self) -> RunStatus {
        if self.abort_reason.is_some() || self.cases().any(|c| c.outcome == Outcome::Failed) {
            RunStatus::Failed
        } else if self.cases().all(|c| c.outcome.is_terminal()) {
            RunStatus::Passed
        } else {
            RunStatus::Running
        }
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for case in self.cases() {
            match case.outcome {
                Outcome::NotRun => counts.not_run += 1,
                Outcome::Passed => counts.passed += 1,
                Outcome::Failed => counts.failed += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::Blocked => counts.blocked += 1,
            }
        }
        counts
    }
}

/// Why a case was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockCause {
    /// The dependency is not a registered case.
    UnknownDependency,
    /// The dependency finished (or never ran) without passing.
    NotPassed { outcome: Outcome },
    SelfReference,
    Cycle { path: Vec<CaseId> },
}

impl fmt::Display for BlockCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockCause::UnknownDependency => write!(f, "unknown dependency"),
            BlockCause::NotPassed { outcome } => write!(f, "dependency {}", outcome),
            BlockCause::SelfReference => write!(f, "self-referencing dependency"),
            BlockCause::Cycle { path } => {
                let joined: Vec<&str> = path.iter().map(CaseId::as_str).collect();
                write!(f, "dependency cycle {}", joined.join(" -> "))
            }
        }
    }
}

/// Result of asking whether a case may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Eligible,
    Blocked { dependency: CaseId, cause: BlockCause },
    /// The case already has a terminal outcome, e.g. in a resumed run, and
    /// must not run again.
    Decided { outcome: Outcome },
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Verdict::Eligible)
    }

    pub fn blocking_dependency(&self) -> Option<&CaseId> {
        match self {
            Verdict::Eligible | Verdict::Decided { .. } => None,
            Verdict::Blocked { dependency, .. } => Some(dependency),
        }
    }
}
