//! Structured results of a run.

use crate::backends::{EngineFault, QueryResult};
use crate::comparison::Mismatch;
use crate::fixture::{FixtureName, Row};
use serde::Serialize;
use std::time::Duration;

/// What the engine did with a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { columns: Vec<String>, rows: Vec<Row> },
    Failure { message: String },
}

impl Outcome {
    pub fn empty() -> Self {
        Outcome::Success {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }
}

impl From<QueryResult> for Outcome {
    fn from(result: QueryResult) -> Self {
        match result.error {
            Some(message) => Outcome::Failure { message },
            None => Outcome::Success {
                columns: result.columns,
                rows: result.rows,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Outcome satisfied the expectation
    Matched,
    /// No expectation; the outcome was only recorded
    Unchecked,
    Mismatch(Mismatch),
    /// Not executed
    Skipped { reason: String },
}

impl Verdict {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Verdict::Mismatch(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementReport {
    pub fixture: FixtureName,
    /// 0-based position in the fixture
    pub index: usize,
    pub line: Option<usize>,
    pub text: String,
    /// `None` when the statement was not executed
    pub outcome: Option<Outcome>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixtureReport {
    pub name: FixtureName,
    /// Ran only because a requested fixture depends on it
    pub dependency: bool,
    pub skipped: Option<String>,
    pub statements: Vec<StatementReport>,
}

impl FixtureReport {
    pub fn new(name: FixtureName, dependency: bool) -> Self {
        Self {
            name,
            dependency,
            skipped: None,
            statements: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.statements.iter().any(|s| s.verdict.is_mismatch())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub requested: Vec<FixtureName>,
    pub fixtures: Vec<FixtureReport>,
    /// Engine fault that stopped the run early
    #[serde(serialize_with = "serialize_fault")]
    pub fault: Option<EngineFault>,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn new(requested: Vec<FixtureName>) -> Self {
        Self {
            requested,
            fixtures: Vec::new(),
            fault: None,
            duration: Duration::ZERO,
        }
    }

    pub fn statements(&self) -> impl Iterator<Item = &StatementReport> {
        self.fixtures.iter().flat_map(|f| f.statements.iter())
    }

    pub fn fixture(&self, name: &str) -> Option<&FixtureReport> {
        self.fixtures.iter().find(|f| f.name.as_str() == name)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for statement in self.statements() {
            summary.add(&statement.verdict);
        }
        summary.faulted = self.fault.is_some();
        summary.duration = self.duration;
        summary
    }

    pub fn is_success(&self) -> bool {
        self.fault.is_none() && self.fixtures.iter().all(FixtureReport::is_success)
    }

    /// Same fixtures, statements, outcomes and fault, ignoring timing
    pub fn same_results(&self, other: &ExecutionReport) -> bool {
        self.requested == other.requested
            && self.fixtures == other.fixtures
            && self.fault == other.fault
    }
}

/// Counts over statement verdicts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub matched: usize,
    pub unchecked: usize,
    pub mismatched: usize,
    pub skipped: usize,
    pub faulted: bool,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

impl RunSummary {
    pub fn add(&mut self, verdict: &Verdict) {
        self.total += 1;
        match verdict {
            Verdict::Matched => self.matched += 1,
            Verdict::Unchecked => self.unchecked += 1,
            Verdict::Mismatch(_) => self.mismatched += 1,
            Verdict::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.matched += other.matched;
        self.unchecked += other.unchecked;
        self.mismatched += other.mismatched;
        self.skipped += other.skipped;
        self.faulted |= other.faulted;
        self.duration = self.duration.max(other.duration);
    }

    pub fn is_success(&self) -> bool {
        self.mismatched == 0 && !self.faulted
    }
}

fn serialize_fault<S: serde::Serializer>(
    fault: &Option<EngineFault>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match fault {
        Some(fault) => serializer.serialize_some(&fault.to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_duration<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::MismatchKind;

    fn statement(verdict: Verdict) -> StatementReport {
        StatementReport {
            fixture: "f".into(),
            index: 0,
            line: None,
            text: "SELECT 1;".to_string(),
            outcome: None,
            verdict,
        }
    }

    #[test]
    fn test_summary_counts_verdicts() {
        let mut report = ExecutionReport::new(vec!["f".into()]);
        let mut fixture = FixtureReport::new("f".into(), false);
        fixture.statements = vec![
            statement(Verdict::Matched),
            statement(Verdict::Unchecked),
            statement(Verdict::Skipped {
                reason: "flaky".to_string(),
            }),
            statement(Verdict::Mismatch(Mismatch {
                kind: MismatchKind::UnexpectedSuccess,
                expected: "duplicate key".to_string(),
                actual: "0 rows".to_string(),
                diff: None,
            })),
        ];
        report.fixtures.push(fixture);

        let summary = report.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.unchecked, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.mismatched, 1);
        assert!(!summary.is_success());
        assert!(!report.is_success());
    }

    #[test]
    fn test_query_result_into_outcome() {
        let outcome = Outcome::from(QueryResult::error("boom"));
        assert_eq!(
            outcome,
            Outcome::Failure {
                message: "boom".to_string()
            }
        );
        assert_eq!(Outcome::from(QueryResult::empty()), Outcome::empty());
    }
}
