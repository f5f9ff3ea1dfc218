use crate::backends::EngineFault;
use crate::comparison::{compare, ErrorMatchPolicy};
use crate::fixture::{Fixture, FixtureName, Statement};
use crate::report::{ExecutionReport, FixtureReport, StatementReport, Verdict};
use crate::session::Session;
use std::sync::Arc;
use std::time::Instant;

/// Runs resolved fixtures, in order, over one session
pub struct FixtureExecutor {
    policy: ErrorMatchPolicy,
}

impl FixtureExecutor {
    pub fn new(policy: ErrorMatchPolicy) -> Self {
        Self { policy }
    }

    /// Execute every statement of every fixture in `order`.
    ///
    /// An engine fault stops the run; the report keeps everything recorded
    /// up to that point and carries the fault.
    pub async fn run(
        &self,
        session: &mut Session,
        requested: &[FixtureName],
        order: &[Arc<Fixture>],
    ) -> ExecutionReport {
        let start = Instant::now();
        let mut report = ExecutionReport::new(requested.to_vec());

        for fixture in order {
            let dependency = !requested.contains(&fixture.name);
            let mut fixture_report = FixtureReport::new(fixture.name.clone(), dependency);
            let result = self.run_fixture(session, fixture, &mut fixture_report).await;
            report.fixtures.push(fixture_report);
            if let Err(fault) = result {
                tracing::warn!(fixture = %fixture.name, error = %fault, "engine fault, aborting run");
                report.fault = Some(fault);
                break;
            }
        }

        report.duration = start.elapsed();
        report
    }

    async fn run_fixture(
        &self,
        session: &mut Session,
        fixture: &Fixture,
        report: &mut FixtureReport,
    ) -> Result<(), EngineFault> {
        if let Some(reason) = &fixture.skip {
            tracing::warn!(fixture = %fixture.name, %reason, "skipping fixture");
            report.skipped = Some(reason.clone());
            for (index, statement) in fixture.statements.iter().enumerate() {
                report
                    .statements
                    .push(skipped(&fixture.name, index, statement, reason));
            }
            return Ok(());
        }

        tracing::info!(fixture = %fixture.name, dependency = report.dependency, "running fixture");
        session.begin_fixture();

        for (index, statement) in fixture.statements.iter().enumerate() {
            if session.quit_requested() {
                report
                    .statements
                    .push(skipped(&fixture.name, index, statement, "\\quit"));
                continue;
            }
            if let Some(reason) = &statement.skip {
                report
                    .statements
                    .push(skipped(&fixture.name, index, statement, reason));
                continue;
            }

            let outcome = session.run_statement(statement).await?;
            let verdict = compare(&outcome, &statement.expectation, self.policy);
            if let Verdict::Mismatch(mismatch) = &verdict {
                tracing::debug!(
                    fixture = %fixture.name,
                    index,
                    kind = ?mismatch.kind,
                    "statement mismatch"
                );
            }
            report.statements.push(StatementReport {
                fixture: fixture.name.clone(),
                index,
                line: statement.line,
                text: statement.text.clone(),
                outcome: Some(outcome),
                verdict,
            });
        }

        let mismatched = report
            .statements
            .iter()
            .filter(|s| s.verdict.is_mismatch())
            .count();
        tracing::info!(
            fixture = %fixture.name,
            statements = report.statements.len(),
            mismatched,
            "finished fixture"
        );
        Ok(())
    }
}

fn skipped(fixture: &FixtureName, index: usize, statement: &Statement, reason: &str) -> StatementReport {
    StatementReport {
        fixture: fixture.clone(),
        index,
        line: statement.line,
        text: statement.text.clone(),
        outcome: None,
        verdict: Verdict::Skipped {
            reason: reason.to_string(),
        },
    }
}
