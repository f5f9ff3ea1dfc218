use super::{fixture_symbol, verdict_symbol, OutputFormat};
use crate::report::{ExecutionReport, FixtureReport, RunSummary, StatementReport, Verdict};
use colored::Colorize;
use std::io::Write;

/// Pretty human-readable output
pub struct PrettyOutput {
    out: Box<dyn Write>,
    /// Mismatched statements, printed in detail with the summary
    failures: Vec<StatementReport>,
    faults: Vec<String>,
}

impl PrettyOutput {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out,
            failures: Vec::new(),
            faults: Vec::new(),
        }
    }

    fn fixture_colored(fixture: &FixtureReport) -> colored::ColoredString {
        let symbol = fixture_symbol(fixture);
        match symbol {
            "PASS" => symbol.green(),
            "SKIP" => symbol.yellow(),
            _ => symbol.red(),
        }
    }

    fn write_fixture(&mut self, fixture: &FixtureReport) {
        let executed = fixture
            .statements
            .iter()
            .filter(|s| !matches!(s.verdict, Verdict::Skipped { .. }))
            .count();
        let mut line = format!(
            "  [{}] {:<40} {}",
            Self::fixture_colored(fixture),
            fixture.name.as_str(),
            format!("({executed}/{} statements)", fixture.statements.len()).dimmed()
        );
        if fixture.dependency {
            line.push_str(&format!(" {}", "dependency".dimmed()));
        }
        if let Some(reason) = &fixture.skipped {
            line.push_str(&format!(" {}", format!("({reason})").dimmed()));
        }
        let _ = writeln!(self.out, "{line}");

        self.failures.extend(
            fixture
                .statements
                .iter()
                .filter(|s| s.verdict.is_mismatch())
                .cloned(),
        );
    }

    fn write_failure(&mut self, statement: &StatementReport) {
        let Verdict::Mismatch(mismatch) = &statement.verdict else {
            return;
        };
        let location = match statement.line {
            Some(line) => format!("{} #{} (line {line})", statement.fixture, statement.index),
            None => format!("{} #{}", statement.fixture, statement.index),
        };
        let _ = writeln!(self.out, "{}", format!("── {location} [{}]", verdict_symbol(&statement.verdict)).red());
        for line in statement.text.lines() {
            let _ = writeln!(self.out, "   {}", line.dimmed());
        }
        let _ = writeln!(self.out, "   {}", mismatch.kind.describe().bold());
        match &mismatch.diff {
            Some(diff) => {
                for line in diff.lines() {
                    let line = if line.starts_with('-') {
                        line.red()
                    } else if line.starts_with('+') {
                        line.green()
                    } else {
                        line.normal()
                    };
                    let _ = writeln!(self.out, "   {line}");
                }
            }
            None => {
                let _ = writeln!(self.out, "   expected: {}", mismatch.expected);
                let _ = writeln!(self.out, "   actual:   {}", mismatch.actual);
            }
        }
        let _ = writeln!(self.out);
    }
}

impl OutputFormat for PrettyOutput {
    fn write_report(&mut self, report: &ExecutionReport) {
        for fixture in &report.fixtures {
            self.write_fixture(fixture);
        }
        if let Some(fault) = &report.fault {
            let _ = writeln!(self.out, "  [{}] {fault}", "ERROR".red().bold());
            self.faults.push(fault.to_string());
        }
    }

    fn write_summary(&mut self, summary: &RunSummary) {
        if !self.failures.is_empty() {
            let _ = writeln!(self.out);
            let _ = writeln!(self.out, "{}", "Mismatches:".red().bold());
            let _ = writeln!(self.out);
            for failure in std::mem::take(&mut self.failures) {
                self.write_failure(&failure);
            }
        }
        if !self.faults.is_empty() {
            let _ = writeln!(self.out, "{}", "Engine faults:".red().bold());
            for fault in std::mem::take(&mut self.faults) {
                let _ = writeln!(self.out, "   {}", fault.red());
            }
            let _ = writeln!(self.out);
        }

        let _ = writeln!(self.out, "{}", "Summary:".bold());

        let mut parts = Vec::new();
        if summary.matched > 0 {
            parts.push(format!("{} matched", summary.matched).green().to_string());
        }
        if summary.unchecked > 0 {
            parts.push(format!("{} unchecked", summary.unchecked));
        }
        if summary.mismatched > 0 {
            parts.push(format!("{} mismatched", summary.mismatched).red().to_string());
        }
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped).yellow().to_string());
        }
        let _ = writeln!(self.out, "  {}", parts.join(", "));
        let _ = writeln!(
            self.out,
            "  {}",
            format!("Total time: {:.2?}", summary.duration).dimmed()
        );

        let _ = writeln!(self.out);
        if summary.is_success() {
            let _ = writeln!(self.out, "{}", "All statements matched.".green().bold());
        } else {
            let _ = writeln!(self.out, "{}", "Some statements did not match.".red().bold());
        }
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}
