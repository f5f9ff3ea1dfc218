pub mod json;
pub mod pretty;

use crate::report::{ExecutionReport, FixtureReport, RunSummary, Verdict};
use std::io::Write;

/// Output format trait
pub trait OutputFormat {
    /// Write one run's results
    fn write_report(&mut self, report: &ExecutionReport);

    /// Write the final summary over all runs
    fn write_summary(&mut self, summary: &RunSummary);

    /// Flush any buffered output
    fn flush(&mut self);
}

/// Available output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pretty,
    Json,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "json" => Ok(Format::Json),
            _ => Err(format!("unknown output format: {s}")),
        }
    }
}

/// Create an output formatter writing to stdout
pub fn create_output(format: Format) -> Box<dyn OutputFormat> {
    create_output_to(format, Box::new(std::io::stdout()))
}

pub fn create_output_to(format: Format, out: Box<dyn Write>) -> Box<dyn OutputFormat> {
    match format {
        Format::Pretty => Box::new(pretty::PrettyOutput::new(out)),
        Format::Json => Box::new(json::JsonOutput::new(out)),
    }
}

/// Short status label for a statement verdict
pub fn verdict_symbol(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Matched => "PASS",
        Verdict::Unchecked => "DONE",
        Verdict::Mismatch(_) => "FAIL",
        Verdict::Skipped { .. } => "SKIP",
    }
}

/// Short status label for a whole fixture
pub fn fixture_symbol(fixture: &FixtureReport) -> &'static str {
    if fixture.skipped.is_some() {
        "SKIP"
    } else if fixture.is_success() {
        "PASS"
    } else {
        "FAIL"
    }
}
