use super::OutputFormat;
use crate::report::{ExecutionReport, RunSummary};
use serde::Serialize;
use std::io::Write;

/// JSON output for machine consumption. Reports are buffered and written
/// as one document together with the summary.
pub struct JsonOutput {
    out: Box<dyn Write>,
    runs: Vec<serde_json::Value>,
}

impl JsonOutput {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            out,
            runs: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    runs: &'a [serde_json::Value],
    summary: &'a RunSummary,
}

impl OutputFormat for JsonOutput {
    fn write_report(&mut self, report: &ExecutionReport) {
        match serde_json::to_value(report) {
            Ok(value) => self.runs.push(value),
            Err(e) => tracing::warn!(error = %e, "failed to serialize report"),
        }
    }

    fn write_summary(&mut self, summary: &RunSummary) {
        let document = JsonDocument {
            runs: &self.runs,
            summary,
        };
        match serde_json::to_string_pretty(&document) {
            Ok(json) => {
                let _ = writeln!(self.out, "{json}");
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize summary"),
        }
        self.runs.clear();
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{row, FixtureName};
    use crate::report::{FixtureReport, Outcome, StatementReport, Verdict};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_document_shape() {
        let buffer = Buffer::default();
        let mut output = JsonOutput::new(Box::new(buffer.clone()));

        let mut report = ExecutionReport::new(vec![FixtureName::new("f")]);
        let mut fixture = FixtureReport::new("f".into(), false);
        fixture.statements.push(StatementReport {
            fixture: "f".into(),
            index: 0,
            line: None,
            text: "SELECT NULL, 'x';".to_string(),
            outcome: Some(Outcome::Success {
                columns: vec!["a".to_string(), "b".to_string()],
                rows: vec![vec![crate::fixture::Value::Null, row(["x"]).remove(0)]],
            }),
            verdict: Verdict::Matched,
        });
        report.fixtures.push(fixture);

        output.write_report(&report);
        output.write_summary(&report.summary());

        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let statement = &json["runs"][0]["fixtures"][0]["statements"][0];
        assert_eq!(statement["verdict"]["verdict"], "matched");
        assert_eq!(statement["outcome"]["status"], "success");
        assert_eq!(statement["outcome"]["rows"][0][0], serde_json::Value::Null);
        assert_eq!(statement["outcome"]["rows"][0][1], "x");
        assert_eq!(json["summary"]["matched"], 1);
    }
}
