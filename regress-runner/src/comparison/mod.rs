pub mod error;
pub mod exact;
pub mod unordered;

use crate::fixture::{Expectation, RowOrder, Value};
use crate::report::{Outcome, Verdict};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// Why an outcome failed its expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// An error was expected but the engine succeeded
    UnexpectedSuccess,
    /// Rows were expected but the engine failed
    UnexpectedError,
    /// The engine failed with a different message
    WrongError,
    RowCount,
    ColumnCount,
    Values,
}

impl MismatchKind {
    pub fn describe(&self) -> &'static str {
        match self {
            MismatchKind::UnexpectedSuccess => "expected an error but the statement succeeded",
            MismatchKind::UnexpectedError => "expected rows but the statement failed",
            MismatchKind::WrongError => "error message does not match",
            MismatchKind::RowCount => "row count differs",
            MismatchKind::ColumnCount => "column count differs",
            MismatchKind::Values => "values differ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub expected: String,
    pub actual: String,
    /// Line diff between expected and actual rows, when rows were compared
    pub diff: Option<String>,
}

/// How `ErrorPattern::Exact` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMatchPolicy {
    /// String equality
    #[default]
    Exact,
    /// Exact patterns match as substrings
    Lenient,
}

/// Compare an engine outcome against what the fixture expects
pub fn compare(outcome: &Outcome, expectation: &Expectation, policy: ErrorMatchPolicy) -> Verdict {
    match (expectation, outcome) {
        (Expectation::None, _) => Verdict::Unchecked,
        (Expectation::Rows { rows, .. }, Outcome::Failure { message }) => {
            Verdict::Mismatch(Mismatch {
                kind: MismatchKind::UnexpectedError,
                expected: format_rows(rows),
                actual: message.clone(),
                diff: None,
            })
        }
        (Expectation::Rows { rows, order }, Outcome::Success { rows: actual, .. }) => {
            let result = match order {
                RowOrder::Ordered => exact::compare(actual, rows),
                RowOrder::Unordered => unordered::compare(actual, rows),
            };
            match result {
                None => Verdict::Matched,
                Some(mismatch) => Verdict::Mismatch(mismatch),
            }
        }
        (Expectation::Error(pattern), outcome) => match error::compare(outcome, pattern, policy) {
            None => Verdict::Matched,
            Some(mismatch) => Verdict::Mismatch(mismatch),
        },
    }
}

/// Render one cell in fixture notation: `\N` for NULL, `|` and `\` escaped
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Text(text) => {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '|' => out.push_str("\\|"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out
        }
    }
}

pub fn format_row(row: &[Value]) -> String {
    row.iter().map(format_value).collect::<Vec<_>>().join("|")
}

/// Format rows for display, one per line
pub fn format_rows(rows: &[Vec<Value>]) -> String {
    rows.iter()
        .map(|row| format_row(row))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unified line diff between two renderings
pub fn unified_diff(expected: &str, actual: &str) -> String {
    let diff = TextDiff::from_lines(expected, actual);

    let mut out = String::new();
    out.push_str("--- expected\n");
    out.push_str("+++ actual\n");
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}
