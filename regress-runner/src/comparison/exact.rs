use super::{format_rows, unified_diff, Mismatch, MismatchKind};
use crate::fixture::Row;

/// Compare rows in sequence. Returns the first kind of difference found:
/// row count, then arity, then values.
pub fn compare(actual: &[Row], expected: &[Row]) -> Option<Mismatch> {
    if actual == expected {
        return None;
    }

    let expected_str = format_rows(expected);
    let actual_str = format_rows(actual);
    let kind = if actual.len() != expected.len() {
        MismatchKind::RowCount
    } else if actual.iter().zip(expected).any(|(a, e)| a.len() != e.len()) {
        MismatchKind::ColumnCount
    } else {
        MismatchKind::Values
    };
    let diff = unified_diff(&expected_str, &actual_str);

    Some(Mismatch {
        kind,
        expected: expected_str,
        actual: actual_str,
        diff: Some(diff),
    })
}
