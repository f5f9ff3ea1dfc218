use super::{format_row, format_rows, Mismatch, MismatchKind};
use crate::fixture::Row;
use std::collections::HashMap;

/// Compare rows as multisets (order-independent, duplicates counted)
pub fn compare(actual: &[Row], expected: &[Row]) -> Option<Mismatch> {
    let mut counts: HashMap<&Row, isize> = HashMap::new();
    for row in expected {
        *counts.entry(row).or_default() += 1;
    }
    for row in actual {
        *counts.entry(row).or_default() -= 1;
    }
    if counts.values().all(|&n| n == 0) {
        return None;
    }

    let mut missing: Vec<String> = Vec::new();
    let mut extra: Vec<String> = Vec::new();
    for (row, n) in &counts {
        let rendered = format_row(row);
        for _ in 0..n.unsigned_abs() {
            if *n > 0 {
                missing.push(rendered.clone());
            } else {
                extra.push(rendered.clone());
            }
        }
    }
    missing.sort();
    extra.sort();

    let mut diff = String::new();
    if !missing.is_empty() {
        diff.push_str("Missing rows:\n");
        for row in &missing {
            diff.push_str(&format!("  - {row}\n"));
        }
    }
    if !extra.is_empty() {
        diff.push_str("Extra rows:\n");
        for row in &extra {
            diff.push_str(&format!("  + {row}\n"));
        }
    }

    let kind = if actual.len() != expected.len() {
        MismatchKind::RowCount
    } else if actual
        .iter()
        .any(|a| !expected.iter().any(|e| e.len() == a.len()))
    {
        MismatchKind::ColumnCount
    } else {
        MismatchKind::Values
    };

    Some(Mismatch {
        kind,
        expected: format_rows(expected),
        actual: format_rows(actual),
        diff: Some(diff),
    })
}
