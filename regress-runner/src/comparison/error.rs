use super::{format_rows, ErrorMatchPolicy, Mismatch, MismatchKind};
use crate::fixture::ErrorPattern;
use crate::report::Outcome;
use regex::Regex;

/// Check a failure against the expected error pattern
pub fn compare(outcome: &Outcome, pattern: &ErrorPattern, policy: ErrorMatchPolicy) -> Option<Mismatch> {
    let message = match outcome {
        Outcome::Failure { message } => message,
        Outcome::Success { rows, .. } => {
            return Some(Mismatch {
                kind: MismatchKind::UnexpectedSuccess,
                expected: pattern.text().to_string(),
                actual: if rows.is_empty() {
                    "statement succeeded".to_string()
                } else {
                    format_rows(rows)
                },
                diff: None,
            });
        }
    };

    let matched = match (pattern, policy) {
        (ErrorPattern::Exact(expected), ErrorMatchPolicy::Exact) => message == expected,
        (ErrorPattern::Exact(fragment), ErrorMatchPolicy::Lenient)
        | (ErrorPattern::Contains(fragment), _) => message.contains(fragment.as_str()),
        (ErrorPattern::Regex(pattern), _) => match Regex::new(pattern) {
            Ok(re) => re.is_match(message),
            Err(e) => {
                return Some(Mismatch {
                    kind: MismatchKind::WrongError,
                    expected: format!("invalid regex pattern: {e}"),
                    actual: message.clone(),
                    diff: None,
                })
            }
        },
    };

    if matched {
        None
    } else {
        Some(Mismatch {
            kind: MismatchKind::WrongError,
            expected: pattern.text().to_string(),
            actual: message.clone(),
            diff: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> Outcome {
        Outcome::Failure {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_exact_requires_equality() {
        let pattern = ErrorPattern::Exact("relation \"t\" does not exist".to_string());
        assert!(compare(&failure("relation \"t\" does not exist"), &pattern, ErrorMatchPolicy::Exact).is_none());

        let mismatch =
            compare(&failure("relation \"t\" does not exist at character 15"), &pattern, ErrorMatchPolicy::Exact)
                .unwrap();
        assert_eq!(mismatch.kind, MismatchKind::WrongError);
    }

    #[test]
    fn test_lenient_policy_accepts_substring() {
        let pattern = ErrorPattern::Exact("does not exist".to_string());
        assert!(compare(&failure("relation \"t\" does not exist"), &pattern, ErrorMatchPolicy::Lenient).is_none());
    }

    #[test]
    fn test_contains_and_regex() {
        let contains = ErrorPattern::Contains("division by zero".to_string());
        assert!(compare(&failure("ERROR: division by zero"), &contains, ErrorMatchPolicy::Exact).is_none());

        let regex = ErrorPattern::Regex(r"^value \d+ out of range$".to_string());
        assert!(compare(&failure("value 300 out of range"), &regex, ErrorMatchPolicy::Exact).is_none());
        assert!(compare(&failure("value x out of range"), &regex, ErrorMatchPolicy::Exact).is_some());
    }

    #[test]
    fn test_success_when_error_expected() {
        let pattern = ErrorPattern::Contains("duplicate key".to_string());
        let mismatch = compare(&Outcome::empty(), &pattern, ErrorMatchPolicy::Exact).unwrap();
        assert_eq!(mismatch.kind, MismatchKind::UnexpectedSuccess);
        assert_eq!(mismatch.expected, "duplicate key");
    }
}
