//! Structured-result extraction from raw engine output.
//!
//! The engine's stdout is not guaranteed to be pure JSON: banners, progress
//! lines, and diagnostics may surround the result document. The extractor
//! scans for the first balanced `{...}` fragment that both parses as JSON
//! and satisfies the tool's declared output shape, discarding everything
//! else as noise. It is a pure function: no I/O, deterministic for a given
//! input.

use serde_json::Value;
use thiserror::Error;

use crate::invoker::InvocationResult;
use crate::registry::OutputShape;

/// Maximum length of the raw excerpt carried in extraction errors.
///
/// Keeps error payloads small while leaving enough context to diagnose.
pub const MAX_EXCERPT_LEN: usize = 300;

/// Extraction failure with a bounded excerpt of the raw output.
#[derive(Debug, Error)]
#[error("{reason} (raw output: {excerpt:?})")]
pub struct ExtractionError {
    pub reason: ExtractionFailure,
    pub excerpt: String,
}

/// Why extraction failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// No balanced, parseable JSON object found anywhere in the output.
    #[error("no parseable JSON fragment in engine output")]
    NoFragment,

    /// Fragments parsed, but none carried the required result fields.
    #[error("no fragment matched the expected result shape")]
    ShapeMismatch,
}

/// Extract the tool result document from a completed invocation.
///
/// Scans stdout left to right. Every `{` starts a candidate; a candidate is
/// accepted when its balanced span parses as a JSON object and satisfies
/// `shape`. The first accepted candidate wins. Candidates that parse but
/// fail shape validation are skipped, and scanning resumes after them.
pub fn extract(raw: &InvocationResult, shape: &OutputShape) -> Result<Value, ExtractionError> {
    let text = &raw.stdout;
    let mut saw_fragment = false;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;

        match balanced_end(text, start) {
            Some(end) => {
                let candidate = &text[start..=end];
                match serde_json::from_str::<Value>(candidate) {
                    Ok(value) if value.is_object() => {
                        saw_fragment = true;
                        if shape.matches(&value) {
                            return Ok(value);
                        }
                        // Shape mismatch: skip the whole fragment.
                        search_from = end + 1;
                    }
                    _ => {
                        // Balanced but not valid JSON; retry from the next brace.
                        search_from = start + 1;
                    }
                }
            }
            None => {
                // Unbalanced opener (e.g. a stray brace in a log line).
                search_from = start + 1;
            }
        }

        if search_from >= text.len() {
            break;
        }
    }

    let reason = if saw_fragment {
        ExtractionFailure::ShapeMismatch
    } else {
        ExtractionFailure::NoFragment
    };

    Err(ExtractionError {
        reason,
        excerpt: excerpt_of(raw),
    })
}

/// Find the index of the `}` closing the brace at `start`, honoring JSON
/// string and escape rules. Returns `None` if the text ends first.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes[start], b'{');

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Bounded excerpt of an invocation's output for error detail.
///
/// Prefers stdout; falls back to stderr when stdout is empty. Truncation
/// respects UTF-8 boundaries.
pub fn excerpt_of(raw: &InvocationResult) -> String {
    let source = if raw.stdout.trim().is_empty() && !raw.stderr.trim().is_empty() {
        &raw.stderr
    } else {
        &raw.stdout
    };
    truncate_chars(source.trim(), MAX_EXCERPT_LEN)
}

/// Truncate to at most `max` characters without splitting a code point.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn result_with_stdout(stdout: &str) -> InvocationResult {
        InvocationResult {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_exceeded: false,
            elapsed: std::time::Duration::from_millis(1),
        }
    }

    const SHAPE: OutputShape = OutputShape::requiring(&["objFuncValue"]);
    const ANY: OutputShape = OutputShape::requiring(&[]);

    #[test]
    fn test_pure_json_output() {
        let raw = result_with_stdout(r#"{"objFuncValue": 0.42}"#);
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value, json!({"objFuncValue": 0.42}));
    }

    #[test]
    fn test_noise_before_fragment_is_discarded() {
        let raw = result_with_stdout(
            "ExprPredictor engine v2.1\nloading parameter set...\n{\"objFuncValue\": 0.42}\n",
        );
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value, json!({"objFuncValue": 0.42}));
    }

    #[test]
    fn test_first_matching_fragment_wins() {
        let raw = result_with_stdout(
            r#"{"objFuncValue": 1.0} trailing {"objFuncValue": 2.0}"#,
        );
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value["objFuncValue"], 1.0);
    }

    #[test]
    fn test_shape_mismatch_skips_to_later_fragment() {
        let raw = result_with_stdout(
            r#"{"progress": 100} done {"objFuncValue": 0.42}"#,
        );
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value, json!({"objFuncValue": 0.42}));
    }

    #[test]
    fn test_unbalanced_brace_in_noise_does_not_mask_fragment() {
        let raw = result_with_stdout("warn: config block { incomplete\n{\"objFuncValue\": 3.5}");
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value["objFuncValue"], 3.5);
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = result_with_stdout(r#"{"objFuncValue": 0.1, "note": "a } b { c"}"#);
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value["note"], "a } b { c");
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let raw = result_with_stdout(r#"{"objFuncValue": 0.1, "note": "say \"}\" loud"}"#);
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value["objFuncValue"], 0.1);
    }

    #[test]
    fn test_nested_objects_parse_as_one_fragment() {
        let raw = result_with_stdout(r#"{"objFuncValue": 0.2, "meta": {"iters": 12}}"#);
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value["meta"]["iters"], 12);
    }

    #[test]
    fn test_no_fragment_at_all() {
        let raw = result_with_stdout("plain text only, nothing structured");
        let err = extract(&raw, &SHAPE).unwrap_err();
        assert_eq!(err.reason, ExtractionFailure::NoFragment);
        assert!(!err.excerpt.is_empty());
    }

    #[test]
    fn test_fragment_present_but_wrong_shape() {
        let raw = result_with_stdout(r#"{"progress": 50}"#);
        let err = extract(&raw, &SHAPE).unwrap_err();
        assert_eq!(err.reason, ExtractionFailure::ShapeMismatch);
    }

    #[test]
    fn test_empty_output() {
        let raw = result_with_stdout("");
        let err = extract(&raw, &SHAPE).unwrap_err();
        assert_eq!(err.reason, ExtractionFailure::NoFragment);
    }

    #[test]
    fn test_top_level_array_is_not_a_fragment() {
        // Only object fragments are results; arrays in noise are skipped.
        let raw = result_with_stdout(r#"[1, 2, 3] {"objFuncValue": 9.0}"#);
        let value = extract(&raw, &SHAPE).unwrap();
        assert_eq!(value["objFuncValue"], 9.0);
    }

    #[test]
    fn test_any_shape_accepts_first_object() {
        let raw = result_with_stdout(r#"noise {"whatever": true}"#);
        let value = extract(&raw, &ANY).unwrap();
        assert_eq!(value, json!({"whatever": true}));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "x".repeat(2000);
        let raw = result_with_stdout(&long);
        let err = extract(&raw, &SHAPE).unwrap_err();
        assert!(err.excerpt.chars().count() <= MAX_EXCERPT_LEN + 3);
    }

    #[test]
    fn test_excerpt_falls_back_to_stderr() {
        let raw = InvocationResult {
            exit_code: Some(1),
            stdout: "   ".to_string(),
            stderr: "segfault in objective function".to_string(),
            duration_exceeded: false,
            elapsed: std::time::Duration::from_millis(1),
        };
        let err = extract(&raw, &SHAPE).unwrap_err();
        assert_eq!(err.excerpt, "segfault in objective function");
    }

    #[test]
    fn test_excerpt_truncation_respects_utf8() {
        let text = "é".repeat(400);
        assert!(truncate_chars(&text, MAX_EXCERPT_LEN).ends_with("..."));
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let raw = result_with_stdout("banner\n{\"objFuncValue\": 0.42}");
        let a = extract(&raw, &SHAPE).unwrap();
        let b = extract(&raw, &SHAPE).unwrap();
        assert_eq!(a, b);
    }
}
