//! Response normalisation: raw model text → extracted records.
//!
//! Even with a JSON response MIME type, models occasionally wrap output in a
//! ```` ```json ```` fence or return a single object instead of an array.
//! Both quirks are repaired here with cheap deterministic rules; nothing else
//! about the content is changed. Field names are not reconciled against the
//! requested schema.
//!
//! ## Rule Order
//!
//! 1. strip a leading BOM and surrounding whitespace
//! 2. empty → [`FieldScanError::NoResponse`]
//! 3. strip an outer markdown code fence
//! 4. parse JSON → [`FieldScanError::MalformedResponse`] on failure
//! 5. wrap a non-array value in a one-element array

use crate::error::FieldScanError;
use crate::output::ExtractedRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Longest excerpt of a bad response quoted in an error message.
const EXCERPT_CHARS: usize = 120;

/// Normalise the raw response text of one extraction call.
pub fn normalize_response(raw: &str) -> Result<Vec<ExtractedRecord>, FieldScanError> {
    let text = raw.trim_start_matches('\u{FEFF}').trim();
    if text.is_empty() {
        return Err(FieldScanError::NoResponse);
    }

    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| FieldScanError::MalformedResponse {
        detail: format!("{e} in {:?}", excerpt(body)),
    })?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            debug!("Model returned a bare {}; wrapping in an array", kind_of(&other));
            vec![other]
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let kind = kind_of(&item);
            ExtractedRecord::from_json_object(item).ok_or_else(|| {
                FieldScanError::MalformedResponse {
                    detail: format!("entry {i} is a JSON {kind}, expected an object"),
                }
            })
        })
        .collect()
}

// ── Rule 3: Strip outer markdown fence ───────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n?(.*?)\r?\n?```$").unwrap());

fn strip_code_fence(input: &str) -> &str {
    match RE_OUTER_FENCE.captures(input) {
        Some(caps) => caps.get(1).map_or(input, |m| m.as_str().trim()),
        None => input,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}\u{2026}")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::FieldValue;

    fn number(v: i64) -> FieldValue {
        FieldValue::Number(v.into())
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let records = normalize_response("```json\n[{\"a\":1}]\n```").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("a"), Some(&number(1)));
    }

    #[test]
    fn fence_without_language_tag() {
        let records = normalize_response("```\n[{\"a\":1}]\n```").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn fence_on_one_line() {
        let records = normalize_response("```json [{\"a\":1}]```").unwrap();
        assert_eq!(records[0].get("a"), Some(&number(1)));
    }

    #[test]
    fn bare_object_is_wrapped() {
        let records = normalize_response("{\"a\":1}").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("a"), Some(&number(1)));
    }

    #[test]
    fn empty_text_is_no_response() {
        assert!(matches!(normalize_response(""), Err(FieldScanError::NoResponse)));
        assert!(matches!(
            normalize_response("  \n\t "),
            Err(FieldScanError::NoResponse)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = normalize_response("not json").unwrap_err();
        match err {
            FieldScanError::MalformedResponse { detail } => assert!(detail.contains("not json")),
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn empty_array_is_zero_records() {
        assert!(normalize_response("[]").unwrap().is_empty());
    }

    #[test]
    fn nulls_are_absent() {
        let records = normalize_response(r#"[{"name":"A","amount":null}]"#).unwrap();
        assert!(records[0].get("amount").unwrap().is_absent());
    }

    #[test]
    fn extra_and_missing_keys_are_kept_verbatim() {
        let records = normalize_response(r#"[{"name":"A","surprise":"x"},{}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("surprise"), Some(&FieldValue::Text("x".into())));
        assert!(records[1].is_empty());
    }

    #[test]
    fn scalar_array_entries_are_malformed() {
        let err = normalize_response(r#"[{"a":1}, "oops"]"#).unwrap_err();
        assert!(matches!(err, FieldScanError::MalformedResponse { .. }));
    }

    #[test]
    fn bom_and_whitespace_tolerated() {
        let records = normalize_response("\u{FEFF}\n  [{\"a\":\"b\"}]  \n").unwrap();
        assert_eq!(records[0].get("a"), Some(&FieldValue::Text("b".into())));
    }

    #[test]
    fn long_garbage_is_excerpted() {
        let long = "x".repeat(500);
        match normalize_response(&long).unwrap_err() {
            FieldScanError::MalformedResponse { detail } => assert!(detail.len() < 300),
            other => panic!("unexpected {other:?}"),
        }
    }
}
