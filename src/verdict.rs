// Verdict engine for Aperture
// Compares the control exchange (owner's own credentials) with the test exchange
// (another identity's credentials against the owner's object)

use crate::error::ExchangeError;
use crate::models::ResponseDetails;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    IdorFound,
    Secure,
    Potential,
    ControlFailed,
    Skipped,
}

impl Verdict {
    pub const ALL: [Verdict; 5] = [
        Verdict::IdorFound,
        Verdict::Secure,
        Verdict::Potential,
        Verdict::ControlFailed,
        Verdict::Skipped,
    ];
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::IdorFound => write!(f, "IDOR_FOUND"),
            Verdict::Secure => write!(f, "SECURE"),
            Verdict::Potential => write!(f, "POTENTIAL"),
            Verdict::ControlFailed => write!(f, "CONTROL_FAILED"),
            Verdict::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// A verdict plus the notes explaining it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    pub notes: Vec<String>,
}

impl Classification {
    fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            notes: Vec::new(),
        }
    }

    fn with_note(verdict: Verdict, note: String) -> Self {
        Self {
            verdict,
            notes: vec![note],
        }
    }

    /// The control request could not be built or sent.
    pub fn control_error(err: &ExchangeError) -> Self {
        Self::with_note(Verdict::ControlFailed, format!("control error: {}", err))
    }
}

/// Decide the verdict for one owner/attacker pair.
///
/// Rules, first match wins:
/// 1. control error => CONTROL_FAILED
/// 2. control status not 2xx => CONTROL_FAILED
/// 3. test error => POTENTIAL
/// 4. test 2xx and (owner data in test body, or test body equals control body) => IDOR_FOUND
/// 5. test 2xx otherwise => SECURE
/// 6. test 401/403 => SECURE
/// 7. anything else => POTENTIAL
pub fn decide_verdict(
    control: Result<&ResponseDetails, &ExchangeError>,
    test: Result<&ResponseDetails, &ExchangeError>,
    owner_fields: &BTreeMap<String, String>,
) -> Classification {
    let control = match control {
        Ok(resp) => resp,
        Err(err) => return Classification::control_error(err),
    };
    if !control.is_success() {
        return Classification::with_note(
            Verdict::ControlFailed,
            format!("control returned status {}", control.status),
        );
    }

    let test = match test {
        Ok(resp) => resp,
        Err(err) => {
            return Classification::with_note(Verdict::Potential, format!("test error: {}", err))
        }
    };

    match test.status {
        200..=299 => {
            if body_suggests_leaked_data(&test.body, owner_fields)
                || bodies_likely_equal(&control.body, &test.body)
            {
                Classification::new(Verdict::IdorFound)
            } else {
                Classification::with_note(
                    Verdict::Secure,
                    "test succeeded but response differed from control".to_string(),
                )
            }
        }
        401 | 403 => Classification::new(Verdict::Secure),
        status => {
            Classification::with_note(Verdict::Potential, format!("unexpected status: {}", status))
        }
    }
}

/// Whether the body contains, case-insensitively, any non-empty owner field value.
pub fn body_suggests_leaked_data(body: &str, owner_fields: &BTreeMap<String, String>) -> bool {
    let lower = body.to_lowercase();
    owner_fields
        .values()
        .filter(|v| !v.is_empty())
        .any(|v| lower.contains(&v.to_lowercase()))
}

/// Equal after trimming, or equal as parsed JSON documents with every
/// number compared as a double (`1` and `1.0` match).
pub fn bodies_likely_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a == b {
        return true;
    }
    match (
        serde_json::from_str::<Value>(a),
        serde_json::from_str::<Value>(b),
    ) {
        (Ok(aj), Ok(bj)) => numbers_as_f64(aj) == numbers_as_f64(bj),
        _ => false,
    }
}

fn numbers_as_f64(value: Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Number(n), Value::Number),
        Value::Array(items) => Value::Array(items.into_iter().map(numbers_as_f64).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, numbers_as_f64(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> ResponseDetails {
        ResponseDetails {
            status,
            body: body.to_string(),
            ..ResponseDetails::default()
        }
    }

    fn owner() -> BTreeMap<String, String> {
        [("note_id".to_string(), "1".to_string())].into_iter().collect()
    }

    #[test]
    fn control_error_wins_over_everything() {
        let err = ExchangeError::MissingQueryParam("q".to_string());
        let test = resp(200, "{}");
        let c = decide_verdict(Err(&err), Ok(&test), &owner());
        assert_eq!(c.verdict, Verdict::ControlFailed);
        assert_eq!(c.notes, vec!["control error: missing required query param q"]);
    }

    #[test]
    fn non_2xx_control_fails_before_test_error() {
        let control = resp(404, "not found");
        let err = ExchangeError::InvalidUrl("bad".to_string());
        let c = decide_verdict(Ok(&control), Err(&err), &owner());
        assert_eq!(c.verdict, Verdict::ControlFailed);
    }

    #[test]
    fn test_error_is_potential() {
        let control = resp(200, "{}");
        let err = ExchangeError::InvalidUrl("bad".to_string());
        let c = decide_verdict(Ok(&control), Err(&err), &owner());
        assert_eq!(c.verdict, Verdict::Potential);
        assert!(c.notes[0].starts_with("test error: "));
    }

    #[test]
    fn leaked_owner_value_is_idor() {
        let control = resp(200, r#"{"note_id":"1","title":"A"}"#);
        let test = resp(200, r#"{"id": 1, "title": "something else"}"#);
        let c = decide_verdict(Ok(&control), Ok(&test), &owner());
        assert_eq!(c.verdict, Verdict::IdorFound);
        assert!(c.notes.is_empty());
    }

    #[test]
    fn equal_json_bodies_are_idor_without_leak() {
        let control = resp(200, r#"{"a": 1, "b": [true, null]}"#);
        let test = resp(201, "{\"b\":[true,null],\n \"a\":1}");
        let c = decide_verdict(Ok(&control), Ok(&test), &BTreeMap::new());
        assert_eq!(c.verdict, Verdict::IdorFound);
    }

    #[test]
    fn differing_success_is_secure_with_note() {
        let control = resp(200, r#"{"title":"Alice"}"#);
        let test = resp(200, r#"{"title":"Bob"}"#);
        let c = decide_verdict(Ok(&control), Ok(&test), &owner());
        assert_eq!(c.verdict, Verdict::Secure);
        assert_eq!(c.notes, vec!["test succeeded but response differed from control"]);
    }

    #[test]
    fn denied_test_is_secure() {
        let control = resp(200, r#"{"note_id":"1"}"#);
        for status in [401, 403] {
            let c = decide_verdict(Ok(&control), Ok(&resp(status, "{}")), &owner());
            assert_eq!(c, Classification::new(Verdict::Secure));
        }
    }

    #[test]
    fn other_statuses_are_potential() {
        let control = resp(200, r#"{"note_id":"1"}"#);
        let c = decide_verdict(Ok(&control), Ok(&resp(404, "")), &owner());
        assert_eq!(c.verdict, Verdict::Potential);
        assert_eq!(c.notes, vec!["unexpected status: 404"]);
    }

    #[test]
    fn classification_is_deterministic() {
        let control = resp(200, r#"{"x":1}"#);
        let test = resp(200, r#"{"x":2}"#);
        let first = decide_verdict(Ok(&control), Ok(&test), &owner());
        for _ in 0..10 {
            assert_eq!(decide_verdict(Ok(&control), Ok(&test), &owner()), first);
        }
    }

    #[test]
    fn leak_check_is_case_insensitive_and_skips_empty_values() {
        let mut fields = BTreeMap::new();
        fields.insert("owner".to_string(), "Alice".to_string());
        fields.insert("blank".to_string(), String::new());
        assert!(body_suggests_leaked_data(r#"{"owner":"ALICE"}"#, &fields));
        assert!(!body_suggests_leaked_data(r#"{"owner":"bob"}"#, &fields));
    }

    #[test]
    fn body_equality_falls_back_to_text() {
        assert!(bodies_likely_equal("  plain  ", "plain"));
        assert!(!bodies_likely_equal("plain", "other"));
        assert!(!bodies_likely_equal("{\"a\":1}", "not json"));
    }

    #[test]
    fn integer_and_float_spellings_are_equal() {
        assert!(bodies_likely_equal(r#"{"v":1}"#, r#"{"v":1.0}"#));
        assert!(bodies_likely_equal("[10, {\"n\": 2e0}]", "[1e1,{\"n\":2}]"));
        assert!(!bodies_likely_equal(r#"{"v":1}"#, r#"{"v":1.5}"#));

        let control = resp(200, r#"{"id":"n1","rank":3}"#);
        let test = resp(200, r#"{"id":"n1","rank":3.0}"#);
        let c = decide_verdict(Ok(&control), Ok(&test), &BTreeMap::new());
        assert_eq!(c.verdict, Verdict::IdorFound);
    }

    #[test]
    fn verdict_serializes_like_display() {
        for v in Verdict::ALL {
            assert_eq!(serde_json::to_value(v).unwrap(), Value::String(v.to_string()));
        }
    }
}
