//! Response canonicalization and pattern keys.
//!
//! A pattern key identifies a class of responses. Successful JSON bodies are
//! keyed by their canonical serialization (object keys sorted recursively),
//! so two bodies that differ only in field order share a key. Failures are
//! keyed by their class: HTTP status, decode failure, or transport error
//! category.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::results::{ErrorCategory, Outcome};

/// Number of leading digest bytes kept in [`KeyMode::Digest`] keys.
pub const DIGEST_BYTES: usize = 4;

// ---------------------------------------------------------------------------
// KeyMode
// ---------------------------------------------------------------------------

/// How a successful body is turned into a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// The key embeds the full canonical serialization. Exact, unbounded length.
    Canonical,
    /// The key is the first 32 bits of SHA-256 over the canonical
    /// serialization, rendered as 8 hex characters.
    #[default]
    Digest,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyMode::Canonical => "canonical",
            KeyMode::Digest => "digest",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// PatternKey
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternKey(String);

impl PatternKey {
    pub fn for_body(body: &Value, mode: KeyMode) -> Self {
        let canonical = canonical_json(body);
        match mode {
            KeyMode::Canonical => Self(format!("body:{canonical}")),
            KeyMode::Digest => Self(format!("body:{}", short_digest(&canonical))),
        }
    }

    pub fn for_status(status: u16) -> Self {
        Self(format!("status:{status}"))
    }

    pub fn decode_failure() -> Self {
        Self("decode-failure".to_string())
    }

    pub fn for_error(category: ErrorCategory) -> Self {
        Self(format!("error:{category}"))
    }

    /// `true` for keys derived from a successfully decoded body.
    pub fn is_body(&self) -> bool {
        self.0.starts_with("body:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// Compact JSON with object keys sorted at every depth.
///
/// The map is rebuilt with keys inserted in sorted order, so the output is
/// sorted whether or not serde_json's `preserve_order` feature is enabled.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::with_capacity(map.len());
            for (key, child) in entries {
                out.insert(key.clone(), sorted(child));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn short_digest(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..DIGEST_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The result of mapping one request outcome onto a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub key: PatternKey,
    /// Payload stored as the pattern's sample on first occurrence.
    pub sample: Value,
    /// Failure message when the outcome itself is an error.
    pub failure: Option<String>,
}

/// Classify an outcome into its pattern key, sample payload, and failure.
///
/// - transport failure: `error:<category>`, sample `null`
/// - non-2xx status: `status:<code>`, sample is the raw body text
/// - 2xx with a non-JSON body: `decode-failure`, sample is the raw body text
/// - 2xx JSON: a body key, sample is the parsed body
pub fn classify(outcome: &Outcome, mode: KeyMode) -> Classification {
    match outcome {
        Outcome::Failed { category, message } => Classification {
            key: PatternKey::for_error(*category),
            sample: Value::Null,
            failure: Some(format!("{category} error: {message}")),
        },
        Outcome::Response { status, body } if !(200..300).contains(status) => Classification {
            key: PatternKey::for_status(*status),
            sample: Value::String(body.clone()),
            failure: Some(format!("HTTP {status}: {}", preview(body, 120))),
        },
        Outcome::Response { body, .. } => match serde_json::from_str::<Value>(body) {
            Ok(parsed) => Classification {
                key: PatternKey::for_body(&parsed, mode),
                sample: parsed,
                failure: None,
            },
            Err(e) => Classification {
                key: PatternKey::decode_failure(),
                sample: Value::String(body.clone()),
                failure: Some(format!("failed to decode JSON body: {e}")),
            },
        },
    }
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(body: &str) -> Outcome {
        Outcome::Response {
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": {"z": 1, "y": [ {"d": 1, "c": 2} ]}, "a": null});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":null,"b":{"y":[{"c":2,"d":1}],"z":1}}"#
        );
    }

    #[test]
    fn canonical_json_keeps_array_order() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }

    #[test]
    fn canonical_json_emits_non_ascii_verbatim() {
        let v = json!({"keyword": "병점 맛집"});
        assert_eq!(canonical_json(&v), r#"{"keyword":"병점 맛집"}"#);
    }

    #[test]
    fn reordered_payloads_share_a_key_in_both_modes() {
        let p1: Value = serde_json::from_str(r#"{"a":1,"b":{"x":true,"y":"s"}}"#).unwrap();
        let p2: Value = serde_json::from_str(r#"{"b":{"y":"s","x":true},"a":1}"#).unwrap();
        for mode in [KeyMode::Canonical, KeyMode::Digest] {
            assert_eq!(PatternKey::for_body(&p1, mode), PatternKey::for_body(&p2, mode));
        }
    }

    #[test]
    fn distinct_payloads_get_distinct_keys() {
        let payloads = [
            json!({"a": 1, "b": 2}),
            json!({"a": 1, "b": 3}),
            json!({"a": 1}),
            json!({"a": "1", "b": 2}),
            json!([1, 2]),
            json!(null),
        ];
        for mode in [KeyMode::Canonical, KeyMode::Digest] {
            let keys: std::collections::HashSet<_> =
                payloads.iter().map(|p| PatternKey::for_body(p, mode)).collect();
            assert_eq!(keys.len(), payloads.len());
        }
    }

    #[test]
    fn digest_key_is_eight_hex_chars() {
        let key = PatternKey::for_body(&json!({"posts": []}), KeyMode::Digest);
        let hex = key.as_str().strip_prefix("body:").unwrap();
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_key_embeds_serialization() {
        let key = PatternKey::for_body(&json!({"b": 2, "a": 1}), KeyMode::Canonical);
        assert_eq!(key.as_str(), r#"body:{"a":1,"b":2}"#);
    }

    #[test]
    fn classify_success_parses_body() {
        let c = classify(&ok(r#"{"keyword":"x","posts":[]}"#), KeyMode::Digest);
        assert!(c.key.is_body());
        assert!(c.failure.is_none());
        assert_eq!(c.sample, json!({"keyword": "x", "posts": []}));
    }

    #[test]
    fn classify_non_2xx_keys_by_status() {
        let c = classify(
            &Outcome::Response {
                status: 503,
                body: "unavailable".to_string(),
            },
            KeyMode::Digest,
        );
        assert_eq!(c.key, PatternKey::for_status(503));
        assert_eq!(c.sample, json!("unavailable"));
        assert!(c.failure.unwrap().starts_with("HTTP 503"));
    }

    #[test]
    fn classify_non_2xx_json_body_still_keys_by_status() {
        let c = classify(
            &Outcome::Response {
                status: 404,
                body: r#"{"error":"not found"}"#.to_string(),
            },
            KeyMode::Canonical,
        );
        assert_eq!(c.key.as_str(), "status:404");
        assert!(!c.key.is_body());
    }

    #[test]
    fn classify_invalid_json_is_decode_failure() {
        let c = classify(&ok("<html>oops</html>"), KeyMode::Digest);
        assert_eq!(c.key, PatternKey::decode_failure());
        assert!(c.failure.unwrap().contains("decode"));
    }

    #[test]
    fn classify_transport_error_keys_by_category() {
        let c = classify(
            &Outcome::Failed {
                category: ErrorCategory::Connect,
                message: "connection refused".to_string(),
            },
            KeyMode::Digest,
        );
        assert_eq!(c.key.as_str(), "error:connect");
        assert_eq!(c.sample, Value::Null);
        assert_eq!(c.failure.as_deref(), Some("connect error: connection refused"));
    }

    #[test]
    fn failure_keys_differ_by_class() {
        let keys = [
            PatternKey::for_status(500),
            PatternKey::for_status(502),
            PatternKey::decode_failure(),
            PatternKey::for_error(ErrorCategory::Timeout),
            PatternKey::for_error(ErrorCategory::Connect),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("맛집맛집", 2), "맛집…");
        assert_eq!(preview("short", 10), "short");
    }
}
