//! Parameter redaction for audit entries.
//!
//! Any key whose name contains a sensitive fragment (case-insensitive) has
//! its whole value replaced before the entry is stored, recursively. The
//! audit ring therefore never holds a credential even when a caller passes
//! one inside nested parameters.

use serde_json::Value;

/// Replacement written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a value as sensitive.
const SENSITIVE_KEY_FRAGMENTS: &[&str] =
    &["password", "token", "secret", "key", "auth", "credential"];

/// Whether a parameter key names a sensitive value.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lowered.contains(fragment))
}

/// Redact sensitive values from a parameter tree.
pub fn redact_params(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact_params(v))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_params).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_match_case_insensitively_by_fragment() {
        assert!(is_sensitive_key("password"));
        assert!(is_sensitive_key("API_KEY"));
        assert!(is_sensitive_key("authToken"));
        assert!(is_sensitive_key("client_credentials"));
        assert!(!is_sensitive_key("note"));
        assert!(!is_sensitive_key("content"));
    }

    #[test]
    fn nested_sensitive_values_are_replaced() {
        let params = json!({
            "note": "weekly report",
            "password": "hunter2",
            "config": {
                "api_key": "sk-123",
                "retries": 3,
                "tokens": ["a", "b"]
            }
        });
        let redacted = redact_params(&params);
        assert_eq!(redacted["note"], "weekly report");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["config"]["api_key"], REDACTED);
        assert_eq!(redacted["config"]["retries"], 3);
        assert_eq!(redacted["config"]["tokens"], REDACTED);
    }

    #[test]
    fn arrays_of_objects_are_walked() {
        let params = json!([{"secret": "x"}, {"plain": 1}]);
        let redacted = redact_params(&params);
        assert_eq!(redacted[0]["secret"], REDACTED);
        assert_eq!(redacted[1]["plain"], 1);
    }
}
