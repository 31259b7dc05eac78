//! Payload sanitizer.
//!
//! Strips script-injection constructs from every string leaf of a parameter
//! value. The denylist is fixed: script elements, `javascript:` /
//! `vbscript:` / `data:text/html` URL schemes, and inline event-handler
//! attributes. Stripping runs to a fixed point so reassembled payloads
//! (`<scr<script>ipt>`) cannot survive a single pass, which also makes the
//! transform idempotent.

use regex::Regex;
use serde_json::Value;

/// A compiled sanitizer with its denylist patterns.
pub struct Sanitizer {
    patterns: Vec<Regex>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    /// Compile the denylist. All regexes are built once at construction.
    pub fn new() -> Self {
        let patterns = vec![
            // Full script elements, including their body.
            Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").unwrap(),
            // Stray opening or closing script tags left after the above.
            Regex::new(r"(?i)<\s*/?\s*script\b[^>]*>").unwrap(),
            // Dangerous URL schemes.
            Regex::new(r"(?i)javascript\s*:").unwrap(),
            Regex::new(r"(?i)vbscript\s*:").unwrap(),
            Regex::new(r"(?i)data\s*:\s*text/html").unwrap(),
            // Inline event handlers (onload=, onerror=, onclick=, ...).
            Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]*)"#).unwrap(),
        ];
        Self { patterns }
    }

    /// Strip denylisted constructs from a single string, to a fixed point.
    pub fn sanitize_str(&self, input: &str) -> String {
        let mut current = input.to_string();
        loop {
            let mut next = current.clone();
            for pattern in &self.patterns {
                next = pattern.replace_all(&next, "").into_owned();
            }
            if next == current {
                return current;
            }
            current = next;
        }
    }

    /// Recursively sanitize every string leaf of a JSON value.
    ///
    /// Returns the sanitized value and whether anything changed. Keys are
    /// left untouched; only values are rewritten.
    pub fn sanitize_value(&self, value: &Value) -> (Value, bool) {
        match value {
            Value::String(s) => {
                let cleaned = self.sanitize_str(s);
                let changed = cleaned != *s;
                (Value::String(cleaned), changed)
            }
            Value::Array(items) => {
                let mut changed = false;
                let cleaned = items
                    .iter()
                    .map(|item| {
                        let (v, c) = self.sanitize_value(item);
                        changed |= c;
                        v
                    })
                    .collect();
                (Value::Array(cleaned), changed)
            }
            Value::Object(map) => {
                let mut changed = false;
                let cleaned = map
                    .iter()
                    .map(|(k, v)| {
                        let (v, c) = self.sanitize_value(v);
                        changed |= c;
                        (k.clone(), v)
                    })
                    .collect();
                (Value::Object(cleaned), changed)
            }
            other => (other.clone(), false),
        }
    }
}
