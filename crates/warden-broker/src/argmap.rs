//! Positional-argument mapping.
//!
//! Sandbox bindings hand the broker a positional argument vector; tool
//! servers want named parameters. A small table covers the tools the
//! gateway's sandboxes actually call; everything else falls through a
//! generic mapping. The mapping is advisory — the server remains the
//! authority on what it accepts.

use serde_json::{Map, Value};

/// Parameter names for tools with known signatures.
const KNOWN_TOOLS: &[(&str, &[&str])] = &[
    ("store_memory", &["content", "importance", "tags"]),
    ("recall_memory", &["query", "limit"]),
    ("update_memory", &["id", "content"]),
    ("search_conversations", &["query", "limit"]),
    ("search_inboxes", &["query", "limit"]),
];

/// Convert a positional argument vector into named parameters.
///
/// Known tools map positionally onto their parameter names; surplus
/// arguments are dropped. For unknown tools a single mapping argument
/// passes through unchanged, anything else becomes `{arg0, arg1, ...}`.
pub fn map_positional_args(tool: &str, args: Vec<Value>) -> Value {
    if let Some((_, names)) = KNOWN_TOOLS.iter().find(|(name, _)| *name == tool) {
        let mapped: Map<String, Value> = names
            .iter()
            .zip(args)
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        return Value::Object(mapped);
    }

    if args.len() == 1 && args[0].is_object() {
        return args.into_iter().next().expect("length checked");
    }

    let generic: Map<String, Value> = args
        .into_iter()
        .enumerate()
        .map(|(i, value)| (format!("arg{i}"), value))
        .collect();
    Value::Object(generic)
}
