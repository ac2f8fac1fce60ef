// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Log hygiene for tool-call arguments.

use serde_json::{Map, Value};

const MAX_STRING_CHARS: usize = 300;
const MAX_COLLECTION_ITEMS: usize = 20;

const SENSITIVE_KEY_PARTS: [&str; 8] = [
    "api_key",
    "apikey",
    "token",
    "secret",
    "password",
    "passwd",
    "authorization",
    "cookie",
];

fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase().replace('-', "_");
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEY_PARTS.iter().any(|part| normalized.contains(part))
}

/// Copy of `args` safe to log: values under credential-looking keys become
/// `"***"`, long strings are truncated, large collections are capped with a
/// count marker.  The original value is never modified.
pub fn redact_sensitive_args(args: &Value) -> Value {
    match args {
        // Top-level argument objects keep all their keys; caps apply to
        // nested collections only.
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String("***".into()));
                } else {
                    out.insert(key.clone(), redact_value(value));
                }
            }
            Value::Object(out)
        }
        other => redact_value(other),
    }
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(s) => truncate_string(s),
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_COLLECTION_ITEMS)
                .map(redact_value)
                .collect();
            if items.len() > MAX_COLLECTION_ITEMS {
                out.push(Value::String(format!(
                    "...(+{} items)",
                    items.len() - MAX_COLLECTION_ITEMS
                )));
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map.iter().take(MAX_COLLECTION_ITEMS) {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String("***".into()));
                } else {
                    out.insert(key.clone(), redact_value(item));
                }
            }
            if map.len() > MAX_COLLECTION_ITEMS {
                out.insert(
                    "...".into(),
                    Value::String(format!("+{} keys", map.len() - MAX_COLLECTION_ITEMS)),
                );
            }
            Value::Object(out)
        }
    }
}

fn truncate_string(s: &str) -> Value {
    if s.chars().count() <= MAX_STRING_CHARS {
        return Value::String(s.to_string());
    }
    let head: String = s.chars().take(MAX_STRING_CHARS).collect();
    Value::String(format!("{head}..."))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
