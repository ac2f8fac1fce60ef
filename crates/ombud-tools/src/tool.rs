// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ombud_model::AgentMessage;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Per-call execution context passed to every tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Correlation id of the originating request.
    pub request_id: String,
    /// Name of the agent on whose behalf the tool runs.
    pub agent_name: String,
    /// How many delegation hops deep this call is.  The main agent runs at
    /// depth 0; a specialist it invokes runs at depth 1.
    pub delegation_depth: u32,
}

/// An instruction from a tool back to the runtime.
///
/// Directives are honoured only for tools whose registry entry is trusted;
/// from any other tool the same payload is recorded as opaque data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Append `message` to the transcript after this tool's result.
    AppendMessage { message: AgentMessage },
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::AppendMessage { .. } => "append_message",
        }
    }
}

/// What a tool produced: exactly one of plain text, structured data, or a
/// runtime directive.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Plain(String),
    Structured(Value),
    Directive(Directive),
}

impl ToolPayload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolPayload::Plain(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ToolPayload::Structured(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_directive(&self) -> Option<&Directive> {
        match self {
            ToolPayload::Directive(d) => Some(d),
            _ => None,
        }
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub payload: ToolPayload,
    /// True when the tool failed non-fatally (payload carries the message).
    pub is_error: bool,
}

impl ToolResult {
    /// Successful plain-text result.
    pub fn ok_text(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: ToolPayload::Plain(content.into()),
            is_error: false,
        }
    }

    /// Successful structured result.
    pub fn ok_json(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            payload: ToolPayload::Structured(value),
            is_error: false,
        }
    }

    /// Successful directive result.
    pub fn directive(call_id: impl Into<String>, directive: Directive) -> Self {
        Self {
            call_id: call_id.into(),
            payload: ToolPayload::Directive(directive),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: ToolPayload::Plain(msg.into()),
            is_error: true,
        }
    }
}

/// Trait that every built-in and bridged tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// The external tool server this binding is proxied from, if any.
    /// `None` marks a local tool.
    fn server_scope(&self) -> Option<&str> {
        None
    }
    /// Execute the tool.  A returned error is caught by the runtime and
    /// converted into an error tool-result; it never aborts the run.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> anyhow::Result<ToolResult>;
}

/// Extract a required non-empty string argument.
pub fn require_str_arg(args: &Value, key: &str) -> anyhow::Result<String> {
    match args.get(key).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => bail!("{key} must be a non-empty string"),
    }
}

/// Extract an optional string argument; empty and null collapse to `None`.
pub fn optional_str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn directive_serializes_with_type_tag() {
        let d = Directive::AppendMessage {
            message: AgentMessage::user("hi"),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["type"], json!("append_message"));
        assert_eq!(v["message"]["role"], json!("user"));
    }

    #[test]
    fn directive_kind_names_variant() {
        let d = Directive::AppendMessage {
            message: AgentMessage::user("hi"),
        };
        assert_eq!(d.kind(), "append_message");
    }

    #[test]
    fn err_result_is_flagged() {
        let r = ToolResult::err("c1", "boom");
        assert!(r.is_error);
        assert_eq!(r.payload.as_text(), Some("boom"));
    }

    #[test]
    fn payload_accessors_are_exclusive() {
        let r = ToolResult::ok_json("c1", json!({ "x": 1 }));
        assert!(r.payload.as_text().is_none());
        assert!(r.payload.as_directive().is_none());
        assert_eq!(r.payload.as_json().unwrap()["x"], json!(1));
    }

    #[test]
    fn require_str_arg_rejects_missing_and_blank() {
        assert!(require_str_arg(&json!({}), "task").is_err());
        assert!(require_str_arg(&json!({ "task": "  " }), "task").is_err());
        assert!(require_str_arg(&json!({ "task": 3 }), "task").is_err());
        assert_eq!(require_str_arg(&json!({ "task": " go " }), "task").unwrap(), "go");
    }

    #[test]
    fn optional_str_arg_collapses_empty() {
        assert_eq!(optional_str_arg(&json!({ "c": "" }), "c"), None);
        assert_eq!(optional_str_arg(&json!({ "c": null }), "c"), None);
        assert_eq!(optional_str_arg(&json!({}), "c"), None);
        assert_eq!(optional_str_arg(&json!({ "c": "x" }), "c").as_deref(), Some("x"));
    }
}
