// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Delegation trace, rebuilt from the final transcript of one request.

use serde::Serialize;
use serde_json::Value;

use ombud_model::{MessagePart, Role};

use crate::state::AgentState;

/// One delegation decision made during a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    /// Agent that made the decision.
    pub agent: String,
    pub decision: String,
    /// Specialist that was invoked, when the result names one.
    pub target: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered record of every `invoke_agent` result in one request, discarded
/// after the response is emitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DelegationTrace {
    pub primary_agent: String,
    pub entries: Vec<TraceEntry>,
    /// Whether any delegation failed or returned a fallback answer.
    pub fallback_used: bool,
}

impl DelegationTrace {
    /// Walk the transcript and collect one entry per `invoke_agent` tool
    /// result.  Results that are not JSON objects are ignored.
    pub fn extract(state: &AgentState, primary_agent: &str) -> Self {
        let mut entries = Vec::new();
        let mut fallback_used = false;

        for message in &state.messages {
            if message.role != Role::Tool || message.tool_name.as_deref() != Some("invoke_agent") {
                continue;
            }
            let Some(MessagePart::Json { value }) = message.parts.first() else {
                continue;
            };
            if !value.is_object() {
                continue;
            }

            let target = value
                .get("agent")
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.trim().is_empty())
                .map(str::to_string);
            if !ok || value.get("fallback_used").and_then(Value::as_bool).unwrap_or(false) {
                fallback_used = true;
            }

            entries.push(TraceEntry {
                agent: primary_agent.to_string(),
                decision: "invoke_agent".into(),
                target,
                ok,
                error,
            });
        }

        Self {
            primary_agent: primary_agent.to_string(),
            entries,
            fallback_used,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use ombud_model::AgentMessage;

    use super::*;

    fn invoke_result(value: Value) -> AgentMessage {
        AgentMessage::tool_result("invoke_agent", "c1", value)
    }

    #[test]
    fn empty_state_yields_empty_trace() {
        let trace = DelegationTrace::extract(&AgentState::default(), "ombud");
        assert!(trace.is_empty());
        assert!(!trace.fallback_used);
        assert_eq!(trace.primary_agent, "ombud");
    }

    #[test]
    fn successful_invocation_is_recorded() {
        let mut state = AgentState::default();
        state.push(invoke_result(json!({
            "ok": true, "agent": "sql-analyst", "answer": "42", "fallback_used": false,
        })));

        let trace = DelegationTrace::extract(&state, "ombud");
        assert_eq!(trace.entries.len(), 1);
        let entry = &trace.entries[0];
        assert_eq!(entry.agent, "ombud");
        assert_eq!(entry.decision, "invoke_agent");
        assert_eq!(entry.target.as_deref(), Some("sql-analyst"));
        assert!(entry.ok);
        assert!(entry.error.is_none());
        assert!(!trace.fallback_used);
    }

    #[test]
    fn failed_invocation_marks_fallback() {
        let mut state = AgentState::default();
        state.push(invoke_result(json!({
            "ok": false, "agent": "ghost",
            "error": "agent 'ghost' is not available", "error_code": "agent_not_found",
        })));

        let trace = DelegationTrace::extract(&state, "ombud");
        assert!(trace.fallback_used);
        assert_eq!(
            trace.entries[0].error.as_deref(),
            Some("agent 'ghost' is not available")
        );
        assert!(!trace.entries[0].ok);
    }

    #[test]
    fn ok_with_fallback_flag_still_marks_fallback() {
        let mut state = AgentState::default();
        state.push(invoke_result(json!({
            "ok": true, "agent": "slowpoke", "answer": "partial", "fallback_used": true,
        })));

        let trace = DelegationTrace::extract(&state, "ombud");
        assert!(trace.entries[0].ok);
        assert!(trace.fallback_used);
    }

    #[test]
    fn other_tool_results_are_ignored() {
        let mut state = AgentState::default();
        state.push(AgentMessage::tool_result(
            "current_datetime",
            "c1",
            json!({ "timestamp": "2026-01-01T00:00:00Z" }),
        ));
        state.push(AgentMessage::tool_result_text(
            "invoke_agent",
            "c2",
            "not json",
        ));

        let trace = DelegationTrace::extract(&state, "ombud");
        assert!(trace.is_empty());
    }

    #[test]
    fn entries_keep_transcript_order() {
        let mut state = AgentState::default();
        state.push(invoke_result(json!({ "ok": true, "agent": "first" })));
        state.push(invoke_result(json!({ "ok": true, "agent": "second" })));

        let trace = DelegationTrace::extract(&state, "ombud");
        assert_eq!(trace.entries[0].target.as_deref(), Some("first"));
        assert_eq!(trace.entries[1].target.as_deref(), Some("second"));
    }
}
