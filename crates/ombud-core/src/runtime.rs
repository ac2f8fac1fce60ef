// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The bounded agent loop.
//!
//! One run drives a single agent: model step, sequential tool execution,
//! tool-output append, directive application, limit check, repeat.  The loop
//! never aborts on a tool failure; it aborts only when the provider itself
//! gives up.  Limit and deadline exhaustion degrade to a best-effort answer
//! synthesized from whatever assistant text already exists in state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ombud_config::RuntimeConfig;
use ombud_model::{
    AgentMessage, MessagePart, ModelProvider, PartSource, Role, StepParams, StepRequest,
    TokenUsage, ToolCallRequest,
};
use ombud_tools::{Directive, ToolCall, ToolContext, ToolEntry, ToolPayload, ToolRegistry, ToolResult};

use crate::state::AgentState;
use crate::util::redact_sensitive_args;

const STEPS_FALLBACK: &str = "I reached the maximum execution steps before finishing.";
const TOOL_CALLS_FALLBACK: &str = "I reached the maximum number of tool calls before finishing.";
const TIMEOUT_FALLBACK: &str = "I ran out of time before finishing.";

/// Hard budgets for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub max_steps: u32,
    pub max_tool_calls: u32,
    pub timeout_secs: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_tool_calls: 12,
            timeout_secs: 60,
        }
    }
}

impl RuntimeLimits {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            max_steps: cfg.max_steps,
            max_tool_calls: cfg.max_tool_calls,
            timeout_secs: cfg.timeout_secs,
        }
    }

    /// Budgets for a nested delegation run, derived from the specialist's
    /// iteration cap.  Floors keep a misconfigured specialist from being
    /// unable to make progress.
    pub fn for_delegation(max_tool_iterations: u32, timeout_secs: u64) -> Self {
        Self {
            max_steps: max_tool_iterations.max(1),
            max_tool_calls: (max_tool_iterations.saturating_mul(2)).max(12),
            timeout_secs: timeout_secs.max(30),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    DoneAnswer,
    DoneLimit,
    DoneTimeout,
    DoneError,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::DoneAnswer => "done_answer",
            RunState::DoneLimit => "done_limit",
            RunState::DoneTimeout => "done_timeout",
            RunState::DoneError => "done_error",
        };
        write!(f, "{s}")
    }
}

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct RunResult {
    /// Final answer text.  Best-effort on limit/timeout; empty on error.
    pub final_message: String,
    pub state: AgentState,
    pub termination: RunState,
    pub usage: TokenUsage,
    /// Total tool calls requested by the model over the whole run.
    pub tool_calls: u32,
    /// Provider failure that ended the run, when termination is `DoneError`.
    pub error: Option<String>,
}

/// How the runtime treats directives from trusted tools.
#[derive(Debug, Clone, Default)]
pub struct DirectivePolicy {
    /// Root for materializing managed-file references.  `None` disables
    /// inlining; references then never reach the provider.
    pub managed_files_root: Option<PathBuf>,
    /// Whether trusted tools may append system-role messages.
    pub allow_system_inserts: bool,
}

#[derive(Debug, Default)]
struct Counters {
    usage: TokenUsage,
    tool_calls: u32,
}

enum StepEnd {
    Answer(String),
    StepLimit,
    ToolCallLimit,
}

/// Drives one agent through the step cycle until a terminal state.
pub struct AgentRuntime {
    provider: Arc<dyn ModelProvider>,
    /// This agent's visible tools; resolved by the caller, never widened here.
    view: ToolRegistry,
    limits: RuntimeLimits,
    params: StepParams,
    directives: DirectivePolicy,
}

impl AgentRuntime {
    pub fn new(provider: Arc<dyn ModelProvider>, view: ToolRegistry, limits: RuntimeLimits) -> Self {
        Self {
            provider,
            view,
            limits,
            params: StepParams::default(),
            directives: DirectivePolicy::default(),
        }
    }

    /// Sampling parameters and optional response schema for every step of
    /// this run.
    pub fn with_params(mut self, params: StepParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_directive_policy(mut self, policy: DirectivePolicy) -> Self {
        self.directives = policy;
        self
    }

    /// Run to a terminal state.  Recoverable conditions (tool errors,
    /// limits, deadline) never surface as `Err` anywhere inside; the only
    /// failure path is provider transport exhaustion, reported as
    /// [`RunState::DoneError`].
    pub async fn run(&self, mut state: AgentState, ctx: &ToolContext) -> RunResult {
        let mut counters = Counters::default();
        let budget = Duration::from_secs(self.limits.timeout_secs);

        let end = tokio::time::timeout(budget, self.drive(&mut state, &mut counters, ctx)).await;

        let (final_message, termination, error) = match end {
            Ok(Ok(StepEnd::Answer(text))) => (text, RunState::DoneAnswer, None),
            Ok(Ok(StepEnd::StepLimit)) => {
                warn!(max_steps = self.limits.max_steps, "run hit its step limit");
                (best_effort(&state, STEPS_FALLBACK), RunState::DoneLimit, None)
            }
            Ok(Ok(StepEnd::ToolCallLimit)) => {
                warn!(max_tool_calls = self.limits.max_tool_calls, "run hit its tool-call limit");
                (best_effort(&state, TOOL_CALLS_FALLBACK), RunState::DoneLimit, None)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "provider step failed, run aborted");
                (String::new(), RunState::DoneError, Some(format!("{e:#}")))
            }
            Err(_) => {
                warn!(timeout_secs = self.limits.timeout_secs, "run exceeded its deadline");
                (best_effort(&state, TIMEOUT_FALLBACK), RunState::DoneTimeout, None)
            }
        };

        RunResult {
            final_message,
            state,
            termination,
            usage: counters.usage,
            tool_calls: counters.tool_calls,
            error,
        }
    }

    async fn drive(
        &self,
        state: &mut AgentState,
        counters: &mut Counters,
        ctx: &ToolContext,
    ) -> anyhow::Result<StepEnd> {
        let mut step = 0u32;
        loop {
            if step >= self.limits.max_steps {
                return Ok(StepEnd::StepLimit);
            }

            let request = StepRequest {
                messages: state.messages.clone(),
                tools: self.view.schemas(),
                params: self.params.clone(),
            };
            let outcome = self.provider.step(request).await?;
            counters.usage.add(outcome.usage);
            debug!(
                step,
                tool_calls = outcome.tool_calls.len(),
                step_tokens = outcome.usage.total(),
                "provider step completed"
            );

            if outcome.tool_calls.is_empty() {
                let text = outcome.text.unwrap_or_default();
                state.push(AgentMessage::assistant(text.clone()));
                return Ok(StepEnd::Answer(text));
            }

            counters.tool_calls += outcome.tool_calls.len() as u32;
            if counters.tool_calls > self.limits.max_tool_calls {
                return Ok(StepEnd::ToolCallLimit);
            }

            state.push(AgentMessage::assistant_tool_calls(
                outcome.text,
                outcome.tool_calls.clone(),
            ));
            for call in &outcome.tool_calls {
                let (message, directive) = self.execute_one(call, ctx).await;
                state.push(message);
                if let Some(directive) = directive {
                    self.apply_directive(state, &call.name, directive);
                }
            }

            step += 1;
        }
    }

    /// Execute a single tool call against the visible set.  Violations and
    /// execution failures both come back as error tool-results; the run
    /// continues either way.
    async fn execute_one(
        &self,
        request: &ToolCallRequest,
        ctx: &ToolContext,
    ) -> (AgentMessage, Option<Directive>) {
        let name = &request.name;
        let Some(entry) = self.view.get(name) else {
            warn!(tool = %name, "model requested a tool outside its visible set");
            let content = error_content(name, "tool_not_available", &format!("tool '{name}' is not available"));
            return (AgentMessage::tool_result(name, &request.id, content), None);
        };

        let args = parse_arguments(&request.arguments);
        debug!(
            tool = %name,
            call_id = %request.id,
            args = %redact_sensitive_args(&args),
            "executing tool"
        );

        let call = ToolCall {
            id: request.id.clone(),
            name: name.clone(),
            args,
        };
        match entry.tool.execute(&call, ctx).await {
            Ok(result) => self.render_result(entry, name, result),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                let content = error_content(name, "tool_execution_failed", &format!("{e:#}"));
                (AgentMessage::tool_result(name, &request.id, content), None)
            }
        }
    }

    fn render_result(
        &self,
        entry: &ToolEntry,
        name: &str,
        result: ToolResult,
    ) -> (AgentMessage, Option<Directive>) {
        let call_id = result.call_id;
        if result.is_error {
            let detail = match result.payload {
                ToolPayload::Plain(text) => text,
                ToolPayload::Structured(value) => value.to_string(),
                ToolPayload::Directive(d) => format!("errored while emitting a {} directive", d.kind()),
            };
            let content = error_content(name, "tool_execution_failed", &detail);
            return (AgentMessage::tool_result(name, call_id, content), None);
        }

        match result.payload {
            ToolPayload::Plain(text) => {
                (AgentMessage::tool_result_text(name, call_id, text), None)
            }
            ToolPayload::Structured(value) => {
                (AgentMessage::tool_result(name, call_id, value), None)
            }
            ToolPayload::Directive(directive) if entry.trusted => {
                let ack = json!({ "ok": true, "directive": directive.kind() });
                (AgentMessage::tool_result(name, call_id, ack), Some(directive))
            }
            ToolPayload::Directive(directive) => {
                // The trust flag, not the payload shape, is the gate.  From
                // an untrusted tool the directive is recorded as opaque data.
                warn!(tool = %name, "ignored append_message directive from untrusted tool");
                let opaque = serde_json::to_value(&directive).unwrap_or(Value::Null);
                (AgentMessage::tool_result(name, call_id, opaque), None)
            }
        }
    }

    fn apply_directive(&self, state: &mut AgentState, tool_name: &str, directive: Directive) {
        match directive {
            Directive::AppendMessage { message } => {
                if message.role == Role::System && !self.directives.allow_system_inserts {
                    warn!(tool = %tool_name, "ignored system append_message directive");
                    return;
                }
                let mut stamped = message;
                stamped.source_tool = Some(tool_name.to_string());
                for part in &mut stamped.parts {
                    self.materialize_part(part);
                }
                debug!(
                    tool = %tool_name,
                    role = stamped.role.as_str(),
                    parts = stamped.parts.len(),
                    "applied append_message directive"
                );
                state.push(stamped);
            }
        }
    }

    /// Replace a managed-file reference with an inline base64 data URL.
    /// On any rejection the part is left untouched and the provider will
    /// drop it.
    fn materialize_part(&self, part: &mut MessagePart) {
        let (source, mime) = match part {
            MessagePart::Image { source, mime } => (source, mime.clone()),
            MessagePart::File { source, mime, .. } => (source, mime.clone()),
            _ => return,
        };
        let rel = match &*source {
            PartSource::ManagedFile { path } => path.clone(),
            PartSource::DataUrl { .. } => return,
        };
        if let Some(url) = self.inline_managed_file(&rel, mime.as_deref()) {
            *source = PartSource::DataUrl { url };
        }
    }

    fn inline_managed_file(&self, rel: &str, mime: Option<&str>) -> Option<String> {
        let root = match &self.directives.managed_files_root {
            Some(root) => root,
            None => {
                warn!("managed file root not configured for runtime injection");
                return None;
            }
        };
        if Path::new(rel).is_absolute() {
            warn!(path = %rel, "managed file injection rejected absolute path");
            return None;
        }
        let root = match root.canonicalize() {
            Ok(root) => root,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "managed file root is unusable");
                return None;
            }
        };
        let full = match root.join(rel).canonicalize() {
            Ok(full) => full,
            Err(_) => {
                warn!(path = %rel, "managed file missing on disk for injection");
                return None;
            }
        };
        if !full.starts_with(&root) {
            warn!(path = %rel, "managed file injection rejected path escape");
            return None;
        }
        if !full.is_file() {
            warn!(path = %rel, "managed file is not a regular file");
            return None;
        }
        let bytes = match std::fs::read(&full) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %rel, error = %e, "failed to read managed file");
                return None;
            }
        };
        let mime = mime.unwrap_or("application/octet-stream");
        debug!(path = %rel, mime, size = bytes.len(), "inlined managed file");
        Some(format!("data:{mime};base64,{}", B64.encode(&bytes)))
    }
}

fn best_effort(state: &AgentState, fallback: &str) -> String {
    state
        .last_assistant_text()
        .unwrap_or_else(|| fallback.to_string())
}

fn error_content(tool: &str, code: &str, message: &str) -> Value {
    json!({
        "ok": false,
        "tool": tool,
        "error_code": code,
        "error": message,
    })
}

/// Parse raw tool-call arguments, tolerating the common model mistakes:
/// empty strings, markdown fences, and truncated closing braces.  Anything
/// unrecoverable degrades to an empty object so the tool can reject it with
/// a proper argument error.
fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return json!({});
    }
    for candidate in argument_candidates(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
            return value;
        }
    }
    let preview: String = trimmed.chars().take(120).collect();
    warn!(raw = %preview, "tool call arguments were not valid JSON, substituting empty object");
    json!({})
}

fn argument_candidates(text: &str) -> Vec<String> {
    let mut candidates = vec![text.to_string()];

    let mut lines: Vec<&str> = text.lines().collect();
    if lines.first().map_or(false, |l| l.starts_with("```")) {
        lines.remove(0);
        if lines.last().map_or(false, |l| l.trim() == "```") {
            lines.pop();
        }
        let fenced = lines.join("\n").trim().to_string();
        if !fenced.is_empty() {
            candidates.push(fenced);
        }
    }

    let mut repaired = Vec::new();
    for candidate in &candidates {
        if candidate.starts_with('{') {
            let missing = candidate
                .matches('{')
                .count()
                .saturating_sub(candidate.matches('}').count());
            if missing > 0 {
                repaired.push(format!("{}{}", candidate, "}".repeat(missing)));
            }
        }
    }
    candidates.extend(repaired);
    candidates
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // ── Argument parsing ──────────────────────────────────────────────────────

    #[test]
    fn empty_arguments_become_empty_object() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("   "), json!({}));
    }

    #[test]
    fn valid_object_passes_through() {
        assert_eq!(parse_arguments(r#"{"a": 1}"#), json!({ "a": 1 }));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"task\": \"look\"}\n```";
        assert_eq!(parse_arguments(raw), json!({ "task": "look" }));
    }

    #[test]
    fn truncated_braces_are_repaired() {
        assert_eq!(
            parse_arguments(r#"{"a": {"b": 1}"#),
            json!({ "a": { "b": 1 } })
        );
    }

    #[test]
    fn garbage_degrades_to_empty_object() {
        assert_eq!(parse_arguments("not json at all"), json!({}));
    }

    #[test]
    fn non_object_json_degrades_to_empty_object() {
        assert_eq!(parse_arguments("[1, 2]"), json!({}));
        assert_eq!(parse_arguments("\"text\""), json!({}));
    }

    // ── Limits ────────────────────────────────────────────────────────────────

    #[test]
    fn default_limits() {
        let l = RuntimeLimits::default();
        assert_eq!((l.max_steps, l.max_tool_calls, l.timeout_secs), (8, 12, 60));
    }

    #[test]
    fn delegation_limits_floor_small_values() {
        let l = RuntimeLimits::for_delegation(0, 5);
        assert_eq!(l.max_steps, 1);
        assert_eq!(l.max_tool_calls, 12);
        assert_eq!(l.timeout_secs, 30);
    }

    #[test]
    fn delegation_limits_scale_with_iterations() {
        let l = RuntimeLimits::for_delegation(10, 90);
        assert_eq!(l.max_steps, 10);
        assert_eq!(l.max_tool_calls, 20);
        assert_eq!(l.timeout_secs, 90);
    }

    #[test]
    fn error_content_shape() {
        let v = error_content("clock", "tool_not_available", "tool 'clock' is not available");
        assert_eq!(v["ok"], json!(false));
        assert_eq!(v["tool"], json!("clock"));
        assert_eq!(v["error_code"], json!("tool_not_available"));
    }

    #[test]
    fn best_effort_prefers_assistant_text() {
        let mut state = AgentState::default();
        state.push(AgentMessage::assistant("partial work"));
        assert_eq!(best_effort(&state, STEPS_FALLBACK), "partial work");
        assert_eq!(best_effort(&AgentState::default(), STEPS_FALLBACK), STEPS_FALLBACK);
    }
}
