// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Delegation broker and the `invoke_agent` / `list_agents` tools.
//!
//! A delegation runs the target specialist in a nested runtime with its own
//! budgets and an ephemeral transcript; the caller's history is never copied
//! in.  Every outcome, including refusals, comes back as a structured tool
//! result so the calling agent can recover or report the limitation instead
//! of aborting its own run.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ombud_config::{DelegationConfig, RequireToolUse};
use ombud_model::{MessagePart, ModelProvider, PartSource, TokenUsage};
use ombud_tools::{
    optional_str_arg, require_str_arg, resolve, Tool, ToolCall, ToolContext, ToolRegistry,
    ToolResult,
};

use crate::agents::{AgentRegistry, AgentSpec};
use crate::answer::{assistant_response_schema, extract_answer};
use crate::runtime::{AgentRuntime, RunResult, RunState, RuntimeLimits};
use crate::state::AgentState;

/// Delegation chains stop here even when `invoke_agent` was explicitly
/// granted to a specialist.
const MAX_DELEGATION_DEPTH: u32 = 3;

const TOOL_POLICY_REMINDER: &str = "Tool policy reminder: this request requires using tools \
     before the final answer. Call the relevant tool now, then provide the final answer \
     from tool output.";

/// Builds the model provider for one specialist, honouring its overrides.
pub trait AgentProviderFactory: Send + Sync {
    fn for_agent(&self, spec: &AgentSpec) -> anyhow::Result<Arc<dyn ModelProvider>>;
}

/// Hands every specialist the same provider.  Used when no per-agent model
/// overrides are configured, and throughout the tests.
pub struct FixedProviderFactory {
    provider: Arc<dyn ModelProvider>,
}

impl FixedProviderFactory {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

impl AgentProviderFactory for FixedProviderFactory {
    fn for_agent(&self, _spec: &AgentSpec) -> anyhow::Result<Arc<dyn ModelProvider>> {
        Ok(Arc::clone(&self.provider))
    }
}

/// Result of one delegation, serialized verbatim as the `invoke_agent` tool
/// result.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationOutcome {
    pub ok: bool,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// File and image parts from the specialist's final state.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Set when the answer came from a limit fallback or an unmet tool-use
    /// requirement.
    pub fallback_used: bool,
    pub tool_calls: u32,
    pub total_tokens: u64,
}

impl DelegationOutcome {
    fn failure(agent: &str, code: &str, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            agent: agent.to_string(),
            answer: None,
            attachments: Vec::new(),
            error: Some(error.into()),
            error_code: Some(code.to_string()),
            fallback_used: false,
            tool_calls: 0,
            total_tokens: 0,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Resolves, scopes, runs, and reports delegated specialist work.
pub struct DelegationBroker {
    registry: AgentRegistry,
    factory: Arc<dyn AgentProviderFactory>,
    /// Outer wall-clock cap per delegation.  The nested runtime enforces its
    /// own limits on top.
    timeout: Duration,
    require: RequireToolUse,
    /// Full tool catalog, installed once at wiring time.  A `OnceLock`
    /// because the catalog contains the delegation tools that hold this
    /// broker.
    catalog: OnceLock<ToolRegistry>,
}

impl DelegationBroker {
    pub fn new(
        registry: AgentRegistry,
        factory: Arc<dyn AgentProviderFactory>,
        cfg: &DelegationConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            timeout: Duration::from_secs(cfg.timeout_secs),
            require: cfg.require_tool_use,
            catalog: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install the full catalog this broker scopes specialist views from.
    pub fn install_catalog(&self, catalog: ToolRegistry) {
        if self.catalog.set(catalog).is_err() {
            warn!("delegation catalog already installed, keeping the first");
        }
    }

    /// Sorted names of enabled specialists.
    pub fn agent_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// The specialist's visible tools.  `invoke_agent` is stripped unless its
    /// literal name appears in the allow list; a wildcard match is not an
    /// explicit grant.
    fn specialist_view(&self, spec: &AgentSpec) -> ToolRegistry {
        let catalog = self.catalog.get().cloned().unwrap_or_default();
        let mut view = resolve(&catalog, &spec.policy);
        if !spec.policy.explicitly_allows("invoke_agent") {
            view.remove("invoke_agent");
        }
        view
    }

    /// Run one delegation to completion.  Never fails; every refusal and
    /// specialist failure is a structured outcome.
    pub async fn invoke(
        &self,
        agent_name: &str,
        task: &str,
        details: Option<&str>,
        ctx: &ToolContext,
    ) -> DelegationOutcome {
        if ctx.delegation_depth >= MAX_DELEGATION_DEPTH {
            warn!(
                agent = agent_name,
                depth = ctx.delegation_depth,
                "refusing delegation beyond the depth limit"
            );
            return DelegationOutcome::failure(
                agent_name,
                "delegation_depth_exceeded",
                format!("delegation depth limit ({MAX_DELEGATION_DEPTH}) reached"),
            );
        }

        let Some(spec) = self.registry.get(agent_name) else {
            return DelegationOutcome::failure(
                agent_name,
                "agent_not_found",
                format!("agent '{agent_name}' is not available"),
            );
        };

        let provider = match self.factory.for_agent(spec) {
            Ok(p) => p,
            Err(e) => {
                warn!(agent = %spec.name, error = %e, "provider construction failed");
                return DelegationOutcome::failure(
                    &spec.name,
                    "delegated_agent_failed",
                    format!("{e:#}"),
                );
            }
        };

        let view = self.specialist_view(spec);
        let limits = RuntimeLimits::for_delegation(spec.max_tool_iterations, self.timeout.as_secs());
        let mut params = spec.step_params();
        params.response_schema = Some(assistant_response_schema());

        let nested_ctx = ToolContext {
            request_id: ctx.request_id.clone(),
            agent_name: spec.name.clone(),
            delegation_depth: ctx.delegation_depth + 1,
        };
        let user_text = render_task(task, details);

        debug!(
            agent = %spec.name,
            depth = nested_ctx.delegation_depth,
            tools = view.len(),
            "delegating"
        );

        let runtime = AgentRuntime::new(provider, view.clone(), limits).with_params(params);
        let started = Instant::now();

        let state = AgentState::seeded(&spec.system_prompt, Vec::new(), &user_text);
        let first = tokio::time::timeout(self.timeout, runtime.run(state, &nested_ctx)).await;
        let Ok(mut result) = first else {
            warn!(
                agent = %spec.name,
                timeout_secs = self.timeout.as_secs(),
                "delegation hit the outer deadline"
            );
            return DelegationOutcome::failure(
                &spec.name,
                "delegation_timeout",
                format!("delegation timed out after {}s", self.timeout.as_secs()),
            );
        };

        // Tool-use requirement, re-prompted at most once.
        let mut fallback_used = false;
        let mut retry_usage = TokenUsage::default();
        let mut retry_calls = 0u32;
        if self.tool_use_required(&view)
            && result.termination == RunState::DoneAnswer
            && result.state.tool_message_count() == 0
        {
            debug!(agent = %spec.name, "tool-use requirement unmet, re-prompting once");
            let remaining = self.timeout.saturating_sub(started.elapsed());
            let reminder = format!("{}\n\n{TOOL_POLICY_REMINDER}", spec.system_prompt);
            let retry_state = AgentState::seeded(&reminder, Vec::new(), &user_text);
            match tokio::time::timeout(remaining, runtime.run(retry_state, &nested_ctx)).await {
                Ok(second) => {
                    retry_usage = result.usage;
                    retry_calls = result.tool_calls;
                    result = second;
                    if result.state.tool_message_count() == 0 {
                        fallback_used = true;
                    }
                }
                Err(_) => {
                    warn!(agent = %spec.name, "re-prompt hit the outer deadline, keeping the first answer");
                    fallback_used = true;
                }
            }
        }

        finish(spec, result, retry_usage, retry_calls, fallback_used)
    }

    fn tool_use_required(&self, view: &ToolRegistry) -> bool {
        match self.require {
            RequireToolUse::Always => true,
            RequireToolUse::Never => false,
            RequireToolUse::Auto => !view.is_empty(),
        }
    }
}

/// Map a finished nested run onto a delegation outcome.
fn finish(
    spec: &AgentSpec,
    result: RunResult,
    extra_usage: TokenUsage,
    extra_calls: u32,
    fallback_used: bool,
) -> DelegationOutcome {
    let attachments = collect_attachments(&result.state);
    let mut usage = result.usage;
    usage.add(extra_usage);
    let tool_calls = result.tool_calls + extra_calls;
    let total_tokens = usage.total();
    let agent = spec.name.clone();

    match result.termination {
        RunState::DoneAnswer => {
            let answer = extract_answer(&result.final_message);
            DelegationOutcome {
                ok: true,
                agent,
                answer: Some(answer.content),
                attachments,
                error: None,
                error_code: None,
                fallback_used,
                tool_calls,
                total_tokens,
            }
        }
        RunState::DoneLimit => DelegationOutcome {
            ok: true,
            agent,
            answer: Some(result.final_message),
            attachments,
            error: None,
            error_code: None,
            fallback_used: true,
            tool_calls,
            total_tokens,
        },
        RunState::DoneTimeout => DelegationOutcome {
            ok: false,
            agent,
            answer: Some(result.final_message).filter(|m| !m.is_empty()),
            attachments,
            error: Some("delegated agent timed out".into()),
            error_code: Some("delegated_agent_timeout".into()),
            fallback_used,
            tool_calls,
            total_tokens,
        },
        RunState::DoneError => DelegationOutcome {
            ok: false,
            agent,
            answer: None,
            attachments,
            error: Some(result.error.unwrap_or_else(|| "delegated agent failed".into())),
            error_code: Some("delegated_agent_failed".into()),
            fallback_used,
            tool_calls,
            total_tokens,
        },
    }
}

fn render_task(task: &str, details: Option<&str>) -> String {
    match details {
        Some(d) if !d.trim().is_empty() => format!("Task:\n{task}\n\nContext:\n{d}"),
        _ => task.to_string(),
    }
}

/// Descriptors for file and image parts in the specialist's final state.
/// Content stays behind its source reference; only metadata travels back.
fn collect_attachments(state: &AgentState) -> Vec<Value> {
    let mut out = Vec::new();
    for message in &state.messages {
        for part in &message.parts {
            match part {
                MessagePart::Image { source, mime } => {
                    out.push(attachment_value("image", source, mime.as_deref(), None));
                }
                MessagePart::File {
                    source,
                    mime,
                    filename,
                } => {
                    out.push(attachment_value(
                        "file",
                        source,
                        mime.as_deref(),
                        filename.as_deref(),
                    ));
                }
                MessagePart::Text { .. } | MessagePart::Json { .. } => {}
            }
        }
    }
    out
}

fn attachment_value(
    kind: &str,
    source: &PartSource,
    mime: Option<&str>,
    filename: Option<&str>,
) -> Value {
    let mut value = json!({ "type": kind });
    match source {
        PartSource::ManagedFile { path } => value["path"] = json!(path),
        PartSource::DataUrl { .. } => value["inline"] = json!(true),
    }
    if let Some(m) = mime {
        value["mime"] = json!(m);
    }
    if let Some(f) = filename {
        value["filename"] = json!(f);
    }
    value
}

/// Register the delegation tools into `catalog` and hand the finished catalog
/// back to the broker.  Call exactly once, after every other tool is
/// registered, so specialist views see the full set.
pub fn wire_delegation(catalog: &mut ToolRegistry, broker: &Arc<DelegationBroker>) {
    catalog.register(ListAgentsTool {
        broker: Arc::clone(broker),
    });
    catalog.register(InvokeAgentTool {
        broker: Arc::clone(broker),
    });
    broker.install_catalog(catalog.clone());
}

struct ListAgentsTool {
    broker: Arc<DelegationBroker>,
}

#[async_trait]
impl Tool for ListAgentsTool {
    fn name(&self) -> &str {
        "list_agents"
    }

    fn description(&self) -> &str {
        "List available specialist agents that can be invoked by name. \
         Use this before invoking a specialist when uncertain about agent names."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let agents = self.broker.agent_names();
        let count = agents.len();
        Ok(ToolResult::ok_json(
            &call.id,
            json!({ "agents": agents, "count": count }),
        ))
    }
}

struct InvokeAgentTool {
    broker: Arc<DelegationBroker>,
}

#[async_trait]
impl Tool for InvokeAgentTool {
    fn name(&self) -> &str {
        "invoke_agent"
    }

    fn description(&self) -> &str {
        "Invoke a specialist agent to handle a delegated task. \
         Wait for its result and then continue with your own final answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Exact name returned by list_agents.",
                },
                "task": {
                    "type": "string",
                    "description": "Concrete delegated task for the specialist.",
                },
                "context": {
                    "type": ["string", "null"],
                    "description": "Optional supporting context for the specialist.",
                }
            },
            "required": ["agent_name", "task"],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let agent_name = require_str_arg(&call.args, "agent_name")?;
        let task = require_str_arg(&call.args, "task")?;
        let details = optional_str_arg(&call.args, "context");

        let outcome = self
            .broker
            .invoke(&agent_name, &task, details.as_deref(), ctx)
            .await;
        Ok(ToolResult::ok_json(&call.id, outcome.to_value()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
