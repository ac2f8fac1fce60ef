// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Request dispatcher for the main agent.
//!
//! One [`Dispatcher`] serves many requests.  Per request it computes the
//! main agent's tool view, seeds a fresh transcript, drives the runtime to a
//! terminal state, and shapes the outcome into a [`Response`] with the
//! delegation trace attached.

use std::sync::Arc;

use anyhow::Context as _;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use ombud_config::{Config, OwnershipMode};
use ombud_model::{AgentMessage, ModelProvider, Role, StepParams, TokenUsage};
use ombud_tools::{main_agent_view, ToolContext, ToolPolicy, ToolRegistry};

use crate::answer::{assistant_response_schema, extract_answer, AssistantAnswer};
use crate::runtime::{AgentRuntime, DirectivePolicy, RunState, RuntimeLimits};
use crate::state::AgentState;
use crate::trace::DelegationTrace;

/// Name the main agent runs under, used for tool context and the trace.
const PRIMARY_AGENT: &str = "ombud";

const APOLOGY: &str = "Sorry, I couldn't answer right now.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are ombud, a helpful assistant. Use the available \
     tools when they help, delegate to a specialist agent when the task calls for one, and \
     answer concisely.";

/// One incoming user request.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: String,
    /// Prior conversation, seeded between the system prompt and the new
    /// user text.
    pub history: Vec<AgentMessage>,
    pub user_text: String,
}

impl Request {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            history: Vec::new(),
            user_text: user_text.into(),
        }
    }

    pub fn with_history(mut self, history: Vec<AgentMessage>) -> Self {
        self.history = history;
        self
    }
}

/// The shaped outcome of one request.
#[derive(Debug)]
pub struct Response {
    pub answer: AssistantAnswer,
    pub trace: DelegationTrace,
    /// False when the agent's structured output asked for silence.  Not an
    /// error.
    pub should_reply: bool,
    pub termination: RunState,
    /// Usage of the main agent's own steps.
    pub usage: TokenUsage,
    /// Tokens reported by delegated specialist runs.
    pub delegated_tokens: u64,
    pub error: Option<String>,
}

/// Serves requests for the main agent over a fixed catalog and policy set.
pub struct Dispatcher {
    provider: Arc<dyn ModelProvider>,
    catalog: ToolRegistry,
    main_policy: ToolPolicy,
    specialist_policies: Vec<ToolPolicy>,
    ownership: OwnershipMode,
    limits: RuntimeLimits,
    params: StepParams,
    system_prompt: String,
    directives: DirectivePolicy,
}

impl Dispatcher {
    /// Build from configuration plus the already-wired catalog.
    /// `specialist_policies` feed the ownership modes that reserve tools for
    /// delegation.
    pub fn new(
        cfg: &Config,
        provider: Arc<dyn ModelProvider>,
        catalog: ToolRegistry,
        specialist_policies: Vec<ToolPolicy>,
    ) -> anyhow::Result<Self> {
        let main = &cfg.agents.main;
        let main_policy = ToolPolicy::new(&main.tools_allow, &main.tools_deny, &main.servers)
            .context("invalid main agent tool policy")?;

        let params = StepParams {
            temperature: cfg.model.temperature,
            max_new_tokens: cfg.model.max_new_tokens,
            reasoning_effort: cfg.model.reasoning_effort.clone(),
            response_schema: Some(assistant_response_schema()),
        };

        Ok(Self {
            provider,
            catalog,
            main_policy,
            specialist_policies,
            ownership: cfg.agents.ownership,
            limits: RuntimeLimits::from_config(&cfg.runtime),
            params,
            system_prompt: cfg
                .runtime
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            directives: DirectivePolicy {
                managed_files_root: cfg.runtime.expanded_managed_files_root(),
                allow_system_inserts: cfg.runtime.allow_system_inserts,
            },
        })
    }

    /// Handle one request to completion.  Never fails; a failed run surfaces
    /// as an apology answer with the error captured on the response.
    pub async fn handle(&self, request: Request) -> Response {
        let view = main_agent_view(
            &self.catalog,
            &self.main_policy,
            &self.specialist_policies,
            self.ownership,
        );
        debug!(
            request_id = %request.request_id,
            tools = view.len(),
            ownership = %self.ownership,
            "dispatching"
        );

        let ctx = ToolContext {
            request_id: request.request_id.clone(),
            agent_name: PRIMARY_AGENT.to_string(),
            delegation_depth: 0,
        };
        let state = AgentState::seeded(&self.system_prompt, request.history, &request.user_text);
        let runtime = AgentRuntime::new(Arc::clone(&self.provider), view, self.limits)
            .with_params(self.params.clone())
            .with_directive_policy(self.directives.clone());

        let result = runtime.run(state, &ctx).await;
        let trace = DelegationTrace::extract(&result.state, PRIMARY_AGENT);
        let delegated_tokens = delegated_tokens(&result.state);

        if result.termination == RunState::DoneError {
            warn!(
                request_id = %request.request_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "request failed"
            );
            return Response {
                answer: AssistantAnswer {
                    kind: "text".into(),
                    content: APOLOGY.into(),
                    should_answer_to_user: true,
                },
                trace,
                should_reply: true,
                termination: result.termination,
                usage: result.usage,
                delegated_tokens,
                error: result.error,
            };
        }

        let answer = extract_answer(&result.final_message);
        let should_reply = answer.should_answer_to_user;
        Response {
            answer,
            trace,
            should_reply,
            termination: result.termination,
            usage: result.usage,
            delegated_tokens,
            error: result.error,
        }
    }
}

/// Sum of `total_tokens` over every delegation result in the transcript.
fn delegated_tokens(state: &AgentState) -> u64 {
    state
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool && m.tool_name.as_deref() == Some("invoke_agent"))
        .filter_map(|m| m.parts.first())
        .filter_map(|part| match part {
            ombud_model::MessagePart::Json { value } => {
                value.get("total_tokens").and_then(Value::as_u64)
            }
            _ => None,
        })
        .sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
