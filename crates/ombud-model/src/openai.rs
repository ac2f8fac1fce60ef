// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Non-streaming OpenAI chat-completions driver.
//!
//! One [`StepRequest`] becomes one `POST /chat/completions`; the full response
//! body is parsed into a [`StepOutcome`].  Transient failures (HTTP 429, 5xx,
//! transport errors) are retried with exponential backoff up to
//! `ModelConfig::max_retries`; anything else surfaces immediately.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ombud_config::ModelConfig;

use crate::provider::ModelProvider;
use crate::types::{
    AgentMessage, MessagePart, PartSource, Role, StepOutcome, StepRequest, TokenUsage,
    ToolCallRequest,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions driver.
pub struct OpenAiProvider {
    client: reqwest::Client,
    /// Full chat completions URL, e.g. `https://api.openai.com/v1/chat/completions`.
    chat_url: String,
    /// API key (pre-resolved from config or env).
    api_key: Option<String>,
    model: String,
    max_retries: u32,
    temperature: Option<f32>,
    max_new_tokens: Option<u32>,
    reasoning_effort: Option<String>,
}

impl OpenAiProvider {
    pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Self> {
        let base = cfg
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            chat_url: format!("{base}/chat/completions"),
            api_key: crate::resolve_api_key(cfg),
            model: cfg.name.clone(),
            max_retries: cfg.max_retries,
            temperature: cfg.temperature,
            max_new_tokens: cfg.max_new_tokens,
            reasoning_effort: cfg.reasoning_effort.clone(),
        })
    }

    fn build_body(&self, req: &StepRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": build_wire_messages(&req.messages),
        });

        // Per-request params win over the provider defaults from config.
        if let Some(t) = req.params.temperature.or(self.temperature) {
            // Reasoning models reject the temperature parameter outright.
            if !reasoning_model(&self.model) {
                body["temperature"] = json!(t);
            }
        }
        if let Some(n) = req.params.max_new_tokens.or(self.max_new_tokens) {
            // Newer OpenAI models deprecated "max_tokens" in favour of this.
            body["max_completion_tokens"] = json!(n);
        }
        if let Some(e) = req.params.reasoning_effort.as_deref().or(self.reasoning_effort.as_deref()) {
            body["reasoning_effort"] = json!(e);
        }
        if let Some(schema) = &req.params.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": schema,
            });
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn step(&self, req: StepRequest) -> anyhow::Result<StepOutcome> {
        let body = self.build_body(&req);

        debug!(
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending chat completion request"
        );
        tracing::trace!(request_body = ?body, "full completion request");

        let key = self
            .api_key
            .as_deref()
            .context("API key not set; provide api_key or api_key_env in config")?;

        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(&self.chat_url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: Value =
                        resp.json().await.context("openai response was not JSON")?;
                    return parse_step_outcome(&parsed);
                }
                Ok(resp) if retriable_status(resp.status()) && attempt < self.max_retries => {
                    let status = resp.status();
                    let delay = retry_delay(attempt);
                    warn!(%status, attempt, delay_ms = delay.as_millis() as u64,
                        "retriable openai error, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    bail!("openai error {status}: {text}");
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = retry_delay(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64,
                        "openai transport error, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("openai request failed"));
                }
            }
        }
    }
}

fn retriable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// 500ms base, doubled per attempt, capped at 8s.
fn retry_delay(attempt: u32) -> Duration {
    let ms = 500u64.saturating_mul(1 << attempt.min(4));
    Duration::from_millis(ms.min(8_000))
}

/// Reasoning models reject sampling parameters.
fn reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5")
}

/// Render the transcript into OpenAI wire messages.
///
/// Tool results keep their `tool` role and `tool_call_id`; a single text or
/// JSON part is sent as a plain content string, anything richer as a content
/// part array.  Managed-file parts that were never materialized into data
/// URLs are dropped with a warning rather than leaking local paths.
fn build_wire_messages(messages: &[AgentMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::Tool => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.as_deref().unwrap_or_default(),
                    "content": render_tool_content(&m.parts),
                }));
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect();
                let mut msg = json!({ "role": "assistant", "tool_calls": calls });
                if let Some(text) = m.text() {
                    msg["content"] = json!(text);
                }
                out.push(msg);
            }
            _ => {
                out.push(json!({
                    "role": m.role.as_str(),
                    "content": render_content(&m.parts),
                }));
            }
        }
    }
    out
}

/// Content for system/user/assistant messages: plain string when the message
/// is text-only, otherwise an array of typed content parts.
fn render_content(parts: &[MessagePart]) -> Value {
    if parts.iter().all(|p| matches!(p, MessagePart::Text { .. })) {
        let text: Vec<&str> = parts.iter().filter_map(|p| p.as_text()).collect();
        return json!(text.join("\n"));
    }

    let mut rendered = Vec::new();
    for part in parts {
        match part {
            MessagePart::Text { text } => rendered.push(json!({ "type": "text", "text": text })),
            MessagePart::Json { value } => {
                rendered.push(json!({ "type": "text", "text": value.to_string() }))
            }
            MessagePart::Image { source, .. } => match source {
                PartSource::DataUrl { url } => {
                    rendered.push(json!({ "type": "image_url", "image_url": { "url": url } }))
                }
                PartSource::ManagedFile { path } => {
                    warn!(path = %path, "dropping unmaterialized managed image part");
                }
            },
            MessagePart::File { source, filename, .. } => match source {
                PartSource::DataUrl { url } => rendered.push(json!({
                    "type": "file",
                    "file": {
                        "filename": filename.as_deref().unwrap_or("attachment"),
                        "file_data": url,
                    }
                })),
                PartSource::ManagedFile { path } => {
                    warn!(path = %path, "dropping unmaterialized managed file part");
                }
            },
        }
    }
    json!(rendered)
}

/// Tool message content is always a string on the wire: a lone JSON part is
/// serialized compactly, a lone text part passes through, and anything else
/// is serialized as a JSON array of parts.
fn render_tool_content(parts: &[MessagePart]) -> String {
    match parts {
        [MessagePart::Json { value }] => value.to_string(),
        [MessagePart::Text { text }] => text.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn parse_step_outcome(v: &Value) -> anyhow::Result<StepOutcome> {
    let message = v["choices"]
        .get(0)
        .map(|c| &c["message"])
        .context("no choices in model response")?;

    let text = message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                warn!("skipping tool call without a function name");
                continue;
            }
            tool_calls.push(ToolCallRequest {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: name.to_string(),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or("{}")
                    .to_string(),
            });
        }
    }

    let usage = TokenUsage {
        input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(StepOutcome { text, tool_calls, usage })
}

// ─────────────────────────── Unit tests ───────────────────────────
