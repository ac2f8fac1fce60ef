// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use anyhow::bail;

use crate::provider::ModelProvider;
use crate::types::{Role, StepOutcome, StepRequest};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn step(&self, req: StepRequest) -> anyhow::Result<StepOutcome> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .and_then(|m| m.text())
            .unwrap_or_else(|| "[no input]".into());
        Ok(StepOutcome::text(format!("MOCK: {reply}")).with_usage(10, 10))
    }
}

enum ScriptedStep {
    Respond(StepOutcome),
    Fail(String),
}

/// A pre-scripted provider.  Each call to `step` pops the next outcome from
/// the front of the queue.  This lets tests specify exact step sequences –
/// including tool calls and failures – without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<ScriptedStep>>,
    /// Every [`StepRequest`] seen by this provider, in call order.
    /// Written on each `step()` call so tests can inspect what was sent.
    pub requests: Arc<Mutex<Vec<StepRequest>>>,
    /// Artificial latency per step, for deadline tests.
    delay: Option<Duration>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of step outcomes.
    pub fn new(outcomes: Vec<StepOutcome>) -> Self {
        Self {
            scripts: Mutex::new(outcomes.into_iter().map(ScriptedStep::Respond).collect()),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Convenience: provider that returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![StepOutcome::text(reply).with_usage(5, 5)])
    }

    /// Convenience: provider that returns a tool call followed by a text
    /// reply on the next step.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            StepOutcome::tool_call(tool_id, tool_name, args_json),
            StepOutcome::text(final_text).with_usage(5, 5),
        ])
    }

    /// Convenience: provider whose first step fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            scripts: Mutex::new(vec![ScriptedStep::Fail(message.into())]),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering each step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The most recent request, cloned out of the capture log.
    pub fn last_request(&self) -> Option<StepRequest> {
        self.requests.lock().ok().and_then(|reqs| reqs.last().cloned())
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn step(&self, req: StepRequest) -> anyhow::Result<StepOutcome> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(req);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = {
            let mut scripts = match self.scripts.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                None
            } else {
                Some(scripts.remove(0))
            }
        };
        match next {
            Some(ScriptedStep::Respond(outcome)) => Ok(outcome),
            Some(ScriptedStep::Fail(message)) => bail!("{message}"),
            None => Ok(StepOutcome::text("[no more scripts]")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentMessage, StepParams};

    fn req(text: &str) -> StepRequest {
        StepRequest {
            messages: vec![AgentMessage::user(text)],
            tools: vec![],
            params: StepParams::default(),
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let out = p.step(req("hi")).await.unwrap();
        assert_eq!(out.text.as_deref(), Some("MOCK: hi"));
        assert_eq!(out.usage.total(), 20);
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let p = ScriptedProvider::always_text("hello world");
        let out = p.step(req("hi")).await.unwrap();
        assert_eq!(out.text.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let p = ScriptedProvider::tool_then_text("call-1", "clock", "{}", "done");

        let first = p.step(req("what time is it")).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "clock");

        let second = p.step(req("what time is it")).await.unwrap();
        assert_eq!(second.text.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let out = p.step(req("hi")).await.unwrap();
        assert_eq!(out.text.as_deref(), Some("[no more scripts]"));
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_as_error() {
        let p = ScriptedProvider::failing("connection reset");
        let err = p.step(req("hi")).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn scripted_captures_requests_in_order() {
        let p = ScriptedProvider::new(vec![
            StepOutcome::text("one"),
            StepOutcome::text("two"),
        ]);
        p.step(req("first")).await.unwrap();
        p.step(req("second")).await.unwrap();

        let captured = p.requests.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].messages[0].text().as_deref(), Some("first"));
        assert_eq!(captured[1].messages[0].text().as_deref(), Some("second"));
    }
}
