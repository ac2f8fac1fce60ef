// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message, part, and step-exchange types shared by the runtime and the
//! providers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Where the bytes of an image/file part come from.
///
/// `ManagedFile` is a reference into the managed-files root that the runtime
/// materializes into a `DataUrl` before the next model step; providers skip
/// unmaterialized references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartSource {
    ManagedFile { path: String },
    DataUrl { url: String },
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Json {
        value: Value,
    },
    Image {
        source: PartSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
    File {
        source: PartSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    pub fn json(value: Value) -> Self {
        MessagePart::Json { value }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool-call request as produced by the model.  `arguments` is the raw JSON
/// string from the wire; parsing and repair happen at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One message in an agent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    /// Tool name, set on `Role::Tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Call id this tool result answers, set on `Role::Tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls requested by an assistant step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Name of the trusted tool whose directive appended this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tool: Option<String>,
}

impl AgentMessage {
    fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![MessagePart::text(text)],
            tool_name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            source_tool: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text)
    }

    /// Assistant message carrying tool-call requests, with optional preamble
    /// text.
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        let parts = match text {
            Some(t) if !t.is_empty() => vec![MessagePart::text(t)],
            _ => Vec::new(),
        };
        Self {
            role: Role::Assistant,
            parts,
            tool_name: None,
            tool_call_id: None,
            tool_calls: calls,
            source_tool: None,
        }
    }

    /// Tool-result message answering `call_id`.
    pub fn tool_result(name: impl Into<String>, call_id: impl Into<String>, value: Value) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![MessagePart::json(value)],
            tool_name: Some(name.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
            source_tool: None,
        }
    }

    /// Tool-result message carrying plain text.
    pub fn tool_result_text(
        name: impl Into<String>,
        call_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![MessagePart::text(text)],
            tool_name: Some(name.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
            source_tool: None,
        }
    }

    /// Joined text content, or None when the message has no text parts.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self.parts.iter().filter_map(|p| p.as_text()).collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }
}

/// JSON-schema description of one callable tool, as sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Sampling and shaping parameters for one step.  Unset fields are omitted
/// from the provider request entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    pub temperature: Option<f32>,
    pub max_new_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    /// JSON schema the final assistant message must conform to.
    pub response_schema: Option<Value>,
}

/// One model step: current transcript plus the tools visible to this agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub messages: Vec<AgentMessage>,
    pub tools: Vec<ToolSchema>,
    pub params: StepParams,
}

/// What the model returned for one step: final text, tool-call requests, or
/// both (preamble text alongside calls).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

impl StepOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
