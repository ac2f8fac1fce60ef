// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Structured assistant envelope.
//!
//! Runs ask the model for `{ answer: { kind, content },
//! should_answer_to_user }` so the caller can distinguish renderable answers
//! from deliberate silence.  Models do not always comply, so extraction is
//! lenient: bare JSON, fenced JSON, then plain text.

use serde_json::{json, Value};

/// A parsed assistant envelope, or its plain-text degradation.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantAnswer {
    /// One of "text", "markdown", "html", "json".
    pub kind: String,
    pub content: String,
    pub should_answer_to_user: bool,
}

impl AssistantAnswer {
    fn plain(content: &str) -> Self {
        Self {
            kind: "text".into(),
            content: content.trim().to_string(),
            should_answer_to_user: true,
        }
    }
}

/// JSON schema for the assistant envelope, passed as the response schema on
/// every run that wants structured answers.
pub fn assistant_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "answer": {
                "type": "object",
                "properties": {
                    "kind": { "type": "string", "enum": ["text", "html", "markdown", "json"] },
                    "content": { "type": "string" },
                },
                "required": ["kind", "content"],
                "additionalProperties": false,
            },
            "should_answer_to_user": { "type": "boolean" },
        },
        "required": ["answer", "should_answer_to_user"],
        "additionalProperties": false,
    })
}

/// Parse a final assistant message into an [`AssistantAnswer`].
///
/// Tries the raw text as JSON, then the contents of a ``` fence.  Anything
/// that does not yield an envelope with non-empty `answer.content` degrades
/// to a plain-text answer of the whole message.
pub fn extract_answer(raw: &str) -> AssistantAnswer {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return AssistantAnswer::plain("");
    }

    let mut candidates = vec![trimmed];
    if let Some(inner) = strip_code_fence(trimmed) {
        candidates.push(inner);
    }

    for candidate in candidates {
        if let Some(answer) = parse_envelope(candidate) {
            return answer;
        }
    }
    AssistantAnswer::plain(trimmed)
}

fn parse_envelope(candidate: &str) -> Option<AssistantAnswer> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let answer = value.get("answer")?;
    let content = answer.get("content")?.as_str()?.trim();
    if content.is_empty() {
        return None;
    }
    let kind = answer
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| matches!(*k, "text" | "markdown" | "html" | "json"))
        .unwrap_or("text");
    let should = value
        .get("should_answer_to_user")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    Some(AssistantAnswer {
        kind: kind.to_string(),
        content: content.to_string(),
        should_answer_to_user: should,
    })
}

/// Contents of a leading ``` fence (with optional language tag), if the text
/// is fenced.
fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    let inner = body.trim_end().strip_suffix("```").unwrap_or(body);
    Some(inner.trim())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
