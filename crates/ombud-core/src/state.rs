// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use ombud_model::{AgentMessage, Role};

/// The transcript an agent runs against.  Owned by one run at a time; the
/// runtime appends to it and hands it back in the result.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub messages: Vec<AgentMessage>,
}

impl AgentState {
    pub fn new(messages: Vec<AgentMessage>) -> Self {
        Self { messages }
    }

    /// Seed a fresh state: system prompt, prior history, then the new user
    /// input.
    pub fn seeded(
        system_prompt: &str,
        history: Vec<AgentMessage>,
        user_text: &str,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(AgentMessage::system(system_prompt));
        messages.extend(history);
        messages.push(AgentMessage::user(user_text));
        Self { messages }
    }

    pub fn push(&mut self, message: AgentMessage) {
        self.messages.push(message);
    }

    /// Text of the most recent assistant message that carries any, scanning
    /// backwards.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| m.text())
    }

    /// Number of tool-result messages in the transcript.
    pub fn tool_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
