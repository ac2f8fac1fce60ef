// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model provider abstraction for ombud.
//!
//! A provider turns one [`StepRequest`] (messages + visible tool schemas +
//! sampling params) into one [`StepOutcome`] (assistant text and/or tool-call
//! requests plus usage).  Retry policy for transient transport failures lives
//! inside the provider; callers treat a returned error as exhausted.

mod mock;
mod openai;
mod provider;
mod types;

use std::sync::Arc;

use anyhow::bail;
use ombud_config::ModelConfig;

pub use mock::{MockProvider, ScriptedProvider};
pub use openai::OpenAiProvider;
pub use provider::ModelProvider;
pub use types::{
    AgentMessage, MessagePart, PartSource, Role, StepOutcome, StepParams, StepRequest,
    TokenUsage, ToolCallRequest, ToolSchema,
};

/// Build a provider from configuration.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::from_config(cfg)?)),
        "mock" => Ok(Arc::new(MockProvider)),
        other => bail!("unknown model provider '{other}'"),
    }
}

/// Resolve the API key for a provider config: explicit key first, then the
/// configured environment variable, then `OPENAI_API_KEY`.
pub fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(key) = cfg.api_key.as_deref() {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    let var = cfg.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
    std::env::var(var).ok().filter(|v| !v.is_empty())
}
