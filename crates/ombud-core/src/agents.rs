// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Specialist agent definitions and the registry that holds them.
//!
//! Definitions are validated and frozen at load time; a conflicting tool
//! policy or a duplicate name fails the whole load rather than serving a
//! partially wrong roster.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use ombud_config::AgentDefConfig;
use ombud_model::StepParams;
use ombud_tools::{PolicyError, ToolPolicy};

#[derive(Debug, Error)]
pub enum AgentLoadError {
    #[error("duplicate agent name '{0}'")]
    DuplicateName(String),
    #[error("invalid tool policy for agent '{name}'")]
    Policy {
        name: String,
        #[source]
        source: PolicyError,
    },
    #[error("agent definition is missing a name")]
    MissingName,
}

/// Immutable definition of one specialist agent.  Built once at startup;
/// changing a definition requires a restart.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    /// When to delegate to this agent.
    pub description: String,
    pub system_prompt: String,
    /// Provider override; `None` falls back to the global default.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_new_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub max_tool_iterations: u32,
    pub policy: ToolPolicy,
    pub enabled: bool,
}

impl AgentSpec {
    pub fn from_config(def: &AgentDefConfig) -> Result<Self, AgentLoadError> {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(AgentLoadError::MissingName);
        }
        let policy = ToolPolicy::new(&def.tools_allow, &def.tools_deny, &def.servers)
            .map_err(|source| AgentLoadError::Policy {
                name: name.to_string(),
                source,
            })?;
        Ok(Self {
            name: name.to_string(),
            description: def.description.clone(),
            system_prompt: def.system_prompt.clone(),
            provider: def.provider.clone(),
            model: def.model.clone(),
            temperature: def.temperature,
            max_new_tokens: def.max_new_tokens,
            reasoning_effort: def.reasoning_effort.clone(),
            max_tool_iterations: def.max_tool_iterations,
            policy,
            enabled: def.enabled,
        })
    }

    /// Per-step sampling overrides for this agent.  Unset fields fall back
    /// to the provider's own defaults.
    pub fn step_params(&self) -> StepParams {
        StepParams {
            temperature: self.temperature,
            max_new_tokens: self.max_new_tokens,
            reasoning_effort: self.reasoning_effort.clone(),
            response_schema: None,
        }
    }
}

/// Roster of enabled specialists, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentSpec>,
}

impl AgentRegistry {
    /// Validate and load all definitions.  Disabled specs are skipped; a
    /// duplicate name among enabled specs is a hard configuration error,
    /// never a silent override.
    pub fn load(definitions: &[AgentDefConfig]) -> Result<Self, AgentLoadError> {
        let mut agents = BTreeMap::new();
        for def in definitions {
            if !def.enabled {
                debug!(agent = %def.name, "skipping disabled agent definition");
                continue;
            }
            let spec = AgentSpec::from_config(def)?;
            if agents.contains_key(&spec.name) {
                return Err(AgentLoadError::DuplicateName(spec.name));
            }
            agents.insert(spec.name.clone(), spec);
        }
        Ok(Self { agents })
    }

    pub fn get(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.get(name)
    }

    /// Enabled specs in name order.
    pub fn list(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.values()
    }

    /// Tool policies of every registered specialist, for ownership-mode
    /// reservation.
    pub fn policies(&self) -> Vec<ToolPolicy> {
        self.agents.values().map(|s| s.policy.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
