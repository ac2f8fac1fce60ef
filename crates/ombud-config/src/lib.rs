// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Configuration schema and layered loader for ombud.
//!
//! Configuration is merged from TOML files found at well-known locations
//! (system, user, workspace), with an optional explicit `--config` layer on
//! top.  See [`loader::load`] for the search order.

mod loader;
mod schema;

pub use loader::load;
pub use schema::{
    AgentDefConfig, AgentsConfig, Config, DelegationConfig, MainAgentConfig, ModelConfig,
    OwnershipMode, RequireToolUse, RuntimeConfig, ToolsConfig,
};
