// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent runtime and delegation core.
//!
//! The runtime drives one agent through a bounded tool-calling loop; the
//! delegation broker lets the main agent hand a task to a specialist for a
//! single hop; the dispatcher ties both to the tool catalog and reports the
//! final answer plus a delegation trace.

mod agents;
mod answer;
mod defs;
mod delegation;
mod dispatcher;
mod runtime;
mod state;
mod tests;
mod trace;
mod util;

pub use agents::{AgentLoadError, AgentRegistry, AgentSpec};
pub use answer::{assistant_response_schema, extract_answer, AssistantAnswer};
pub use defs::{load_agent_dir, merge_definitions};
pub use delegation::{
    wire_delegation, AgentProviderFactory, DelegationBroker, DelegationOutcome,
    FixedProviderFactory,
};
pub use dispatcher::{Dispatcher, Request, Response};
pub use runtime::{
    AgentRuntime, DirectivePolicy, RunResult, RunState, RuntimeLimits,
};
pub use state::AgentState;
pub use trace::{DelegationTrace, TraceEntry};
pub use util::redact_sensitive_args;
