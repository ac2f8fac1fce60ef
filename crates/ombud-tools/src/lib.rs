// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool abstraction for ombud: callable tools, the registry that holds them,
//! and the visibility resolver that decides which tools an agent may see.
//!
//! Trust is a property of *registration*, not of the tool type: only tools
//! registered through [`ToolRegistry::register_trusted`] may steer the runtime
//! with [`Directive`]s.  Everything else is data.

mod builtin;
mod registry;
mod tool;
mod visibility;

pub use builtin::{AttachFileTool, CurrentTimeTool};
pub use registry::{ToolEntry, ToolRegistry};
pub use tool::{
    optional_str_arg, require_str_arg, Directive, Tool, ToolCall, ToolContext, ToolPayload,
    ToolResult,
};
pub use visibility::{main_agent_view, resolve, PolicyError, ToolPolicy};
