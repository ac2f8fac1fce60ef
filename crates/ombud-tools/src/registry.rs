// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use ombud_model::ToolSchema;

use crate::Tool;

/// One registered tool binding.
///
/// `trusted` and `server` are snapshotted at registration time; a tool cannot
/// promote itself afterwards.
#[derive(Clone)]
pub struct ToolEntry {
    pub tool: Arc<dyn Tool>,
    /// Whether directives from this tool are applied to the transcript.
    pub trusted: bool,
    /// External tool server this binding came from (`None` = local).
    pub server: Option<String>,
}

/// Registry of tool bindings, keyed by tool name.
///
/// The full catalog is built once at startup; per-agent views are produced
/// from it with [`crate::resolve`], which clones the relevant entries.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untrusted tool.  Its directives are recorded as opaque
    /// data, never applied.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.insert(Arc::new(tool), false);
    }

    /// Register a trusted tool whose directives the runtime applies.
    pub fn register_trusted(&mut self, tool: impl Tool + 'static) {
        self.insert(Arc::new(tool), true);
    }

    fn insert(&mut self, tool: Arc<dyn Tool>, trusted: bool) {
        let name = tool.name().to_string();
        let server = tool.server_scope().map(str::to_string);
        if self.entries.contains_key(&name) {
            warn!(tool = %name, "re-registering tool, previous binding replaced");
        }
        self.entries.insert(name, ToolEntry { tool, trusted, server });
    }

    /// Insert a pre-built entry, keeping its trust flag and server scope.
    pub(crate) fn insert_entry(&mut self, entry: ToolEntry) {
        self.entries.insert(entry.tool.name().to_string(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ToolEntry> {
        self.entries.remove(name)
    }

    /// Registered tool names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries
            .values()
            .map(|e| ToolSchema {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ToolEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
