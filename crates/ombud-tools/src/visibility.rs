// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-agent tool visibility.
//!
//! `resolve` is a pure function from (catalog, policy) to the view an agent
//! may call.  The default with no policy at all is fail-closed: no local
//! tools, no server tools.

use std::collections::BTreeSet;

use regex::Regex;
use thiserror::Error;

use ombud_config::OwnershipMode;

use crate::ToolRegistry;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("only one of tools_allow or tools_deny can be set")]
    AllowDenyConflict,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    raw: String,
    regex: Regex,
}

/// Compiled visibility policy for one agent.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allow: Vec<CompiledPattern>,
    deny: Vec<CompiledPattern>,
    servers: Vec<String>,
}

impl ToolPolicy {
    /// Compile a policy from raw config lists.  `allow` and `deny` are
    /// mutually exclusive; supplying both is a configuration error.
    pub fn new(allow: &[String], deny: &[String], servers: &[String]) -> Result<Self, PolicyError> {
        if !allow.is_empty() && !deny.is_empty() {
            return Err(PolicyError::AllowDenyConflict);
        }
        Ok(Self {
            allow: compile(allow),
            deny: compile(deny),
            servers: servers.to_vec(),
        })
    }

    /// True when `name` appears literally in the allow list.  Wildcard
    /// patterns do not count; this is the escape hatch for intentionally
    /// granting `invoke_agent` to a specialist.
    pub fn explicitly_allows(&self, name: &str) -> bool {
        self.allow.iter().any(|p| p.raw == name)
    }

    fn allows_local(&self, name: &str) -> bool {
        if !self.allow.is_empty() {
            return self.allow.iter().any(|p| p.regex.is_match(name));
        }
        if !self.deny.is_empty() {
            return !self.deny.iter().any(|p| p.regex.is_match(name));
        }
        false
    }

    fn allows_server(&self, server: &str) -> bool {
        self.servers.iter().any(|s| s == server)
    }
}

fn compile(patterns: &[String]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter_map(|p| {
            glob_to_regex(p).map(|regex| CompiledPattern { raw: p.clone(), regex })
        })
        .collect()
}

/// Convert a simple glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Resolve the set of tools `policy` exposes out of `catalog`.
///
/// Allow/deny patterns apply to local tools only; server-bridged tools are
/// governed purely by `server_scope` membership.
pub fn resolve(catalog: &ToolRegistry, policy: &ToolPolicy) -> ToolRegistry {
    let mut view = ToolRegistry::new();
    for (name, entry) in catalog.iter() {
        let visible = match &entry.server {
            Some(server) => policy.allows_server(server),
            None => policy.allows_local(name),
        };
        if visible {
            // Entries are cloned wholesale so the view keeps the trust flag
            // and server scope decided at registration.
            view.insert_entry(entry.clone());
        }
    }
    view
}

/// The main agent's view: its own policy resolved against the catalog, then
/// reduced by the ownership mode.
///
/// `exclusive` removes every tool any specialist resolves to (reachable only
/// via delegation); `exclusive_mcp` removes only the server-bridged ones.
pub fn main_agent_view(
    catalog: &ToolRegistry,
    main_policy: &ToolPolicy,
    specialist_policies: &[ToolPolicy],
    mode: OwnershipMode,
) -> ToolRegistry {
    let mut view = resolve(catalog, main_policy);
    if mode == OwnershipMode::Shared {
        return view;
    }

    let mut reserved: BTreeSet<String> = BTreeSet::new();
    for policy in specialist_policies {
        reserved.extend(resolve(catalog, policy).names());
    }
    for name in reserved {
        let bridged = view.get(&name).map_or(false, |e| e.server.is_some());
        if mode == OwnershipMode::Exclusive || bridged {
            view.remove(&name);
        }
    }
    view
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
