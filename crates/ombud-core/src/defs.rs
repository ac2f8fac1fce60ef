// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Specialist definitions loaded from markdown files.
//!
//! Each specialist is a markdown file with optional YAML frontmatter; the
//! body after the closing `---` fence becomes the system prompt:
//!
//! ```markdown
//! ---
//! name: sql-analyst
//! description: Writes and checks SQL. Use for database questions.
//! tools_allow: ["db_*"]
//! max_tool_iterations: 6
//! ---
//!
//! You are a careful SQL analyst.
//! ```
//!
//! `name` defaults to the filename stem and `description` to the first
//! non-empty body line.  Files over the size cap and files with broken
//! frontmatter are skipped with a warning; they never abort startup.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use ombud_config::AgentDefConfig;

const MAX_DEF_FILE_BYTES: u64 = 256 * 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DefFrontmatter {
    name: Option<String>,
    description: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_new_tokens: Option<u32>,
    reasoning_effort: Option<String>,
    max_tool_iterations: Option<u32>,
    tools_allow: Vec<String>,
    tools_deny: Vec<String>,
    servers: Vec<String>,
    enabled: Option<bool>,
}

/// Parse one raw definition file into an [`AgentDefConfig`].
///
/// A file without frontmatter is all system prompt; the description is then
/// synthesised from the first non-empty line.
fn parse_def_file(raw: &str, stem: &str, path: &Path) -> Option<AgentDefConfig> {
    let rest = raw.trim_start_matches('\n');

    let (fm, body) = if let Some(after_open) = rest.strip_prefix("---") {
        let close = after_open.find("\n---")?;
        let yaml_block = &after_open[..close];
        let body = after_open[close + 4..].trim_start_matches('\n').to_string();

        let fm: DefFrontmatter = match serde_yaml::from_str(yaml_block) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse agent frontmatter, skipping");
                return None;
            }
        };
        (fm, body)
    } else {
        (DefFrontmatter::default(), rest.to_string())
    };

    let description = fm
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            body.lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .trim_start_matches('#')
                .trim()
                .to_string()
        });
    if description.is_empty() {
        warn!(path = %path.display(), "agent definition has no description, skipping");
        return None;
    }

    let name = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| stem.to_string());

    Some(AgentDefConfig {
        name,
        description,
        system_prompt: body.trim().to_string(),
        provider: fm.provider,
        model: fm.model,
        temperature: fm.temperature,
        max_new_tokens: fm.max_new_tokens,
        reasoning_effort: fm.reasoning_effort,
        max_tool_iterations: fm.max_tool_iterations.unwrap_or(8),
        tools_allow: fm.tools_allow,
        tools_deny: fm.tools_deny,
        servers: fm.servers,
        enabled: fm.enabled.unwrap_or(true),
    })
}

fn try_load_def(path: &Path) -> Option<AgentDefConfig> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_DEF_FILE_BYTES {
        warn!(
            path = %path.display(),
            size,
            max = MAX_DEF_FILE_BYTES,
            "skipping oversized agent definition"
        );
        return None;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("agent");

    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read agent definition");
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }

    parse_def_file(&raw, stem, path)
}

/// Recursively load every `.md` definition under `dir`, in path order.
///
/// A missing directory is not an error; it just yields nothing.
pub fn load_agent_dir(dir: &Path) -> Vec<AgentDefConfig> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "agent definition directory absent");
        return Vec::new();
    }

    let mut paths: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("md"))
        .collect();
    paths.sort();

    let defs: Vec<AgentDefConfig> = paths.iter().filter_map(|p| try_load_def(p)).collect();
    debug!(dir = %dir.display(), count = defs.len(), "loaded agent definitions");
    defs
}

/// Combine inline config definitions with discovered files.  Inline entries
/// come first; a name collision between the two sources surfaces as a
/// duplicate-name error at registry load, never a silent override.
pub fn merge_definitions(
    inline: Vec<AgentDefConfig>,
    discovered: Vec<AgentDefConfig>,
) -> Vec<AgentDefConfig> {
    let mut merged = inline;
    merged.extend(discovered);
    merged
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
