// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Serde default helper returning `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" (any OpenAI-compatible endpoint via
    /// `base_url`) or "mock" for offline runs.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name forwarded to the provider API
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or compatible gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_new_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Reasoning effort hint ("low" | "medium" | "high") for models that
    /// accept one.  Omitted from the request when unset.
    pub reasoning_effort: Option<String>,
    /// Transient-failure retries inside the provider client before an error
    /// surfaces to the runtime
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model_name() -> String {
    "gpt-4o".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            name: default_model_name(),
            // api_key_env stays None here; resolve_api_key() falls back to
            // OPENAI_API_KEY when neither key field is set.
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_new_tokens: Some(4096),
            temperature: Some(0.2),
            reasoning_effort: None,
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum model-step iterations per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Maximum total tool invocations per run
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    /// Wall-clock timeout for one run, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// System prompt for the main agent; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Root directory for managed files that trusted directives may inline
    /// into model context.  `~` expands to the home directory.  When unset,
    /// file-inlining directives are refused.
    #[serde(default)]
    pub managed_files_root: Option<String>,
    /// Allow trusted directives to append system-role messages.  Off by
    /// default: a tool that can insert system messages can rewrite the
    /// agent's instructions.
    #[serde(default)]
    pub allow_system_inserts: bool,
}

fn default_max_steps() -> u32 {
    8
}
fn default_max_tool_calls() -> u32 {
    12
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_calls: default_max_tool_calls(),
            timeout_secs: default_timeout_secs(),
            system_prompt: None,
            managed_files_root: None,
            allow_system_inserts: false,
        }
    }
}

impl RuntimeConfig {
    /// Managed-files root with `~` expanded, when configured.
    pub fn expanded_managed_files_root(&self) -> Option<std::path::PathBuf> {
        self.managed_files_root
            .as_deref()
            .map(|raw| std::path::PathBuf::from(shellexpand::tilde(raw).into_owned()))
    }
}

/// Who may see tools that are also scoped to a specialist agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipMode {
    /// Specialist-scoped tools stay visible to the main agent too.
    #[default]
    Shared,
    /// Every tool any specialist resolves is hidden from the main agent and
    /// reachable only through delegation.
    Exclusive,
    /// Like `exclusive`, but only for server-scoped tools; local tools stay
    /// shared.
    ExclusiveMcp,
}

impl std::fmt::Display for OwnershipMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnershipMode::Shared => write!(f, "shared"),
            OwnershipMode::Exclusive => write!(f, "exclusive"),
            OwnershipMode::ExclusiveMcp => write!(f, "exclusive_mcp"),
        }
    }
}

/// When a delegated specialist must make at least one tool call before its
/// answer is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequireToolUse {
    /// Require tool use only when the specialist actually has visible tools.
    #[default]
    Auto,
    Always,
    Never,
}

impl std::fmt::Display for RequireToolUse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequireToolUse::Auto => write!(f, "auto"),
            RequireToolUse::Always => write!(f, "always"),
            RequireToolUse::Never => write!(f, "never"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Master switch for specialist agents.  When false the registry loads
    /// empty and the delegation tools are not registered.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory scanned recursively for agent definition files (markdown
    /// with YAML frontmatter).  `~` expands to the home directory.
    #[serde(default)]
    pub dir: Option<String>,
    /// Inline agent definitions; merged with file-based definitions under the
    /// same duplicate-name rules.
    #[serde(default)]
    pub definitions: Vec<AgentDefConfig>,
    /// Tool ownership mode for the main agent (see [`OwnershipMode`]).
    #[serde(default)]
    pub ownership: OwnershipMode,
    #[serde(default)]
    pub main: MainAgentConfig,
    #[serde(default)]
    pub delegation: DelegationConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            definitions: Vec::new(),
            ownership: OwnershipMode::Shared,
            main: MainAgentConfig::default(),
            delegation: DelegationConfig::default(),
        }
    }
}

impl AgentsConfig {
    /// Agents directory with `~` expanded, when configured.
    pub fn expanded_dir(&self) -> Option<std::path::PathBuf> {
        self.dir
            .as_deref()
            .map(|raw| std::path::PathBuf::from(shellexpand::tilde(raw).into_owned()))
    }
}

/// Tool policy for the main agent.  The visibility resolver is fail-closed,
/// so the default grants everything explicitly with `["*"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainAgentConfig {
    /// Glob patterns of local tools the main agent may call.  Mutually
    /// exclusive with `tools_deny`.
    #[serde(default = "default_main_allow")]
    pub tools_allow: Vec<String>,
    /// Glob patterns of local tools hidden from the main agent.  Mutually
    /// exclusive with `tools_allow`.
    #[serde(default)]
    pub tools_deny: Vec<String>,
    /// External tool servers whose tools the main agent may call.  Empty
    /// means none.
    #[serde(default)]
    pub servers: Vec<String>,
}

fn default_main_allow() -> Vec<String> {
    vec!["*".into()]
}

impl Default for MainAgentConfig {
    fn default() -> Self {
        Self {
            tools_allow: default_main_allow(),
            tools_deny: Vec::new(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Outer wall-clock cap on one delegation, in seconds.  The nested
    /// runtime additionally enforces its own limits.
    #[serde(default = "default_delegation_timeout_secs")]
    pub timeout_secs: u64,
    /// Tool-use requirement applied to delegated runs.
    #[serde(default)]
    pub require_tool_use: RequireToolUse,
}

fn default_delegation_timeout_secs() -> u64 {
    120
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delegation_timeout_secs(),
            require_tool_use: RequireToolUse::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools whose directive outputs the runtime applies.  Every other tool's
    /// directives are treated as opaque data.  Decided at registration time.
    #[serde(default = "default_directive_allow")]
    pub directive_allow: Vec<String>,
}

fn default_directive_allow() -> Vec<String> {
    vec!["attach_file".into()]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            directive_allow: default_directive_allow(),
        }
    }
}

/// One agent definition, inline in config or as YAML frontmatter of a
/// definition file (the body of the file becomes `system_prompt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefConfig {
    pub name: String,
    /// When to delegate to this agent; shown to the main agent via
    /// `list_agents`.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Provider override; falls back to the global model provider.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override; falls back to the global model name.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_new_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Bound on this agent's model-step iterations when delegated to.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Glob patterns of local tools this agent may call.  Mutually exclusive
    /// with `tools_deny`; setting both fails the registry load.
    #[serde(default)]
    pub tools_allow: Vec<String>,
    #[serde(default)]
    pub tools_deny: Vec<String>,
    /// External tool servers this agent may use.  Empty means none.
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_tool_iterations() -> u32 {
    8
}

impl Default for AgentDefConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            system_prompt: String::new(),
            provider: None,
            model: None,
            temperature: None,
            max_new_tokens: None,
            reasoning_effort: None,
            max_tool_iterations: default_max_tool_iterations(),
            tools_allow: Vec::new(),
            tools_deny: Vec::new(),
            servers: Vec::new(),
            enabled: true,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
