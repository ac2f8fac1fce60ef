mod cli;

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use ombud_config::{Config, ModelConfig, ToolsConfig};
use ombud_core::{
    load_agent_dir, merge_definitions, wire_delegation, AgentProviderFactory, AgentRegistry,
    AgentSpec, DelegationBroker, Dispatcher, Request, RunState,
};
use ombud_model::ModelProvider;
use ombud_tools::{AttachFileTool, CurrentTimeTool, ToolPolicy, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = ombud_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask { text, timeout, trace } => ask(config, text, timeout, trace).await,
        Commands::Agents => list_agents_cmd(&config),
        Commands::Tools => list_tools_cmd(&config),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Run one request through the dispatcher and print the answer to stdout.
async fn ask(
    mut config: Config,
    text: Option<String>,
    timeout: Option<u64>,
    show_trace: bool,
) -> anyhow::Result<()> {
    if let Some(secs) = timeout {
        config.runtime.timeout_secs = secs;
    }

    let user_text = match text {
        Some(t) => t,
        None => read_stdin()?,
    };
    if user_text.trim().is_empty() {
        anyhow::bail!("no request text given; pass TEXT or pipe it on stdin");
    }

    let provider = ombud_model::from_config(&config.model)?;
    let (catalog, policies) = build_catalog(&config)?;
    let dispatcher = Dispatcher::new(&config, provider, catalog, policies)?;

    let response = dispatcher.handle(Request::new(user_text)).await;

    if let Some(error) = &response.error {
        eprintln!("error: {error}");
    }
    if response.should_reply {
        println!("{}", response.answer.content);
    }
    if show_trace && !response.trace.is_empty() {
        eprintln!("{}", serde_json::to_string_pretty(&response.trace)?);
    }

    if response.termination == RunState::DoneError {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the specialist roster to stdout.
fn list_agents_cmd(config: &Config) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    if registry.is_empty() {
        println!("No specialist agents configured.");
        println!("Add [[agents.definitions]] to the config or set agents.dir.");
        return Ok(());
    }

    let name_w = registry.list().map(|s| s.name.len()).max().unwrap_or(8).max(8);
    println!("{:<name_w$}  {:>5}  DESCRIPTION", "NAME", "ITERS");
    println!("{}", "-".repeat(name_w + 50));
    for spec in registry.list() {
        println!(
            "{:<name_w$}  {:>5}  {}",
            spec.name, spec.max_tool_iterations, spec.description
        );
    }
    println!("\nTotal: {} agent(s)", registry.len());
    Ok(())
}

/// Print the full tool catalog, including the delegation tools when any
/// specialist is configured.
fn list_tools_cmd(config: &Config) -> anyhow::Result<()> {
    let (catalog, _) = build_catalog(config)?;
    if catalog.is_empty() {
        println!("No tools registered.");
        return Ok(());
    }

    let name_w = catalog
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(8)
        .max(8);
    println!("{:<name_w$}  {:<7}  {:<7}  DESCRIPTION", "NAME", "SCOPE", "TRUST");
    println!("{}", "-".repeat(name_w + 60));
    for (name, entry) in catalog.iter() {
        let scope = entry.server.as_deref().unwrap_or("local");
        let trust = if entry.trusted { "trusted" } else { "-" };
        println!(
            "{:<name_w$}  {:<7}  {:<7}  {}",
            name,
            scope,
            trust,
            entry.tool.description()
        );
    }
    println!("\nTotal: {} tool(s)", catalog.len());
    Ok(())
}

/// Merge inline and file-based agent definitions into a validated registry.
fn load_registry(config: &Config) -> anyhow::Result<AgentRegistry> {
    if !config.agents.enabled {
        return Ok(AgentRegistry::default());
    }
    let discovered = match config.agents.expanded_dir() {
        Some(dir) => load_agent_dir(&dir),
        None => Vec::new(),
    };
    let defs = merge_definitions(config.agents.definitions.clone(), discovered);
    AgentRegistry::load(&defs).context("loading agent definitions")
}

/// Build the full tool catalog: built-ins first, then the delegation tools
/// when any specialist is registered.  Returns the specialist policies for
/// ownership-mode reservation in the dispatcher.
fn build_catalog(config: &Config) -> anyhow::Result<(ToolRegistry, Vec<ToolPolicy>)> {
    let mut catalog = ToolRegistry::new();
    register_builtins(&mut catalog, &config.tools);

    let registry = load_registry(config)?;
    let policies = registry.policies();

    if !registry.is_empty() {
        let factory = Arc::new(ConfigProviderFactory {
            base: config.model.clone(),
        });
        let broker = Arc::new(DelegationBroker::new(
            registry,
            factory,
            &config.agents.delegation,
        ));
        wire_delegation(&mut catalog, &broker);
    }

    Ok((catalog, policies))
}

fn register_builtins(catalog: &mut ToolRegistry, tools: &ToolsConfig) {
    let trusted = |name: &str| tools.directive_allow.iter().any(|t| t == name);

    catalog.register(CurrentTimeTool);
    if trusted("attach_file") {
        catalog.register_trusted(AttachFileTool);
    } else {
        catalog.register(AttachFileTool);
    }
}

/// Builds specialist providers from the global model config with the spec's
/// provider/model overrides applied.  Construction is cheap, so each
/// delegation gets a fresh client.
struct ConfigProviderFactory {
    base: ModelConfig,
}

impl AgentProviderFactory for ConfigProviderFactory {
    fn for_agent(&self, spec: &AgentSpec) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let mut cfg = self.base.clone();
        if let Some(provider) = &spec.provider {
            cfg.provider = provider.clone();
        }
        if let Some(model) = &spec.model {
            cfg.name = model.clone();
        }
        ombud_model::from_config(&cfg)
    }
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading stdin")?;
    Ok(buf)
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
