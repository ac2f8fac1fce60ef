// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ombud",
    about = "An agent runtime with scoped tool visibility and specialist delegation",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a config file, merged over the auto-discovered layers
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request through the main agent and print the answer.
    ///
    /// The answer goes to stdout; logs and the optional delegation trace go
    /// to stderr, so the output stays pipeable.
    Ask {
        /// Request text; read from stdin when omitted
        #[arg(value_name = "TEXT")]
        text: Option<String>,

        /// Override the run timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print the delegation trace as JSON to stderr after the answer
        #[arg(long)]
        trace: bool,
    },
    /// List the configured specialist agents
    Agents,
    /// List registered tools with their scope and trust
    Tools,
    /// Print the effective configuration and exit
    Config,
}
