//! Command-line interface configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Mempool flow fee estimator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file (defaults to FLOW_CONFIG_FILE or ./config)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to Bitcoin Core cookie file (alternative to username/password)
    #[arg(long, global = true)]
    pub rpc_cookie_file: Option<String>,

    /// Use an in-memory mock node and in-memory storage
    #[arg(long, global = true)]
    pub test_mode: bool,

    /// Log filter (e.g., "mempool_flow_service=debug,mempool_flow=info")
    #[arg(
        long,
        global = true,
        default_value = "mempool_flow_service=info,mempool_flow=info"
    )]
    pub log_filter: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run one estimation and record the result
    Compute {
        /// Also write the run output as JSON to this file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Poll the node's mempool and log when transactions were first seen
    LogMempool {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
}

/// Read Bitcoin Core cookie file and extract credentials
pub fn read_cookie_file(path: &str) -> Result<(String, String)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read cookie file: {path}"))?;
    let (username, password) = contents
        .trim()
        .split_once(':')
        .context("Invalid cookie file format (expected username:password)")?;
    Ok((username.to_string(), password.to_string()))
}
