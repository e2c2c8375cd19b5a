//! Command-line interface for netpath
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::PathConfig;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// netpath - isolated, NAT-bridged network test paths
#[derive(Parser)]
#[command(name = "netpath")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (default: netpath.toml, optional)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub path: PathArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Path values that override `[path]` in the config file
#[derive(Args, Debug, Default, Clone)]
pub struct PathArgs {
    /// Existing LAN bridge to use as uplink
    #[arg(long, global = true)]
    pub bridge: Option<String>,

    /// Source address the LAN sees for namespace traffic
    #[arg(long, global = true)]
    pub nat_address: Option<Ipv4Addr>,

    /// LAN host the namespace talks to
    #[arg(long, global = true)]
    pub target: Option<Ipv4Addr>,

    /// Isolated subnet shared by both link ends (e.g. 1.1.1.0/24)
    #[arg(long, global = true)]
    pub subnet: Option<Ipv4Net>,

    /// Isolated namespace name
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Root-side endpoint name
    #[arg(long, global = true)]
    pub host_endpoint: Option<String>,

    /// Namespace-side endpoint name
    #[arg(long, global = true)]
    pub namespace_endpoint: Option<String>,
}

impl From<PathArgs> for PathConfig {
    fn from(args: PathArgs) -> Self {
        PathConfig {
            bridge: args.bridge,
            nat_address: args.nat_address,
            target: args.target,
            subnet: args.subnet,
            namespace: args.namespace,
            host_endpoint: args.host_endpoint,
            namespace_endpoint: args.namespace_endpoint,
            ..Default::default()
        }
    }
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Provision the test path up to READY (rolls back on failure)
    Up {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Tear down the test path in reverse order
    Down,

    /// Show the live state of the test path
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check privileges, tools, kernel and bridge before provisioning
    Check,

    /// Manage the SNAT rule on its own
    Snat {
        #[command(subcommand)]
        action: SnatAction,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// SNAT subcommands
#[derive(Subcommand)]
pub enum SnatAction {
    /// Install the rule unless it is already active
    Install,

    /// Remove the rule
    Remove,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "netpath", &mut std::io::stdout());
    }
}
