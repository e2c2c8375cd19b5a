//! netpath - isolated, NAT-bridged network test paths
//!
//! Provisions a veth pair between an existing LAN bridge and a fresh network
//! namespace, with SNAT so the namespace reaches one LAN host under a chosen
//! source address. Every step is driven by a state machine and rolled back
//! on failure.

mod cli;
mod error;
mod lock;
mod manifest;
mod network;
mod session;
mod sys;

use cli::{Cli, Commands, SnatAction};
use error::{Error, ErrorKind, Result};
use lock::SessionLock;
use manifest::{LockConfig, NetpathConfig, PathConfig, DEFAULT_CONFIG};
use network::{snat, SystemHost};
use session::Session;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load the config file and apply command-line overrides
fn load_config(cli: &Cli) -> Result<(NetpathConfig, PathConfig)> {
    let config = match &cli.config {
        Some(path) => manifest::load_or_default(path, true)?,
        None => manifest::load_or_default(&PathBuf::from(DEFAULT_CONFIG), false)?,
    };
    let path = config.path.clone().merge(cli.path.clone().into());
    Ok((config, path))
}

fn acquire_lock(config: &LockConfig, namespace: &str) -> Result<Option<SessionLock>> {
    if !config.enabled {
        return Ok(None);
    }
    SessionLock::acquire(&config.dir, namespace).map(Some)
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let host = SystemHost::new();

    match &cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(*shell);
        }

        Commands::Up { dry_run } => {
            let (config, path) = load_config(&cli)?;
            let spec = path.resolve()?;
            let mut session = Session::new(&host, spec, config.retry.clone());

            if *dry_run {
                println!("Dry run: would execute:");
                for step in session.plan() {
                    println!("  {}", step);
                }
                return Ok(());
            }

            let _lock = acquire_lock(&config.lock, &session.spec().namespace)?;
            session.up()?;

            let spec = session.spec();
            println!(
                "Test path ready: {} ({}) in {} via {}, SNAT {} -> {} on {}",
                spec.namespace_endpoint,
                spec.plan.namespace_side(),
                spec.namespace,
                spec.plan.gateway(),
                spec.snat.target,
                spec.snat.replacement,
                spec.bridge
            );
        }

        Commands::Down => {
            let (config, path) = load_config(&cli)?;
            let spec = path.resolve()?;
            let _lock = acquire_lock(&config.lock, &spec.namespace)?;

            let report = Session::adopt(&host, spec, config.retry.clone()).down()?;
            println!(
                "Removed {} resource(s), {} already gone",
                report.removed.len(),
                report.warnings.len()
            );
        }

        Commands::Status { json } => {
            let (_, path) = load_config(&cli)?;
            let spec = path.resolve()?;
            let status = session::status::inspect(&host, &spec)?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", status);
            }
        }

        Commands::Check => {
            let (_, path) = load_config(&cli)?;
            let results = sys::preflight(&host, path.bridge.as_deref());
            for result in &results {
                println!("{}", result);
            }

            let mut failed = results.iter().filter(|p| !p.ok).count();
            match path.resolve() {
                Ok(spec) => {
                    println!("[ OK ] {:<10} valid", "config");
                    println!();
                    println!("  {} {} (root)", spec.host_endpoint, spec.plan.host_side());
                    println!(
                        "  {} {} ({}), default via {}",
                        spec.namespace_endpoint,
                        spec.plan.namespace_side(),
                        spec.namespace,
                        spec.plan.gateway()
                    );
                    println!("  SNAT {}", spec.snat);
                }
                Err(e) => {
                    println!("[FAIL] {:<10} {}", "config", e);
                    failed += 1;
                }
            }

            if failed > 0 {
                return Err(Error::os(
                    ErrorKind::Environment,
                    "host",
                    format!("{} check(s) failed", failed),
                ));
            }
        }

        Commands::Snat { action } => {
            let (_, path) = load_config(&cli)?;
            let spec = path.resolve()?;

            match action {
                SnatAction::Install => {
                    if snat::install(&host, &spec.snat)? {
                        println!("Installed {}", spec.snat);
                    } else {
                        println!("Already active: {}", spec.snat);
                    }
                }
                SnatAction::Remove => {
                    snat::remove(&host, &spec.snat)?;
                    println!("Removed {}", spec.snat);
                }
            }
        }
    }

    Ok(())
}
