//! fdbudget CLI

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fdbudget::config::Config;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("fdbudget: {e:#}");
        process::exit(1);
    }
}

#[cfg(unix)]
fn run() -> anyhow::Result<()> {
    use fdbudget::limits::{BootSnapshot, SystemRlimit};

    let backend = SystemRlimit::new();

    // Nothing may touch the limit before this point
    let boot = BootSnapshot::capture(&backend)
        .context("Cannot start without the boot-time descriptor limits")?
        .install()?;

    let config = load_config(std::env::args().skip(1))?;
    let report = fdbudget::startup::negotiate(&config, boot, &backend)
        .context("Descriptor limit negotiation failed")?;

    print!("{report}");
    Ok(())
}

#[cfg(not(unix))]
fn run() -> anyhow::Result<()> {
    anyhow::bail!("resource limits are not supported on this platform")
}

fn load_config(mut args: impl Iterator<Item = String>) -> anyhow::Result<Config> {
    match (args.next(), args.next()) {
        (None, _) => Ok(Config::default()),
        (Some(arg), None) if arg == "-h" || arg == "--help" => {
            eprintln!("fdbudget v{}", env!("CARGO_PKG_VERSION"));
            eprintln!();
            eprintln!("Usage: fdbudget [config.toml]");
            eprintln!();
            eprintln!("Sizes connection, pipe and socket budgets and raises RLIMIT_NOFILE.");
            eprintln!("Set RUST_LOG=debug for the sizing details.");
            process::exit(0);
        }
        (Some(path), None) => {
            let path = PathBuf::from(path);
            Config::from_file(&path)
                .with_context(|| format!("Cannot load {}", path.display()))
        }
        (Some(_), Some(extra)) => anyhow::bail!("Unexpected argument: {extra}"),
    }
}
