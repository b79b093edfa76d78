mod config;
mod secrets;
mod supervisor;

use clap::Parser;
use config::WardenConfig;
use secrets::SecretsRecord;
use std::path::PathBuf;
use std::time::Duration;
use supervisor::Supervisor;
use tokio::signal::unix::{signal, SignalKind};

/// A Rust CLI tool that supervises an external verifier process:
/// install secrets into its config file, spawn it, forward its output,
/// probe liveness on an interval, and shut it down gracefully.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Skip secret installation (config file already rendered)
    #[arg(long)]
    skip_configure: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (health checks, stream forwarding)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.parse().unwrap()),
        )
        .init();

    tracing::info!("warden starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    if cli.dry_run {
        println!("warden v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!(
            "Process: {} {}",
            config.process.command,
            config.process.args.join(" ")
        );
        println!("Working dir: {}", config.process.working_dir.display());
        println!("Grace period: {} ms", config.startup.grace_period_ms);
        println!("Shutdown timeout: {} s", config.shutdown.timeout_secs);
        println!("Secrets file: {}", config.secrets.config_path.display());
        println!("Dry run mode — config validated, not running.");
        return;
    }

    if let Err(e) = run(config, cli.skip_configure).await {
        tracing::error!(error = %e, "warden failed");
        std::process::exit(1);
    }
}

/// Play the hook host: configure, start, probe until a shutdown signal
/// or the process dies, then stop.
async fn run(
    config: WardenConfig,
    skip_configure: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let health_interval = Duration::from_secs(config.health.check_interval_secs);
    let placeholder_specs = config.secrets.placeholders.clone();
    let mut supervisor = Supervisor::new(config);

    if !skip_configure {
        let secrets = SecretsRecord::from_env(&placeholder_specs);
        supervisor.configure(&secrets)?;
    }

    supervisor.start().await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(health_interval);
    ticker.tick().await; // first tick completes immediately

    let mut process_died = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = ticker.tick() => {
                if supervisor.is_healthy() {
                    tracing::debug!(pid = ?supervisor.pid(), "health check passed");
                } else {
                    tracing::warn!("supervised process is no longer running");
                    process_died = true;
                    break;
                }
            }
        }
    }

    supervisor.stop().await?;

    if process_died {
        return Err("supervised process exited unexpectedly".into());
    }
    tracing::info!("warden stopped");
    Ok(())
}
