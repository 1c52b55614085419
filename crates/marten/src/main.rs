//! Marten DNS forwarder binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};

use marten::handler::ForwardHandler;
use marten::reload;
use marten_cache::MessageCache;
use marten_config::{Config, ListenProtocol};
use marten_resolver::Exchanger;
use marten_server::{DnsServer, Protocol};

/// Marten - caching, host-overriding DNS forwarder
#[derive(Parser, Debug)]
#[command(name = "marten")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the forwarder (default)
    Run,

    /// Validate the configuration file
    Validate,

    /// Show version information
    Version,
}

/// Find the configuration file in standard locations.
fn find_config_file(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    [
        PathBuf::from("./marten.yaml"),
        PathBuf::from("./marten.yml"),
        PathBuf::from("/etc/marten/config.yaml"),
    ]
    .into_iter()
    .find(|path| path.exists())
}

/// Parse log level from string.
fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the tracing subscriber from configuration and CLI overrides.
fn init_logging(config: &Config, cli_level: Option<&str>, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if let Some(level) = cli_level {
        parse_log_level(level)
    } else {
        parse_log_level(&config.logging.level)
    };

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match config.logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn write_pid_file(path: &Path) -> Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("writing PID file {}", path.display()))?;
    info!(path = %path.display(), "PID file written");
    Ok(())
}

fn remove_pid_file(path: Option<&Path>) {
    if let Some(path) = path {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove PID file");
        }
    }
}

/// Run the forwarder until shutdown.
async fn run_server(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let snapshot = config
        .load_snapshot()
        .context("building initial configuration snapshot")?;
    info!(
        hosts = snapshot.hosts.len(),
        upstreams = snapshot.upstreams.len(),
        timeout_ms = config.timeout_ms,
        "configuration loaded"
    );

    let cache = MessageCache::new(config.cache.capacity, config.cache.lifetime());
    let handler = Arc::new(ForwardHandler::new(snapshot, cache, Exchanger::default()));

    let listens: Vec<(Protocol, SocketAddr)> = config
        .listen_specs()
        .context("parsing listen endpoints")?
        .into_iter()
        .map(|spec| {
            let protocol = match spec.protocol {
                ListenProtocol::Udp => Protocol::Udp,
                ListenProtocol::Tcp => Protocol::Tcp,
            };
            (protocol, spec.addr)
        })
        .collect();
    for (protocol, addr) in &listens {
        info!(address = %addr, protocol = %protocol, "listening");
    }

    let pid_file = config.pid_file.clone();
    if let Some(path) = &pid_file {
        write_pid_file(path)?;
    }

    let server = DnsServer::new(handler.clone());
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    // SIGTERM / SIGINT initiate graceful shutdown.
    let shutdown_signals = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        let _ = shutdown_signals.send(());
    });

    // SIGHUP swaps in a freshly built snapshot.
    {
        let handler = handler.clone();
        let config = config.clone();
        let config_path = config_path.clone();
        tokio::spawn(async move {
            let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())
                .expect("failed to register SIGHUP handler");
            loop {
                sighup.recv().await;
                info!("received SIGHUP, reloading configuration");
                reload::reload(config_path.as_deref(), &config, &handler);
            }
        });
    }

    info!("marten started");

    tokio::select! {
        result = server.run(&listens) => {
            if let Err(err) = result {
                error!(error = %err, "server error");
                remove_pid_file(pid_file.as_deref());
                return Err(err.into());
            }
        }
        _ = shutdown_rx.recv() => {
            info!("shutdown signal received");
            server.shutdown();
        }
    }

    remove_pid_file(pid_file.as_deref());
    info!("marten stopped");
    Ok(())
}

/// Validate the configuration file and report the verdict.
fn validate_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = find_config_file(path).context("no configuration file found")?;
    println!("validating configuration: {}", config_path.display());

    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config
        .validate()
        .context("configuration validation failed")?;

    println!("configuration is valid");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Version) = &cli.command {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if let Some(Commands::Validate) = &cli.command {
        return validate_config(cli.config);
    }

    let config_path = find_config_file(cli.config.clone());
    let config = match &config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => {
            if !cli.quiet {
                eprintln!("no configuration file found, using defaults");
            }
            Config::default()
        }
    };

    config.validate().context("invalid configuration")?;
    init_logging(&config, cli.log_level.as_deref(), cli.quiet);

    match cli.command {
        Some(Commands::Run) | None => run_server(config, config_path).await,
        _ => unreachable!(),
    }
}
