//! termctl - terminal programs on headless X displays, as MCP tools
//!
//! ## Modes
//!
//! **`termctl mcp`** (the default): serve the tools over stdio for an AI host.
//! stdout carries the JSON-RPC stream, so all logging goes to stderr.
//!
//! **`termctl serve`**: serve the same tools over MCP Streamable HTTP at
//! `/mcp`, with a `/health` route.
//!
//! **`termctl check`**: report which of the external X11 tools are missing.
//!
//! Every mode that owns sessions tears them all down on SIGINT/SIGTERM or
//! when the client goes away.

use clap::{Parser as ClapParser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use termctl::{
    config::{Config, ConfigError},
    mcp::TermctlMcpServer,
    process,
    service::TerminalService,
};

/// How long the HTTP server may take to finish in-flight requests on
/// shutdown before sessions are torn down anyway.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// termctl - drive terminal programs on virtual X displays
///
/// Launches programs inside xterm on a private Xvfb display, sends them
/// keystrokes with xdotool and captures screenshots with ImageMagick.
#[derive(ClapParser, Debug)]
#[command(name = "termctl", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    #[arg(long, global = true, env = "TERMCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long, global = true, env = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the MCP tools over stdio (default)
    Mcp,

    /// Serve the MCP tools over Streamable HTTP
    Serve {
        /// Address to bind the HTTP server
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },

    /// Check that the external X11 tools can be run
    Check,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error("missing tools: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("termctl: {e}");
        std::process::exit(1);
    }

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "termctl exiting with error");
            eprintln!("termctl: {e}");
            1
        }
    };
    // Exit without dropping the runtime: a blocked stdin read would hold it open.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Arc::new(Config::resolve(cli.config.as_deref())?);

    match cli.command.unwrap_or(Commands::Mcp) {
        Commands::Mcp => run_mcp(config).await,
        Commands::Serve { bind } => run_http(config, bind).await,
        Commands::Check => run_check(&config).await,
    }
}

/// Initialize tracing on stderr, plus an optional plain-text log file.
///
/// stdio MCP mode uses stdout for the JSON-RPC protocol, so tracing must
/// never write there.
fn init_tracing(level: &str, log_file: Option<&std::path::Path>) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("termctl={level},tower_http={level}")),
    );

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| CliError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| CliError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

// ── MCP stdio mode ─────────────────────────────────────────────────

async fn run_mcp(config: Arc<Config>) -> Result<(), CliError> {
    use rmcp::ServiceExt;

    tracing::info!("termctl mcp stdio server starting");
    let service = TerminalService::new(config);

    let result = async {
        let running = TermctlMcpServer::new(service.clone())
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| CliError::Mcp(e.to_string()))?;

        tokio::select! {
            quit = running.waiting() => {
                match quit {
                    Ok(reason) => tracing::info!(?reason, "mcp client disconnected"),
                    Err(e) => tracing::warn!(error = %e, "mcp service task failed"),
                }
            }
            _ = shutdown_signal() => {}
        }
        Ok::<(), CliError>(())
    }
    .await;

    service.shutdown().await;
    tracing::info!("termctl mcp stdio server exiting");
    result
}

// ── HTTP mode ──────────────────────────────────────────────────────

async fn run_http(config: Arc<Config>, bind: SocketAddr) -> Result<(), CliError> {
    tracing::info!("termctl http server starting");
    let service = TerminalService::new(config);
    let app = termctl::http::router(service.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "HTTP server listening");

    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                server_shutdown_rx.await.ok();
            })
            .await
    });

    shutdown_signal().await;
    let _ = server_shutdown_tx.send(());

    match tokio::time::timeout(HTTP_DRAIN_TIMEOUT, http_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "HTTP server error"),
        Ok(Err(e)) => tracing::warn!(?e, "HTTP server task panicked"),
        Err(_) => tracing::warn!("HTTP server did not drain in time"),
    }

    service.shutdown().await;
    tracing::info!("termctl http server exiting");
    Ok(())
}

// ── check ──────────────────────────────────────────────────────────

async fn run_check(config: &Config) -> Result<(), CliError> {
    let tools = [
        ("Xvfb", config.tools.xvfb.as_str(), "-help"),
        ("xterm", config.tools.xterm.as_str(), "-version"),
        ("xdotool", config.tools.xdotool.as_str(), "version"),
        ("import", config.tools.import.as_str(), "-version"),
    ];

    let mut missing = Vec::new();
    for (name, program, arg) in tools {
        match process::probe(program, arg).await {
            Ok(()) => println!("ok       {name} ({program})"),
            Err(e) => {
                println!("missing  {name} ({program}): {e}");
                missing.push(program.to_string());
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CliError::MissingTools(missing))
    }
}
