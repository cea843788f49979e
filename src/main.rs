//! finwire-server - message-dispatch server for the finance tracker.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use finwire::config::Settings;
use finwire::handlers::HandlerRegistry;
use finwire::server::{Server, ServerMetrics};
use finwire::TransportResult;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = "finwire-server";
const DEFAULT_CONFIG_PATH: &str = "finwire.toml";

fn main() -> ExitCode {
    // Parse command line arguments (simple std::env approach)
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    // A missing file means defaults; a broken one is fatal
    let settings = match Settings::load_or_default(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Listen address: {}", settings.server.bind_address());
    info!("Log level: {}", settings.logging.level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings, config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

fn build_server(settings: Settings) -> Server {
    let metrics = Arc::new(ServerMetrics::new());
    let registry = HandlerRegistry::with_builtins(Some(Arc::clone(&metrics)));
    Server::with_metrics(Arc::new(settings), registry, metrics)
}

/// Async main function.
async fn async_main(
    settings: Settings,
    config_path: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = build_server(settings);
    server.start_server().await?;

    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping server...");
                server.stop_server().await?;
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading configuration...");
                server = match Settings::load_or_default(&config_path) {
                    Ok(new_settings) => reload_server(server, new_settings).await?,
                    Err(e) => {
                        warn!(error = %e, "Failed to reload configuration, keeping existing settings");
                        server
                    }
                };
            }
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Replace `current` with a server built from `new_settings`.
///
/// The listening port is usually the same, so the old server has to stop
/// before the new one can bind. If the new one fails to start, the old one
/// is started again on its previous settings and keeps serving.
async fn reload_server(current: Server, new_settings: Settings) -> TransportResult<Server> {
    current.stop_server().await?;

    let candidate = build_server(new_settings);
    match candidate.start_server().await {
        Ok(addr) => {
            info!(address = %addr, "Configuration reloaded successfully");
            Ok(candidate)
        }
        Err(e) => {
            error!(error = %e, "New configuration failed to start, keeping previous settings");
            current.restart_server().await?;
            Ok(current)
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
#[cfg(unix)]
async fn reload_signal() {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            std::future::pending::<()>().await;
        }
    }
}

/// No-op reload signal for non-Unix platforms.
#[cfg(not(unix))]
async fn reload_signal() {
    std::future::pending::<()>().await;
}

/// Print help message.
fn print_help() {
    println!(
        r#"{} {}
Message-dispatch server for the finance tracker.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}]
    -h, --help             Print help information
    -V, --version          Print version information

SIGNALS:
    SIGINT, SIGTERM        Stop the server
    SIGHUP                 Reload the configuration and restart
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
