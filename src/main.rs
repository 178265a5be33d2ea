use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trust_graph_monitor::{
    cli::{execute_command, Cli, Commands},
    config::{Config, LogFormat},
    events::{Notifier, TracingPublisher},
    server::{AppState, McpServer},
    storage::{SharedStorage, SqliteStorage},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Trust Graph Monitor starting..."
    );

    // Initialize storage
    let storage: SharedStorage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Load the graph and build the drift components
    let notifier = Notifier::new(Arc::new(TracingPublisher));
    let state = match AppState::new(config, storage, notifier).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Failed to load trust graph");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(state).await,
        command => {
            let result = execute_command(command, &state).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
            }
            std::process::exit(result.exit_code);
        }
    }
}

/// Serve MCP on stdio until EOF, with the scheduled sweeps running.
async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let scheduler = state.start_scheduler();
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    let result = server.run().await;
    scheduler.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
