mod config;
mod error;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use runtime::ToolProviderRegistry;
use storage::ConversationStore;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, DEFAULT_CONFIG_PATH};
use error::Result;
use server::AppState;

#[derive(Parser)]
#[command(name = "arcana")]
#[command(about = "Chat host for tool-using models with interactive tool UIs", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to listen on, overriding config and ARCANA_BIND
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Validate configuration and show what would be started
    CheckConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    config.apply_env(env_var)?;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            cmd_serve(config).await
        }
        Commands::CheckConfig => cmd_check_config(config),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

async fn cmd_serve(config: Config) -> Result<()> {
    let provider = config.build_provider(env_var)?;
    info!(model = %provider, "model backend ready");

    let store = ConversationStore::open(&config.server.database)?;
    info!(path = %config.server.database.display(), "conversation store opened");

    let registry = Arc::new(ToolProviderRegistry::new());
    for spec in config.providers {
        let (id, transport) = match spec.into_transport() {
            Ok(validated) => validated,
            Err(e) => {
                warn!(error = %e, "skipping invalid provider entry");
                continue;
            }
        };
        // A provider that is down at startup can be added later over HTTP.
        if let Err(e) = registry.register(&id, transport).await {
            warn!(provider = %id, error = %e, "failed to register provider");
        }
    }

    let state = AppState::new(
        Arc::clone(&registry),
        provider,
        config.model.max_iterations,
        store,
    );

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(addr = %config.server.bind, "arcana listening");
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.close_all().await;
    info!("shut down");
    Ok(())
}

fn cmd_check_config(config: Config) -> Result<()> {
    let kind = config.provider_kind(env_var)?;
    let provider = config.build_provider(env_var)?;
    println!("provider:       {kind:?}");
    println!("model:          {provider}");
    println!("max tokens:     {}", config.model.max_tokens);
    println!("max iterations: {}", config.model.max_iterations);
    println!("bind:           {}", config.server.bind);
    println!("database:       {}", config.server.database.display());

    if config.providers.is_empty() {
        println!("tool providers: none");
    } else {
        println!("tool providers:");
        for spec in config.providers {
            match spec.into_transport() {
                Ok((id, transport)) => println!("  {id} ({})", transport.kind()),
                Err(e) => println!("  invalid: {e}"),
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
