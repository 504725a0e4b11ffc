//! Account Prober entry point
//!
//! Evaluates account health probes, serves the dashboard and keeps stored
//! results fresh.

use clap::{Parser, Subcommand, ValueEnum};
use prober_api::{create_router, AppState, ProberApp};
use prober_core::{render_html, ProberConfig, RunStatus};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "account-prober")]
#[command(about = "Account Prober - AWS account health probes and dashboard")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "PROBER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server with the run schedule and eviction
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Run one evaluation pass
    Run {
        /// Restrict the pass to these probes
        #[arg(short, long)]
        probe: Vec<String>,
    },

    /// Render the dashboard from stored results
    Render {
        #[arg(short, long, value_enum, default_value = "json")]
        format: RenderFormat,
    },

    /// List the probe catalog
    Catalog,

    /// Delete the stored result of a probe
    Evict {
        /// Probe id
        probe: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RenderFormat {
    Json,
    Html,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ProberConfig> {
    let config = match path {
        Some(path) => ProberConfig::load(path)?,
        None => ProberConfig::default(),
    };
    let config = config.apply_env()?;
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            let addr: SocketAddr =
                format!("{}:{}", config.server.host, config.server.port).parse()?;

            let app = ProberApp::from_config(config)?;
            let background = app.start_background();
            let router = create_router(Arc::new(AppState::new(&app)));

            tracing::info!(
                probes = app.registry.len(),
                namespace = %app.config.namespace,
                "Starting Account Prober on {}",
                addr
            );

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            background.shutdown();
        }

        Commands::Run { probe } => {
            let app = ProberApp::from_config(config)?;
            let run = if probe.is_empty() {
                app.orchestrator.run().await
            } else {
                app.orchestrator.run_probes(&probe).await?
            };

            println!("{}", serde_json::to_string_pretty(&run)?);

            if run.status != RunStatus::Completed {
                std::process::exit(1);
            }
        }

        Commands::Render { format } => {
            let app = ProberApp::from_config(config)?;
            let view = app.read_only_dashboard().render().await;
            match format {
                RenderFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
                RenderFormat::Html => print!("{}", render_html(&view, None)),
            }
            if view.pending > 0 {
                eprintln!(
                    "{} probe(s) have no stored result; run `account-prober run` to evaluate them",
                    view.pending
                );
            }
        }

        Commands::Catalog => {
            let registry = config.registry()?;
            let catalog: Vec<_> = registry
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "category": p.category,
                        "executor_kind": p.executor_kind,
                        "shared_call_key": p.shared_call_key,
                        "title": p.title,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }

        Commands::Evict { probe } => {
            let app = ProberApp::from_config(config)?;
            if !app.registry.contains(&probe) {
                anyhow::bail!("unknown probe '{}'", probe);
            }
            app.eviction.evict(&probe).await?;
            println!("{}", app.store.key(&probe));
        }
    }

    Ok(())
}
