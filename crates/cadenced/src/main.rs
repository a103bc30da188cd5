//! cadenced - The cadence session service
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - Planning collaborators (directory snapshotter, task generator)
//! - Session orchestrator
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use cadence_collab::{DirSnapshotter, HttpGenerator, TaskGenerator, TemplateGenerator};
use cadence_config::load_config;
use cadence_core::Orchestrator;
use cadence_ipc::IpcServer;
use cadence_store::{SqliteStore, Store};
use cadence_util::default_config_path;
use cadenced::Dispatcher;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// cadenced - Session planning and event streaming service
#[derive(Parser, Debug)]
#[command(name = "cadenced")]
#[command(about = "Session planning and event streaming service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/cadence/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set CADENCE_SOCKET env var)
    #[arg(short, long, env = "CADENCE_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set CADENCE_DATA_DIR env var)
    #[arg(short, long, env = "CADENCE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Evidence citations the template generator attaches to each task
const TEMPLATE_EVIDENCE: usize = 2;

/// Main service state
struct Service {
    orchestrator: Arc<Orchestrator>,
    ipc: Arc<IpcServer>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let settings = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(config_path = %args.config.display(), "Configuration loaded");

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| settings.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("cadence.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let generator: Arc<dyn TaskGenerator> = match &settings.planning.generator_url {
            Some(url) => {
                info!(url = %url, "Using HTTP task generator");
                Arc::new(
                    HttpGenerator::new(url.clone())
                        .context("Failed to build HTTP task generator")?,
                )
            }
            None => {
                info!("Using template task generator");
                Arc::new(TemplateGenerator::new(
                    settings.planning.max_tasks,
                    TEMPLATE_EVIDENCE.max(settings.planning.min_evidence),
                ))
            }
        };

        let orchestrator = Orchestrator::new(
            store,
            Arc::new(DirSnapshotter::new()),
            generator,
            &settings,
        );

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            ipc: Arc::new(ipc),
        })
    }

    async fn run(self) -> Result<()> {
        let messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let dispatcher = Dispatcher::new(self.orchestrator.clone(), self.ipc.clone());

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        info!("Service running");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, shutting down gracefully");
            }
            _ = dispatcher.run(messages) => {
                info!("IPC message channel closed");
            }
        }

        self.ipc.shutdown();
        info!("Shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "cadenced starting");

    let service = Service::new(&args).await?;
    service.run().await
}
