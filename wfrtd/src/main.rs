//! wfrtd: run one workflow behind the command and event channels.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use wfrt_common::{current_user, ContactFile, GlobalConfig, ServiceDir, API_VERSION, VERSION};
use wfrtd::logging;
use wfrtd::queue::CommandQueue;
use wfrtd::state::{self, DataStore, WorkflowDescription};
use wfrtd::{Scheduler, ServerContext, WorkflowServer};

#[derive(Parser, Debug)]
#[command(name = "wfrtd", version)]
#[command(about = "Workflow runtime daemon")]
struct Cli {
    /// Workflow name
    workflow: String,

    /// JSON workflow description to seed the data store with
    #[arg(long)]
    state: Option<PathBuf>,

    /// Global configuration file (defaults to WFRT_CONF_PATH or ~/.wfrt/global.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Initial log level (debug, info, warning, error, critical)
    #[arg(long)]
    log_level: Option<String>,

    /// Run directory holding one sub-directory per workflow
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Host to bind and advertise
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match (&cli.log_level, cli.debug) {
        (_, true) => "debug",
        (Some(level), false) => logging::level_directive(level)
            .with_context(|| format!("unknown log level '{level}'"))?,
        (None, false) => "info",
    };
    let log_handle = logging::init_tracing(level)?;

    let mut config = GlobalConfig::load(cli.config.as_deref()).context("failed to load global config")?;
    if let Some(host) = cli.host.clone() {
        config.scheduler.host = host;
    }
    let run_dir = cli.run_dir.clone().unwrap_or_else(|| config.run_dir());
    let owner = current_user();
    info!(workflow = %cli.workflow, %owner, run_dir = %run_dir.display(), "wfrtd version {}", VERSION);

    let service = ServiceDir::new(&run_dir, &cli.workflow);
    let server_key = service.provision(&owner).context("failed to provision service keys")?;

    let store = match &cli.state {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let description: WorkflowDescription = serde_json::from_str(&raw)
                .with_context(|| format!("invalid workflow description {}", path.display()))?;
            DataStore::from_description(&cli.workflow, &owner, &config.scheduler.host, description)?
        }
        None => DataStore::new(&cli.workflow, &owner, &config.scheduler.host),
    };
    let store = state::shared(store);

    let (queue, commands) = CommandQueue::channel();
    let ctx = ServerContext {
        workflow: cli.workflow.clone(),
        owner: owner.clone(),
        config: config.clone(),
        store: store.clone(),
        queue,
    };
    let server = WorkflowServer::start(ctx, &service, Arc::new(server_key))
        .await
        .context("failed to start workflow server")?;

    let contact = ContactFile {
        workflow: cli.workflow.clone(),
        host: config.scheduler.host.clone(),
        port: server.port(),
        pub_port: server.pub_port(),
        api_version: API_VERSION,
        owner,
        pid: process::id(),
        server_version: VERSION.to_string(),
    };
    let server = server
        .advertise(&contact, &service.contact())
        .await
        .context("failed to write contact file")?;
    info!(port = server.port(), pub_port = server.pub_port(), "workflow ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handlers(shutdown_tx);

    let checkpoints = run_dir.join(&cli.workflow).join("checkpoints");
    let scheduler = Scheduler::new(store, commands, server.hub().clone(), checkpoints)
        .with_log_handle(log_handle);
    let stop = scheduler.run(shutdown_rx).await;

    server.stop(&stop.reason()).await;
    if let Err(err) = ContactFile::remove(&service.contact()) {
        warn!("Failed to remove contact file: {}", err);
    }
    info!("wfrtd exiting");
    Ok(())
}

fn spawn_signal_handlers(shutdown: watch::Sender<bool>) {
    let shutdown = Arc::new(shutdown);

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C; shutting down workflow");
            let _ = ctrl_c.send(true);
        }
    });

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM; shutting down workflow");
                let _ = shutdown.send(true);
            }
        });
    }
}
