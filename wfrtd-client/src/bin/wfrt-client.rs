//! wfrt-client: send one command to a running workflow, or follow its events.

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;
use wfrt_common::GlobalConfig;
use wfrtd_client::{Subscriber, WorkflowClient};

#[derive(Parser, Debug)]
#[command(name = "wfrt-client", version)]
#[command(about = "Talk to a running wfrt workflow")]
struct Cli {
    /// Workflow name
    workflow: String,

    /// Command to send (e.g. api, query, stop_suite)
    command: Option<String>,

    /// Command arguments as a JSON object
    #[arg(long, default_value = "{}")]
    args: String,

    /// Follow the event channel, optionally limited to topic prefixes
    #[arg(long, num_args = 0.., value_name = "TOPIC", conflicts_with = "command")]
    subscribe: Option<Vec<String>>,

    /// Run directory (defaults to the global config)
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let run_dir = match cli.run_dir.clone() {
        Some(dir) => dir,
        None => GlobalConfig::load(None)
            .context("failed to load global config")?
            .run_dir(),
    };

    if let Some(topics) = &cli.subscribe {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        return follow(&run_dir, &cli.workflow, &topics).await;
    }

    let Some(command) = cli.command.as_deref() else {
        bail!("a command or --subscribe is required");
    };
    let args: Map<String, Value> =
        serde_json::from_str(&cli.args).context("--args must be a JSON object")?;

    let mut client = WorkflowClient::connect(&run_dir, &cli.workflow).await?;
    let reply = client.request(command, args).await?;
    client.close().await;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn follow(run_dir: &std::path::Path, workflow: &str, topics: &[&str]) -> Result<()> {
    let mut subscriber = Subscriber::for_workflow(run_dir, workflow, topics).await?;
    while let Some(event) = subscriber.next_event().await? {
        let topic = String::from_utf8_lossy(&event.topic);
        if event.is_shutdown() {
            println!("{topic}: {}", String::from_utf8_lossy(&event.payload));
        } else {
            println!("{topic}: {} bytes", event.payload.len());
        }
    }
    Ok(())
}
