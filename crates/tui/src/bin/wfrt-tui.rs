//! wfrt-tui: print the workflow tree as indented text.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use wfrt_common::GlobalConfig;
use wfrt_tui::tree::unreachable_workflow;
use wfrt_tui::{compute_tree, render, tree_query};
use wfrtd_client::{scan, ClientError, WorkflowClient};

#[derive(Parser, Debug)]
#[command(name = "wfrt-tui", version)]
#[command(about = "Show running workflows as a tree")]
struct Cli {
    /// Build the tree from a saved query result instead of live workflows
    #[arg(long, value_name = "JSON")]
    from_file: Option<PathBuf>,

    /// Remove families and cycles left empty by state filtering
    #[arg(long)]
    prune: bool,

    /// Only show tasks in these states (implies --prune)
    #[arg(long = "state", value_name = "STATE")]
    states: Vec<String>,

    /// Run directory to scan (defaults to the global config)
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Print the tree as JSON
    #[arg(long)]
    json: bool,

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

    let data = match &cli.from_file {
        Some(path) => load_saved(path)?,
        None => {
            let run_dir = match cli.run_dir.clone() {
                Some(dir) => dir,
                None => GlobalConfig::load(None)
                    .context("failed to load global config")?
                    .run_dir(),
            };
            query_running(&run_dir, &cli.states).await
        }
    };

    let prune = cli.prune || !cli.states.is_empty();
    let tree = compute_tree(&data, prune)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print!("{}", render(&tree));
    }
    Ok(())
}

/// Accept either a bare query result or a whole reply envelope.
fn load_saved(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?;
    Ok(match value.get("data") {
        Some(data) if data.get("workflows").is_some() => data.clone(),
        _ => value,
    })
}

async fn query_running(run_dir: &Path, states: &[String]) -> Value {
    let query = tree_query(states);
    let mut flows = Vec::new();
    for entry in scan(run_dir) {
        if !entry.is_running() {
            flows.push(unreachable_workflow(&entry.name, "stopped", ""));
            continue;
        }
        match fetch(run_dir, &entry.name, &query).await {
            Ok(found) => flows.extend(found),
            Err(err) => {
                warn!(workflow = %entry.name, "query failed: {}", err);
                flows.push(unreachable_workflow(&entry.name, "unreachable", &err.to_string()));
            }
        }
    }
    json!({ "workflows": flows })
}

async fn fetch(run_dir: &Path, workflow: &str, query: &str) -> Result<Vec<Value>, ClientError> {
    let mut client = WorkflowClient::connect(run_dir, workflow).await?;
    let data = client.query(query, None).await?;
    client.close().await;
    debug!(workflow, "tree query answered");
    match data.get("workflows").and_then(Value::as_array) {
        Some(flows) => Ok(flows.clone()),
        None => Err(ClientError::InvalidResponse(data.to_string())),
    }
}
