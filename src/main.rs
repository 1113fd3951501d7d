//! stagegraph - offline graph inspection
//!
//! Loads a graph snapshot against a port schema, compiles it and reports the
//! execution order, local loops and patch candidates as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use stagegraph::{
    config::EngineConfig,
    engine::{Catalog, Engine, GraphState},
    partition::{detect_local_loops, export_patch, patch_roots, PartitionPolicy},
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "stagegraph")]
#[command(about = "Inspect stagegraph graph snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a graph and list its loops and patch candidates
    Inspect {
        /// GraphState JSON file
        graph: PathBuf,

        /// JSON array of node schemas
        #[arg(long)]
        schema: PathBuf,

        /// Engine config (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stagegraph=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Commands::Inspect {
            graph,
            schema,
            config,
        } => inspect(&graph, &schema, config.as_deref()),
    }
}

fn inspect(graph_path: &Path, schema_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let catalog = Catalog::from_schema_file(schema_path)?;

    let state = GraphState::from_json(
        &std::fs::read_to_string(graph_path)
            .with_context(|| format!("reading {}", graph_path.display()))?,
    )?;

    let (mut engine, report) = Engine::from_state(catalog.clone(), state, config)?;
    let order: Vec<String> = engine
        .compile_now()?
        .order()
        .into_iter()
        .map(|id| id.0)
        .collect();

    let snapshot = engine.graph().snapshot();
    let policy = PartitionPolicy::default();
    let loops = detect_local_loops(&snapshot, &policy);
    let patches: Vec<_> = patch_roots(&snapshot, &policy)
        .into_iter()
        .map(|root| {
            match export_patch(&snapshot, &catalog, std::slice::from_ref(&root), &policy) {
                Ok(patch) => json!({
                    "root": root,
                    "id": patch.id,
                    "nodes": patch.graph.nodes.len(),
                    "assetRefs": patch.asset_refs,
                }),
                Err(err) => json!({ "root": root, "error": err.to_string() }),
            }
        })
        .collect();

    let output = json!({
        "order": order,
        "skippedNodes": report.skipped_nodes,
        "droppedConnections": report.dropped_connections,
        "localLoops": loops,
        "patches": patches,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
