//! # AIR Max-Flow
//!
//! Computes maximum flow with the push-relabel program on the air-pregel
//! runtime.
//!
//! ## Quick Start
//! ```bash
//! cargo run -- --fixture SimpleNetworkFlowGraph -s s -t t
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

/// Graph loading, submission and status polling
mod driver;

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use air_pregel::RunState;

use crate::config::Config;
use crate::driver::{Driver, GraphSource};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "air-maxflow",
    version,
    about = "Maximum flow with push-relabel on a Pregel runtime",
    long_about = r#"
AIR Max-Flow - push-relabel maximum flow as a vertex-centric program.

Loads a flow network, runs the six-phase push-relabel program over it and
prints every vertex document with its edge flows, followed by the maximum
flow from the source to the sink.

EXAMPLES:
  # Built-in textbook network (max flow 23)
  air-maxflow --fixture SimpleNetworkFlowGraph -s s -t t

  # Graph definition file, native accumulators, checkpoints every 5 supersteps
  air-maxflow --graph-file net.json -s a -t z --native \
      --checkpoint-dir ./checkpoints --checkpoint-interval 5
"#
)]
struct Args {
    /// Built-in network to use
    #[arg(
        long = "fixture",
        value_name = "NAME",
        default_value = "SimpleNetworkFlowGraph",
        conflicts_with = "graph_file"
    )]
    fixture: String,

    /// Graph definition JSON file
    #[arg(long = "graph-file", value_name = "PATH")]
    graph_file: Option<PathBuf>,

    /// Source vertex key or id
    #[arg(short = 's', long = "source", default_value = "s")]
    source: String,

    /// Sink vertex key or id
    #[arg(short = 't', long = "sink", default_value = "t")]
    sink: String,

    /// Superstep budget (overrides AIR_MAX_GSS)
    #[arg(long = "max-gss")]
    max_gss: Option<usize>,

    /// Vertex attribute receiving the edge flows (overrides AIR_RESULT_FIELD)
    #[arg(long = "result-field")]
    result_field: Option<String>,

    /// Status polling interval in milliseconds
    #[arg(long = "poll-interval-ms")]
    poll_interval_ms: Option<u64>,

    /// Use the built-in flow accumulator instead of its expression programs
    #[arg(long = "native", default_value = "false")]
    native: bool,

    /// Write zstd-compressed checkpoints under this directory
    #[arg(long = "checkpoint-dir", value_name = "PATH")]
    checkpoint_dir: Option<PathBuf>,

    /// Supersteps between checkpoints
    #[arg(long = "checkpoint-interval")]
    checkpoint_interval: Option<usize>,

    /// Newest checkpoints to keep per run (0 = all)
    #[arg(long = "checkpoint-retention")]
    checkpoint_retention: Option<usize>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

impl Args {
    fn graph_source(&self) -> GraphSource {
        match &self.graph_file {
            Some(path) => GraphSource::File(path.clone()),
            None => GraphSource::Fixture(self.fixture.clone()),
        }
    }

    /// Command-line values take precedence over the environment
    fn apply(&self, config: &mut Config) {
        if let Some(max_gss) = self.max_gss {
            config.max_gss = max_gss;
        }
        if let Some(field) = &self.result_field {
            config.result_field = field.clone();
        }
        if let Some(millis) = self.poll_interval_ms {
            config.poll_interval = std::time::Duration::from_millis(millis);
        }
        if self.native {
            config.native_accumulators = true;
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = Some(dir.clone());
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint_interval = interval;
        }
        if let Some(keep) = self.checkpoint_retention {
            config.checkpoint_retention = keep;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    args.apply(&mut config);
    config.validate()?;

    init_logging(&config.log_level)?;

    info!(
        max_gss = config.max_gss,
        result_field = %config.result_field,
        native = config.native_accumulators,
        "Configuration loaded"
    );

    let driver = Driver::new(config);
    let outcome = driver.run(&args.graph_source(), &args.source, &args.sink).await?;

    if outcome.status.state != RunState::Done {
        let reason = outcome
            .status
            .error
            .clone()
            .unwrap_or_else(|| outcome.status.state.to_string());
        error!(state = %outcome.status.state, gss = outcome.status.gss, "Run did not finish");
        anyhow::bail!("Run {} ended {}: {}", outcome.status.id, outcome.status.state, reason);
    }

    println!("\n{}", "=".repeat(60));
    println!("VERTEX DOCUMENTS");
    println!("{}\n", "=".repeat(60));
    for document in &outcome.documents {
        println!("{}", serde_json::to_string_pretty(document)?);
    }
    println!("\n{}", "=".repeat(60));
    println!("MAX FLOW: {}", outcome.max_flow().unwrap_or_default());
    println!("{}", "=".repeat(60));

    info!(
        supersteps = outcome.status.stats.supersteps,
        pushes = outcome.status.stats.pushes,
        relabels = outcome.status.stats.relabels,
        elapsed = ?outcome.status.stats.elapsed,
        "Run completed successfully"
    );
    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
fn init_logging(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("Unknown log level: {}", level))?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
