//! # Driver Module
//!
//! Loads a flow network, submits the push-relabel program to the engine and
//! follows the run until it reaches a terminal state.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use air_pregel::engine::EngineConfig;
use air_pregel::{
    air_program, fixtures, CheckpointerConfig, GraphDefinition, GraphStore, PregelConfig, PregelEngine, Report,
    ReportLevel, RunParams, RunState, RunStatus, ALGORITHM,
};

use crate::config::Config;

// =============================================================================
// GRAPH SOURCE
// =============================================================================
/// Where the flow network comes from
#[derive(Debug, Clone, PartialEq)]
pub enum GraphSource {
    /// One of the built-in networks
    Fixture(String),
    /// A graph definition JSON file
    File(PathBuf),
}

impl GraphSource {
    pub async fn load(&self) -> Result<GraphDefinition> {
        match self {
            GraphSource::Fixture(name) => fixtures::fixture(name).with_context(|| {
                format!("Unknown fixture {} (available: {})", name, fixtures::FIXTURES.join(", "))
            }),
            GraphSource::File(path) => GraphDefinition::load_file(path)
                .await
                .with_context(|| format!("Failed to load graph from {}", path.display())),
        }
    }
}

/// Outcome of a finished run
#[derive(Debug)]
pub struct Outcome {
    pub status: RunStatus,
    /// Vertex documents with the result field, present when the run is done
    pub documents: Vec<serde_json::Value>,
}

impl Outcome {
    pub fn max_flow(&self) -> Option<f64> {
        self.status.stats.max_flow
    }
}

// =============================================================================
// DRIVER
// =============================================================================
pub struct Driver {
    config: Config,
    engine: PregelEngine,
}

impl Driver {
    pub fn new(config: Config) -> Self {
        let pregel = PregelConfig::default()
            .with_parallelism(config.parallelism)
            .with_checkpoint_interval(if config.checkpoint_dir.is_some() {
                config.checkpoint_interval
            } else {
                0
            })
            .with_checkpoint_retention(config.checkpoint_retention);

        let mut engine_config = EngineConfig::default().with_pregel(pregel);
        if let Some(path) = &config.checkpoint_dir {
            engine_config = engine_config.with_checkpointer(CheckpointerConfig::File {
                path: path.clone(),
                compression: true,
            });
        }

        let engine = PregelEngine::with_config(Arc::new(GraphStore::new()), engine_config);
        Self { config, engine }
    }

    /// Compute the maximum flow from `source` to `sink`
    pub async fn run(&self, graph: &GraphSource, source: &str, sink: &str) -> Result<Outcome> {
        let definition = graph.load().await?;
        let stored = self.engine.store().insert(definition).await?;
        let graph_name = stored.name().to_string();

        let program = air_program(
            self.config.result_field.clone(),
            self.config.max_gss,
            !self.config.native_accumulators,
        )?;
        let id = self
            .engine
            .submit(ALGORITHM, &graph_name, program, RunParams::new(source, sink))
            .await
            .context("Run rejected")?;
        info!(run = %id, "Run submitted");

        let status = self.poll(id).await?;
        let documents = if status.state == RunState::Done {
            self.engine.store().vertex_documents(&graph_name).await?
        } else {
            Vec::new()
        };
        Ok(Outcome { status, documents })
    }

    /// Poll until terminal, logging new reports and superstep progress
    async fn poll(&self, id: air_pregel::RunId) -> Result<RunStatus> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut seen = 0;
        let mut last_gss = None;

        loop {
            ticker.tick().await;
            let status = self.engine.status(id).await?;

            for report in status.reports.iter().skip(seen) {
                log_report(report);
            }
            seen = status.reports.len();

            if last_gss != Some(status.gss) {
                debug!(gss = status.gss, phase = %status.phase, state = %status.state, "Progress");
                last_gss = Some(status.gss);
            }

            if status.is_terminal() {
                return Ok(status);
            }
        }
    }
}

/// Route a run report to the log by level
pub fn log_report(report: &Report) {
    let annotations = serde_json::to_string(&report.annotations).unwrap_or_default();
    match report.level {
        ReportLevel::Fatal | ReportLevel::Error => {
            error!(level = ?report.level, annotations = %annotations, "{}", report.msg)
        }
        ReportLevel::Warn => warn!(annotations = %annotations, "{}", report.msg),
        ReportLevel::Info => info!(annotations = %annotations, "{}", report.msg),
    }
}
