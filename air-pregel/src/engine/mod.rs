//! Job control over Pregel runs
//!
//! `submit` validates a program against a stored graph and starts the run
//! on the tokio runtime. `status` returns a snapshot that includes the live
//! superstep and phase; `cancel` is honoured at the next superstep barrier.

pub mod status;

pub use status::{RunId, RunParams, RunState, RunStats, RunStatus};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, RwLock};

use crate::accumulator::FlowAccumulator;
use crate::expr::{Interpreter, DEFAULT_MAX_DEPTH};
use crate::graph::{Graph, GraphError, GraphStore};
use crate::pregel::{
    create_checkpointer, Checkpointer, CheckpointerConfig, FlowMessage, PregelConfig, PregelError, PregelRuntime,
    Progress, Report, MasterState,
};
use crate::program::{ProgramError, ProgramSpec};
use crate::push_relabel::{self, build_vertices, FlowParams, FlowState, ALGORITHM};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid program: {0}")]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Graph {graph} has no {role} vertex {key}")]
    UnknownVertex {
        graph: String,
        role: &'static str,
        key: String,
    },

    #[error("Source and sink are the same vertex: {0}")]
    SameSourceAndSink(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run {0} cannot be resumed: {1}")]
    NotResumable(RunId, String),
}

/// Engine settings applied to every run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base runtime settings; `max_supersteps` is taken from each program
    pub pregel: PregelConfig,
    pub checkpointer: Option<CheckpointerConfig>,
    pub max_expression_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pregel: PregelConfig::default(),
            checkpointer: None,
            max_expression_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn with_pregel(mut self, pregel: PregelConfig) -> Self {
        self.pregel = pregel;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: CheckpointerConfig) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_max_expression_depth(mut self, depth: usize) -> Self {
        self.max_expression_depth = depth;
        self
    }
}

type FlowCheckpointer = Arc<dyn Checkpointer<FlowState, FlowMessage>>;

/// Everything needed to (re)build the vertices of a run
#[derive(Clone)]
struct RunPlan {
    graph: Arc<Graph>,
    program: Arc<ProgramSpec>,
    params: FlowParams,
    accumulator: FlowAccumulator,
    checkpointer: Option<FlowCheckpointer>,
}

struct RunEntry {
    status: RunStatus,
    plan: RunPlan,
    cancel: Arc<AtomicBool>,
    progress: Option<watch::Receiver<Progress>>,
    finished: watch::Sender<bool>,
}

type RunTable = Arc<RwLock<HashMap<RunId, RunEntry>>>;

/// Runs programs over graphs held in a [`GraphStore`]
#[derive(Clone)]
pub struct PregelEngine {
    store: Arc<GraphStore>,
    config: EngineConfig,
    runs: RunTable,
}

impl PregelEngine {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<GraphStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    fn interpreter(&self) -> Interpreter {
        Interpreter::new().with_max_depth(self.config.max_expression_depth)
    }

    /// Validate and start a run
    pub async fn submit(
        &self,
        algorithm: &str,
        graph_name: &str,
        program: ProgramSpec,
        params: RunParams,
    ) -> Result<RunId, EngineError> {
        if algorithm != ALGORITHM {
            return Err(EngineError::UnknownAlgorithm(algorithm.to_string()));
        }

        let interpreter = self.interpreter();
        program.validate(&interpreter)?;
        let accumulator = program.flow_accumulator(&interpreter)?;

        let graph = self.store.get(graph_name).await?;
        let resolve = |role: &'static str, key: &str| {
            graph.resolve(key).ok_or_else(|| EngineError::UnknownVertex {
                graph: graph_name.to_string(),
                role,
                key: key.to_string(),
            })
        };
        let source = resolve("source", &params.source)?;
        let sink = resolve("sink", &params.sink)?;
        if source == sink {
            return Err(EngineError::SameSourceAndSink(source.0));
        }

        let id = RunId::new_v4();
        let checkpointer = self.config.checkpointer.clone().map(|config| -> FlowCheckpointer {
            Arc::from(create_checkpointer::<FlowState, FlowMessage>(config, id.to_string()))
        });

        let mut status = RunStatus::new(id, algorithm, graph_name);
        status.stats.vertex_count = graph.vertex_count();
        status.stats.edge_count = graph.edge_count();

        let plan = RunPlan {
            params: FlowParams {
                source,
                sink,
                vertex_count: graph.vertex_count(),
            },
            graph,
            program: Arc::new(program),
            accumulator,
            checkpointer,
        };

        tracing::info!(
            run = %id,
            graph = graph_name,
            source = %plan.params.source,
            sink = %plan.params.sink,
            native = plan.accumulator.is_native(),
            "Run submitted"
        );

        let (finished, _) = watch::channel(false);
        self.runs.write().await.insert(
            id,
            RunEntry {
                status,
                plan: plan.clone(),
                cancel: Arc::new(AtomicBool::new(false)),
                progress: None,
                finished,
            },
        );
        self.spawn(id, plan, false);
        Ok(id)
    }

    /// Snapshot of a run, including live progress while it executes
    pub async fn status(&self, id: RunId) -> Result<RunStatus, EngineError> {
        let runs = self.runs.read().await;
        let entry = runs.get(&id).ok_or(EngineError::RunNotFound(id))?;
        let mut status = entry.status.clone();
        if let (false, Some(progress)) = (status.is_terminal(), &entry.progress) {
            let progress = progress.borrow();
            status.gss = progress.superstep;
            status.phase = progress.phase.clone();
        }
        Ok(status)
    }

    pub async fn runs(&self) -> Vec<RunId> {
        self.runs.read().await.keys().copied().collect()
    }

    /// Request cancellation; a finished run is left as it is
    pub async fn cancel(&self, id: RunId) -> Result<(), EngineError> {
        let runs = self.runs.read().await;
        let entry = runs.get(&id).ok_or(EngineError::RunNotFound(id))?;
        if !entry.status.is_terminal() {
            tracing::info!(run = %id, "Cancellation requested");
            entry.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Wait until the run reaches a terminal state
    pub async fn wait(&self, id: RunId) -> Result<RunStatus, EngineError> {
        let mut finished = {
            let runs = self.runs.read().await;
            runs.get(&id).ok_or(EngineError::RunNotFound(id))?.finished.subscribe()
        };
        while !*finished.borrow_and_update() {
            if finished.changed().await.is_err() {
                break;
            }
        }
        self.status(id).await
    }

    /// Continue a canceled or failed run from its latest checkpoint.
    ///
    /// `max_gss` replaces the program's superstep budget when given.
    pub async fn resume(&self, id: RunId, max_gss: Option<usize>) -> Result<(), EngineError> {
        let plan = {
            let mut runs = self.runs.write().await;
            let entry = runs.get_mut(&id).ok_or(EngineError::RunNotFound(id))?;
            if !matches!(entry.status.state, RunState::Canceled | RunState::Fatal) {
                return Err(EngineError::NotResumable(id, format!("run is {}", entry.status.state)));
            }
            if entry.plan.checkpointer.is_none() {
                return Err(EngineError::NotResumable(id, "checkpointing is disabled".into()));
            }

            if let Some(max_gss) = max_gss {
                let mut program = (*entry.plan.program).clone();
                program.max_gss = max_gss;
                entry.plan.program = Arc::new(program);
            }
            entry.status.state = RunState::Loading;
            entry.status.error = None;
            entry.status.finished_at = None;
            entry.cancel.store(false, Ordering::SeqCst);
            entry.finished.send_replace(false);
            entry.plan.clone()
        };

        tracing::info!(run = %id, "Run resuming from checkpoint");
        self.spawn(id, plan, true);
        Ok(())
    }

    /// Start the run task plus a supervisor that turns a crashed task into a fatal run
    fn spawn(&self, id: RunId, plan: RunPlan, resume: bool) {
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.execute(id, plan, resume).await });

        let runs = Arc::clone(&self.runs);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(run = %id, error = %e, "Run task failed");
                let mut runs = runs.write().await;
                if let Some(entry) = runs.get_mut(&id) {
                    let message = format!("run task failed: {}", e);
                    entry.status.reports.push(Report::fatal(&message));
                    finish(entry, RunState::Fatal, Some(message));
                }
            }
        });
    }

    async fn execute(&self, id: RunId, plan: RunPlan, resume: bool) {
        let started = Instant::now();
        let program = Arc::clone(&plan.program);

        let config = self.config.pregel.clone().with_max_supersteps(program.max_gss);
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        let cancel = match self.runs.read().await.get(&id) {
            Some(entry) => Arc::clone(&entry.cancel),
            None => return,
        };

        let mut runtime = PregelRuntime::<FlowState, FlowMessage>::with_config(config)
            .with_run_id(id.to_string())
            .with_cancel_flag(cancel)
            .with_progress(progress_tx);
        if let Some(checkpointer) = &plan.checkpointer {
            runtime = runtime.with_checkpointer(Arc::clone(checkpointer));
        }
        for vertex in build_vertices(plan.graph.residual_edges(), plan.params.clone(), plan.accumulator.clone()) {
            runtime.add_vertex(vertex);
        }

        self.update(id, |entry| {
            entry.status.state = RunState::Running;
            entry.progress = Some(progress_rx);
        })
        .await;

        let result = if resume {
            match runtime.resume().await {
                Ok(Some(result)) => Ok(result),
                Ok(None) => Err(PregelError::checkpoint_error("no checkpoint saved for this run")),
                Err(e) => Err(e),
            }
        } else {
            runtime.run(FlowState::new()).await
        };

        let reports = runtime.reports().to_vec();
        let result = match result {
            Ok(result) => {
                self.update(id, |entry| {
                    entry.status.state = RunState::Storing;
                    entry.status.gss = result.supersteps;
                    entry.status.phase = result.state.phase_name();
                })
                .await;

                let max_flow = push_relabel::max_flow(&plan.graph, &plan.params.sink, &result.outputs);
                let written = self
                    .store
                    .write_results(plan.graph.name(), &program.result_field, result.outputs.clone())
                    .await;
                written.map(|count| (result, max_flow, count))
            }
            Err(e) => {
                self.update(id, |entry| fail(entry, &e, reports, &program)).await;
                return;
            }
        };

        self.update(id, |entry| {
            entry.status.reports.extend(reports);
            entry.status.stats.elapsed += started.elapsed();
            match result {
                Ok((result, max_flow, written)) => {
                    tracing::info!(run = %id, supersteps = result.supersteps, max_flow, written, "Run done");
                    entry.status.stats.supersteps = result.supersteps;
                    entry.status.stats.pushes = result.state.totals.pushes;
                    entry.status.stats.relabels = result.state.totals.relabels;
                    entry.status.stats.max_flow = Some(max_flow);
                    entry.status.globals = program
                        .global_accumulators
                        .keys()
                        .filter_map(|name| result.state.global(name).map(|value| (name.clone(), value)))
                        .collect();
                    entry.status.reports.push(
                        Report::info(format!("max flow {}", max_flow))
                            .with_annotation("supersteps", result.supersteps)
                            .with_annotation("vertices", written),
                    );
                    finish(entry, RunState::Done, None);
                }
                Err(e) => {
                    entry.status.reports.push(Report::fatal(format!("storing results failed: {}", e)));
                    finish(entry, RunState::Fatal, Some(e.to_string()));
                }
            }
        })
        .await;
    }

    async fn update(&self, id: RunId, f: impl FnOnce(&mut RunEntry)) {
        if let Some(entry) = self.runs.write().await.get_mut(&id) {
            f(entry);
        }
    }
}

fn finish(entry: &mut RunEntry, state: RunState, error: Option<String>) {
    entry.status.state = state;
    entry.status.error = error;
    entry.status.finished_at = Some(chrono::Utc::now());
    if let Some(progress) = entry.progress.take() {
        let progress = progress.borrow();
        if state != RunState::Done {
            entry.status.gss = progress.superstep;
            entry.status.phase = progress.phase.clone();
        }
    }
    entry.finished.send_replace(true);
}

/// Record a failed run as canceled or fatal with an annotated report
fn fail(entry: &mut RunEntry, err: &PregelError, reports: Vec<Report>, program: &ProgramSpec) {
    entry.status.reports.extend(reports);
    let phase = entry
        .progress
        .as_ref()
        .map(|progress| progress.borrow().phase.clone())
        .unwrap_or_default();

    if matches!(err, PregelError::Cancelled) {
        entry.status.reports.push(Report::info("run canceled").with_annotation("phase", &phase));
        tracing::info!(run = %entry.status.id, "Run canceled");
        finish(entry, RunState::Canceled, None);
        return;
    }

    let report = match err {
        PregelError::MaxSuperstepsExceeded(supersteps) => {
            Report::fatal(format!("no convergence within maxGSS {}", program.max_gss))
                .with_annotation("supersteps", supersteps)
                .with_annotation("phase", &phase)
        }
        PregelError::Topology {
            vertex_id, neighbour, ..
        } => Report::fatal(err.to_string())
            .with_annotation("vertex", vertex_id.as_str())
            .with_annotation("neighbour", neighbour)
            .with_annotation("phase", &phase),
        PregelError::Expression { vertex_id, phase, .. } => Report::fatal(err.to_string())
            .with_annotation("vertex", vertex_id.as_str())
            .with_annotation("phase", phase),
        other => {
            let mut report = Report::fatal(other.to_string()).with_annotation("phase", &phase);
            if other.is_timeout() {
                report = report.with_annotation("timeout", true);
            }
            match other.vertex() {
                Some(vertex) => report.with_annotation("vertex", vertex.as_str()),
                None => report,
            }
        }
    };

    tracing::error!(run = %entry.status.id, error = %err, "Run failed");
    entry.status.reports.push(report);
    finish(entry, RunState::Fatal, Some(err.to_string()));
    if let PregelError::MaxSuperstepsExceeded(supersteps) = err {
        entry.status.gss = *supersteps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures;
    use crate::push_relabel::air_program;

    static_assertions::assert_impl_all!(PregelEngine: Send, Sync, Clone);

    async fn engine() -> PregelEngine {
        let store = Arc::new(GraphStore::new());
        store.insert(fixtures::diamond()).await.unwrap();
        PregelEngine::new(store)
    }

    fn program() -> ProgramSpec {
        air_program("flow", 1000, false).unwrap()
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_requests() {
        let engine = engine().await;

        let err = engine
            .submit("pagerank", "Diamond", program(), RunParams::new("s", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownAlgorithm(_)));

        let err = engine
            .submit(ALGORITHM, "Missing", program(), RunParams::new("s", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Graph(GraphError::NotFound(_))));

        let err = engine
            .submit(ALGORITHM, "Diamond", program(), RunParams::new("s", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownVertex { role: "sink", .. }));

        let err = engine
            .submit(ALGORITHM, "Diamond", program(), RunParams::new("s", "Diamond_V/s"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SameSourceAndSink(_)));

        let mut invalid = program();
        invalid.max_gss = 0;
        let err = engine
            .submit(ALGORITHM, "Diamond", invalid, RunParams::new("s", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Program(ProgramError::InvalidMaxGss)));

        assert!(engine.runs().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let engine = engine().await;
        let id = engine
            .submit(ALGORITHM, "Diamond", program(), RunParams::new("s", "t"))
            .await
            .unwrap();

        let status = engine.wait(id).await.unwrap();
        assert_eq!(status.state, RunState::Done, "{:?}", status.reports);
        assert_eq!(status.stats.max_flow, Some(2.0));
        assert_eq!(status.stats.vertex_count, 4);
        assert_eq!(status.stats.edge_count, 4);
        assert!(status.stats.pushes > 0);
        assert_eq!(status.globals["pushes"], status.stats.pushes);
        assert_eq!(status.globals["relabels"], status.stats.relabels);
        assert_eq!(status.globals["overflowing"], 0);
        assert_eq!(status.phase, "done");
        assert!(status.finished_at.is_some());
        assert!(status.reports.iter().any(|r| r.level == crate::pregel::ReportLevel::Info));

        // Finished runs ignore cancellation and cannot be resumed
        engine.cancel(id).await.unwrap();
        assert_eq!(engine.status(id).await.unwrap().state, RunState::Done);
        assert!(matches!(engine.resume(id, None).await, Err(EngineError::NotResumable(..))));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let engine = engine().await;
        let id = RunId::new_v4();
        assert!(matches!(engine.status(id).await, Err(EngineError::RunNotFound(_))));
        assert!(matches!(engine.cancel(id).await, Err(EngineError::RunNotFound(_))));
        assert!(matches!(engine.wait(id).await, Err(EngineError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_max_gss_is_fatal() {
        let engine = engine().await;
        let mut short = program();
        short.max_gss = 2;
        let id = engine
            .submit(ALGORITHM, "Diamond", short, RunParams::new("s", "t"))
            .await
            .unwrap();

        let status = engine.wait(id).await.unwrap();
        assert_eq!(status.state, RunState::Fatal);
        assert!(status.error.is_some());
        let fatal = status.reports.iter().find(|r| r.is_failure()).unwrap();
        assert!(fatal.msg.contains("maxGSS 2"));
        assert_eq!(fatal.annotations["supersteps"], 2);

        // No checkpointer configured
        assert!(matches!(engine.resume(id, Some(100)).await, Err(EngineError::NotResumable(..))));
    }

    #[tokio::test]
    async fn test_expression_depth_limit_is_fatal() {
        let store = Arc::new(GraphStore::new());
        store.insert(fixtures::diamond()).await.unwrap();
        let engine = PregelEngine::with_config(store, EngineConfig::default().with_max_expression_depth(3));

        // Only the program backend evaluates expressions
        let program = air_program("flow", 1000, true).unwrap();
        assert!(!program.flow_accumulator(&engine.interpreter()).unwrap().is_native());
        let id = engine
            .submit(ALGORITHM, "Diamond", program, RunParams::new("s", "t"))
            .await
            .unwrap();

        let status = engine.wait(id).await.unwrap();
        assert_eq!(status.state, RunState::Fatal);
        let fatal = status.reports.iter().find(|r| r.is_failure()).unwrap();
        assert!(fatal.msg.contains("depth"), "{}", fatal.msg);
        assert!(fatal.annotations.contains_key("vertex"));
        assert!(status.globals.is_empty());
    }

    #[tokio::test]
    async fn test_globals_follow_declarations() {
        let engine = engine().await;
        let mut program = program();
        program.global_accumulators.retain(|name, _| name == "relabels");
        let id = engine
            .submit(ALGORITHM, "Diamond", program, RunParams::new("s", "t"))
            .await
            .unwrap();

        let status = engine.wait(id).await.unwrap();
        assert_eq!(status.state, RunState::Done);
        assert_eq!(status.globals.keys().collect::<Vec<_>>(), vec!["relabels"]);
        assert_eq!(status.globals["relabels"], status.stats.relabels);
    }
}
