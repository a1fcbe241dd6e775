//! Run status as reported by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::pregel::{Report, ReportLevel};

pub type RunId = Uuid;

/// Source and sink of a max-flow run, as vertex keys or full ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    #[serde(rename = "s")]
    pub source: String,
    #[serde(rename = "t")]
    pub sink: String,
}

impl RunParams {
    pub fn new(source: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sink: sink.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Loading,
    Running,
    Storing,
    Done,
    Canceled,
    Fatal,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Canceled | RunState::Fatal)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Loading => "loading",
            RunState::Running => "running",
            RunState::Storing => "storing",
            RunState::Done => "done",
            RunState::Canceled => "canceled",
            RunState::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub vertex_count: usize,
    pub edge_count: usize,
    pub supersteps: usize,
    pub pushes: usize,
    pub relabels: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_flow: Option<f64>,
}

/// Snapshot of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub id: RunId,
    pub algorithm: String,
    pub graph: String,
    pub state: RunState,
    /// Current global superstep
    pub gss: usize,
    pub phase: String,
    pub reports: Vec<Report>,
    pub stats: RunStats,
    /// Final values of the program's declared global accumulators
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub globals: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    pub fn new(id: RunId, algorithm: impl Into<String>, graph: impl Into<String>) -> Self {
        Self {
            id,
            algorithm: algorithm.into(),
            graph: graph.into(),
            state: RunState::Loading,
            gss: 0,
            phase: String::new(),
            reports: Vec::new(),
            stats: RunStats::default(),
            globals: BTreeMap::new(),
            error: None,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Reports at `level` or more severe
    pub fn reports_at_least(&self, level: ReportLevel) -> impl Iterator<Item = &Report> {
        self.reports.iter().filter(move |report| report.level <= level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_wire_format() {
        let params: RunParams = serde_json::from_value(json!({"s": "s", "t": "nodes/t"})).unwrap();
        assert_eq!(params, RunParams::new("s", "nodes/t"));
    }

    #[test]
    fn test_status_wire_format() {
        let mut status = RunStatus::new(Uuid::new_v4(), "air", "Diamond");
        status.stats.elapsed = Duration::from_millis(1500);
        status.reports.push(Report::warn("w"));
        status.reports.push(Report::info("i"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "loading");
        assert_eq!(json["stats"]["elapsed"], "1s 500ms");
        assert!(json.get("error").is_none());
        assert!(json.get("globals").is_none());

        assert_eq!(status.reports_at_least(ReportLevel::Warn).count(), 1);
        assert!(!status.is_terminal());
        assert!(RunState::Canceled.is_terminal());
        assert_eq!(RunState::Fatal.to_string(), "fatal");
    }
}
