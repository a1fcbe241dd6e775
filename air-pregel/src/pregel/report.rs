//! Run reports
//!
//! Vertices and the engine emit leveled reports that are surfaced through
//! run status. Annotations carry structured context such as the vertex and
//! phase a report concerns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Fatal,
    Error,
    Warn,
    Info,
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportLevel::Fatal => "fatal",
            ReportLevel::Error => "error",
            ReportLevel::Warn => "warn",
            ReportLevel::Info => "info",
        };
        f.write_str(name)
    }
}

/// A single report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub level: ReportLevel,
    pub msg: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

impl Report {
    pub fn new(level: ReportLevel, msg: impl Into<String>) -> Self {
        Self {
            level,
            msg: msg.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::new(ReportLevel::Fatal, msg)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(ReportLevel::Error, msg)
    }

    pub fn warn(msg: impl Into<String>) -> Self {
        Self::new(ReportLevel::Warn, msg)
    }

    pub fn info(msg: impl Into<String>) -> Self {
        Self::new(ReportLevel::Info, msg)
    }

    /// Attach a structured annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.annotations.insert(key.into(), value);
        self
    }

    /// Whether the report signals a failure
    pub fn is_failure(&self) -> bool {
        matches!(self.level, ReportLevel::Fatal | ReportLevel::Error)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.msg)?;
        for (key, value) in &self.annotations {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}
