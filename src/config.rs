//! # Configuration Module
//!
//! Driver settings loaded from `AIR_*` environment variables (and a `.env`
//! file when present). Command-line arguments override them in `main`.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use air_pregel::DEFAULT_MAX_GSS;

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for the max-flow driver.
#[derive(Debug, Clone)]
pub struct Config {
    /// Superstep budget of a run
    pub max_gss: usize,

    /// Vertex attribute that receives each vertex's edge flows
    pub result_field: String,

    /// How often run status is polled
    pub poll_interval: Duration,

    /// Concurrent vertex computations per superstep
    pub parallelism: usize,

    /// Use the built-in flow accumulator instead of shipping its programs
    pub native_accumulators: bool,

    /// Directory for file checkpoints; checkpointing is off when unset
    pub checkpoint_dir: Option<PathBuf>,

    /// Supersteps between checkpoints
    pub checkpoint_interval: usize,

    /// Newest checkpoints kept per run (0 = keep all)
    pub checkpoint_retention: usize,

    /// Log level for the application
    pub log_level: String,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for Config {
    fn default() -> Self {
        Self {
            max_gss: DEFAULT_MAX_GSS,
            result_field: "flow".to_string(),
            poll_interval: Duration::from_millis(50),
            parallelism: air_pregel::PregelConfig::default().parallelism,
            native_accumulators: false,
            checkpoint_dir: None,
            checkpoint_interval: 10,
            checkpoint_retention: 0,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
fn parse_var<T>(name: &str, hint: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be {}", name, hint)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Some(val) = parse_var("AIR_MAX_GSS", "a positive integer")? {
            config.max_gss = val;
        }

        if let Ok(val) = env::var("AIR_RESULT_FIELD") {
            config.result_field = val;
        }

        if let Some(millis) = parse_var::<u64>("AIR_POLL_INTERVAL_MS", "a number of milliseconds")? {
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Some(val) = parse_var("AIR_PARALLELISM", "a positive integer")? {
            config.parallelism = val;
        }

        if let Some(val) = parse_var("AIR_NATIVE_ACCUMULATORS", "true or false")? {
            config.native_accumulators = val;
        }

        if let Ok(val) = env::var("AIR_CHECKPOINT_DIR") {
            config.checkpoint_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = parse_var("AIR_CHECKPOINT_INTERVAL", "a positive integer")? {
            config.checkpoint_interval = val;
        }

        if let Some(val) = parse_var("AIR_CHECKPOINT_RETENTION", "a number of checkpoints")? {
            config.checkpoint_retention = val;
        }

        if let Ok(val) = env::var("AIR_LOG_LEVEL") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration before anything is submitted.
    pub fn validate(&self) -> Result<()> {
        if self.max_gss == 0 {
            anyhow::bail!("maxGSS must be at least 1");
        }

        if self.result_field.trim().is_empty() {
            anyhow::bail!("AIR_RESULT_FIELD cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be positive");
        }

        if self.parallelism == 0 {
            anyhow::bail!("AIR_PARALLELISM must be at least 1");
        }

        if self.checkpoint_dir.is_some() && self.checkpoint_interval == 0 {
            anyhow::bail!("AIR_CHECKPOINT_INTERVAL must be at least 1 when checkpointing");
        }

        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("Unknown log level: {}", self.log_level))?;

        Ok(())
    }
}
