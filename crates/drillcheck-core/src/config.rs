//! Configuration loading.
//!
//! Search order:
//! 1. an explicit path (must exist)
//! 2. `drillcheck.toml` in the current directory
//! 3. `~/.config/drillcheck/config.toml`
//!
//! Every field has a default, so a missing file yields a usable config.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::compare::DEFAULT_TOLERANCE;
use crate::concept::EvaluationOptions;
use crate::semantic::DEFAULT_SIMILARITY_THRESHOLD;

/// Environment override for the Ollama base URL.
pub const ENV_OLLAMA_URL: &str = "DRILLCHECK_OLLAMA_URL";
/// Environment override for the Python interpreter.
pub const ENV_PYTHON: &str = "DRILLCHECK_PYTHON";

/// Top-level drillcheck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrillcheckConfig {
    /// Concept evaluator options merged over the built-in defaults.
    #[serde(default)]
    pub evaluation: EvaluationOptions,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
}

/// Execution and grading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_sqlite_binary")]
    pub sqlite_binary: String,
    /// Python interpreter. Looked up on the PATH when unset.
    #[serde(default)]
    pub python_binary: Option<String>,
    #[serde(default = "default_sql_timeout")]
    pub sql_timeout_ms: u64,
    #[serde(default = "default_python_timeout")]
    pub python_timeout_ms: u64,
    /// Max challenges graded concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Grade Python challenges marked heavy.
    #[serde(default)]
    pub include_heavy: bool,
    /// Treat identifier issues as a failed SQL answer.
    #[serde(default)]
    pub strict_identifiers: bool,
    /// Absolute tolerance for numeric cells.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Directory for grade reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_sqlite_binary() -> String {
    "sqlite3".to_string()
}
fn default_sql_timeout() -> u64 {
    5000
}
fn default_python_timeout() -> u64 {
    2000
}
fn default_parallelism() -> usize {
    4
}
fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./drillcheck-results")
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sqlite_binary: default_sqlite_binary(),
            python_binary: None,
            sql_timeout_ms: default_sql_timeout(),
            python_timeout_ms: default_python_timeout(),
            parallelism: default_parallelism(),
            include_heavy: false,
            strict_identifiers: false,
            tolerance: default_tolerance(),
            output_dir: default_output_dir(),
        }
    }
}

/// Embedding-based semantic matching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            threshold: default_threshold(),
        }
    }
}

impl DrillcheckConfig {
    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if let Some(weights) = &self.evaluation.rubric_weights {
            weights.validate()?;
        }
        ensure!(self.runner.parallelism > 0, "runner.parallelism must be at least 1");
        ensure!(
            self.runner.tolerance.is_finite() && self.runner.tolerance >= 0.0,
            "runner.tolerance must be a non-negative number"
        );
        ensure!(
            (0.0..=1.0).contains(&self.semantic.threshold),
            "semantic.threshold must be between 0 and 1"
        );
        Ok(())
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_config_env(config: &mut DrillcheckConfig) {
    config.runner.sqlite_binary = resolve_env_vars(&config.runner.sqlite_binary);
    config.runner.python_binary = config
        .runner
        .python_binary
        .as_deref()
        .map(resolve_env_vars);
    config.semantic.base_url = resolve_env_vars(&config.semantic.base_url);
    config.semantic.model = resolve_env_vars(&config.semantic.model);
}

fn apply_env_overrides(config: &mut DrillcheckConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_OLLAMA_URL).filter(|v| !v.is_empty()) {
        config.semantic.base_url = url;
    }
    if let Some(python) = lookup(ENV_PYTHON).filter(|v| !v.is_empty()) {
        config.runner.python_binary = Some(python);
    }
}

/// Load configuration from the default locations.
pub fn load_config() -> Result<DrillcheckConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<DrillcheckConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("drillcheck.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            tracing::debug!("loading config from {}", path.display());
            toml::from_str::<DrillcheckConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => DrillcheckConfig::default(),
    };

    resolve_config_env(&mut config);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("drillcheck"))
}
