//! Throwaway working directory for running a submission.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use drillcheck_core::error::ExecutionError;

/// Environment variables blanked for every child process.
const SENSITIVE_VARS: &[&str] = &[
    "SSH_AUTH_SOCK",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "DOCKER_HOST",
    "DOCKER_CONFIG",
    "KUBECONFIG",
    "DATABASE_URL",
    "NPM_TOKEN",
    "PYTHONPATH",
    "PYTHONSTARTUP",
];

/// A sandbox directory for one execution.
///
/// On drop, the temporary directory is automatically cleaned up.
pub struct Sandbox {
    work_dir: TempDir,
    timeout: Duration,
}

impl Sandbox {
    pub fn new(timeout: Duration) -> Result<Self> {
        let work_dir = TempDir::new().context("failed to create temp directory")?;
        Ok(Self { work_dir, timeout })
    }

    /// Get the path to the sandbox working directory.
    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write a file into the sandbox, returning its path.
    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.work_dir.path().join(name);
        std::fs::write(&path, contents).with_context(|| format!("failed to write {name}"))?;
        Ok(path)
    }

    /// Build environment variables for child processes.
    ///
    /// Restricts access to sensitive env vars and keeps the interpreter
    /// from writing bytecode caches.
    pub fn build_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            (
                "HOME".to_string(),
                self.work_dir.path().to_string_lossy().to_string(),
            ),
        ];
        for var in SENSITIVE_VARS {
            env.push((var.to_string(), String::new()));
        }
        env
    }

    /// Run `program` in the sandbox, feeding `stdin` if given.
    ///
    /// A missing program becomes [`ExecutionError::Unavailable`] and an
    /// overrun becomes [`ExecutionError::Timeout`]; the child is killed in
    /// that case. A non-zero exit is returned as a normal [`Output`].
    pub async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(self.work_dir())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, val) in self.build_env() {
            cmd.env(&key, &val);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExecutionError::Unavailable(format!("{program} not found")).into());
            }
            Err(e) => {
                return Err(ExecutionError::Unavailable(format!("failed to start {program}: {e}")).into());
            }
        };

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .with_context(|| format!("failed to write stdin of {program}"))?;
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("failed to wait for {program}")),
            Err(_) => {
                tracing::debug!(program, timeout_ms = self.timeout.as_millis() as u64, "execution timed out");
                Err(ExecutionError::Timeout(self.timeout.as_millis() as u64).into())
            }
        }
    }
}

/// Last non-empty line of stderr, or a generic message.
pub(crate) fn last_stderr_line(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("process exited with an error")
        .to_string()
}
