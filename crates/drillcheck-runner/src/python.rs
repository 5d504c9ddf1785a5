//! Python engine running submissions through a local interpreter.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use drillcheck_core::error::ExecutionError;
use drillcheck_core::interpreter::SharedHandle;
use drillcheck_core::model::CapturedOutput;
use drillcheck_core::traits::{PythonEngine, PythonRequest};

use crate::sandbox::{last_stderr_line, Sandbox};

/// Timeout used when a request carries none.
pub const DEFAULT_PYTHON_TIMEOUT_MS: u64 = 2000;

/// Source patterns rejected before a submission runs.
pub const FORBIDDEN_PATTERNS: &[&str] = &[
    r"\bimport\s+os\b",
    r"\bimport\s+sys\b",
    r"\bimport\s+subprocess\b",
    r"\bimport\s+urllib\b",
    r"\bimport\s+requests\b",
    r"\bopen\s*\(",
];

static FORBIDDEN: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    FORBIDDEN_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

const CANDIDATES: &[&str] = &["python3", "python"];

/// Runs scripts with a Python interpreter located on first use.
pub struct PythonProcessEngine {
    configured: Option<String>,
    interpreter: SharedHandle<String>,
}

impl Default for PythonProcessEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PythonProcessEngine {
    /// Use `binary` when given, otherwise try `python3` then `python`.
    pub fn new(binary: Option<String>) -> Self {
        Self {
            configured: binary,
            interpreter: SharedHandle::new(),
        }
    }

    /// The interpreter path, locating it if no caller has yet.
    pub async fn interpreter(&self) -> Result<&str> {
        let configured = self.configured.clone();
        let found = self
            .interpreter
            .get_or_try_init(|| locate_interpreter(configured))
            .await?;
        Ok(found.as_str())
    }
}

async fn locate_interpreter(configured: Option<String>) -> Result<String> {
    let candidates: Vec<String> = match configured {
        Some(binary) => vec![binary],
        None => CANDIDATES.iter().map(|c| c.to_string()).collect(),
    };
    for candidate in &candidates {
        let check = tokio::process::Command::new(candidate)
            .arg("--version")
            .output()
            .await;
        match check {
            Ok(output) if output.status.success() => {
                tracing::debug!(interpreter = %candidate, "located python interpreter");
                return Ok(candidate.clone());
            }
            _ => tracing::debug!(interpreter = %candidate, "python interpreter check failed"),
        }
    }
    Err(ExecutionError::Unavailable(format!(
        "no python interpreter found (tried {})",
        candidates.join(", ")
    ))
    .into())
}

/// Reject sources that touch the host system.
pub fn check_forbidden(code: &str) -> Result<(), ExecutionError> {
    for (pattern, re) in FORBIDDEN_PATTERNS.iter().zip(FORBIDDEN.iter()) {
        if re.is_match(code) {
            return Err(ExecutionError::Forbidden(format!(
                "source matches disallowed pattern {pattern}"
            )));
        }
    }
    Ok(())
}

/// Prepend the loader that binds the fixture to `raw_data`.
///
/// Quotes are written as JSON unicode escapes so the payload cannot close
/// the raw triple-quoted string.
pub fn build_script(code: &str, data: Option<&Value>) -> Result<String> {
    let Some(data) = data else {
        return Ok(code.to_string());
    };
    let json = serde_json::to_string(data)?.replace('\'', "\\u0027");
    Ok(format!(
        "import json\nraw_data = json.loads(r'''{json}''')\n{code}"
    ))
}

fn classify_error(stderr: &[u8]) -> ExecutionError {
    let line = last_stderr_line(stderr);
    if line.starts_with("SyntaxError") || line.starts_with("IndentationError") || line.starts_with("TabError") {
        ExecutionError::Syntax(line)
    } else {
        ExecutionError::Runtime(line)
    }
}

#[async_trait]
impl PythonEngine for PythonProcessEngine {
    fn name(&self) -> &str {
        "python"
    }

    async fn run(&self, request: &PythonRequest) -> Result<CapturedOutput> {
        check_forbidden(&request.code)?;
        let interpreter = self.interpreter().await?;

        let timeout_ms = if request.timeout_ms > 0 {
            request.timeout_ms
        } else {
            DEFAULT_PYTHON_TIMEOUT_MS
        };
        let sandbox = Sandbox::new(Duration::from_millis(timeout_ms))?;
        sandbox.write_file("main.py", &build_script(&request.code, request.data.as_ref())?)?;

        let start = Instant::now();
        let output = sandbox.run(interpreter, &["-I", "main.py"], None).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            return Err(classify_error(&output.stderr).into());
        }
        Ok(CapturedOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn engine_if_available() -> Option<PythonProcessEngine> {
        let engine = PythonProcessEngine::default();
        engine.interpreter().await.ok()?;
        Some(engine)
    }

    fn request(code: &str, data: Option<Value>) -> PythonRequest {
        PythonRequest {
            code: code.to_string(),
            data,
            timeout_ms: 2000,
        }
    }

    #[test]
    fn forbidden_patterns_are_word_bounded() {
        assert!(check_forbidden("import os\nprint(1)").is_err());
        assert!(check_forbidden("import  subprocess").is_err());
        assert!(check_forbidden("f = open ('x')").is_err());
        assert!(check_forbidden("import osmosis").is_ok());
        assert!(check_forbidden("reopen_count = 1").is_ok());
        assert!(check_forbidden("import json\nprint(sum([1, 2]))").is_ok());
    }

    #[test]
    fn fixture_prelude_is_prepended() {
        let script = build_script("print(len(raw_data))", Some(&json!([1, 2, 3]))).unwrap();
        assert_eq!(
            script,
            "import json\nraw_data = json.loads(r'''[1,2,3]''')\nprint(len(raw_data))"
        );
        assert_eq!(build_script("print(1)", None).unwrap(), "print(1)");
    }

    #[test]
    fn fixture_quotes_are_escaped() {
        let script = build_script("pass", Some(&json!({"name": "it'''s"}))).unwrap();
        assert!(!script.contains("it'''s"));
        assert!(script.contains(r"it\u0027\u0027\u0027s"));
    }

    #[test]
    fn stderr_is_classified() {
        let syntax = classify_error(b"  File \"main.py\", line 1\n    print(\nSyntaxError: '(' was never closed\n");
        assert!(matches!(syntax, ExecutionError::Syntax(_)));
        let runtime = classify_error(b"Traceback (most recent call last):\nZeroDivisionError: division by zero\n");
        assert!(matches!(runtime, ExecutionError::Runtime(_)));
    }

    #[tokio::test]
    async fn forbidden_code_never_runs() {
        let engine = PythonProcessEngine::new(Some("drillcheck-no-such-python".into()));
        let err = engine.run(&request("import os", None)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Forbidden(_))
        ));
        assert!(engine.interpreter.get().is_none());
    }

    #[tokio::test]
    async fn missing_interpreter_is_unavailable() {
        let engine = PythonProcessEngine::new(Some("drillcheck-no-such-python".into()));
        let err = engine.run(&request("print(1)", None)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn runs_with_fixture() {
        let Some(engine) = engine_if_available().await else {
            return;
        };
        let output = engine
            .run(&request("print(sum(raw_data['values']))", Some(json!({"values": [1, 2, 3]}))))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "6");
    }

    #[tokio::test]
    async fn runtime_errors_are_user_errors() {
        let Some(engine) = engine_if_available().await else {
            return;
        };
        let err = engine.run(&request("print(1 / 0)", None)).await.unwrap_err();
        let exec = err.downcast_ref::<ExecutionError>().unwrap();
        assert!(matches!(exec, ExecutionError::Runtime(msg) if msg.contains("ZeroDivisionError")));
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let Some(engine) = engine_if_available().await else {
            return;
        };
        let mut req = request("while True:\n    pass", None);
        req.timeout_ms = 300;
        let err = engine.run(&req).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExecutionError>(),
            Some(ExecutionError::Timeout(300))
        ));
    }
}
