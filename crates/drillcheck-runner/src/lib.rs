//! drillcheck-runner: Sandboxed SQL and Python execution.
//!
//! Implements the core [`SqlEngine`](drillcheck_core::traits::SqlEngine) and
//! [`PythonEngine`](drillcheck_core::traits::PythonEngine) traits by driving
//! the `sqlite3` shell and a Python interpreter as subprocesses, each run in
//! a throwaway sandbox directory with a timeout.

pub mod python;
pub mod sandbox;
pub mod sqlite;

pub use python::PythonProcessEngine;
pub use sqlite::SqliteCliEngine;

use drillcheck_core::config::RunnerConfig;

/// Build both engines from runner settings.
pub fn engines_from_config(config: &RunnerConfig) -> (SqliteCliEngine, PythonProcessEngine) {
    (
        SqliteCliEngine::new(config.sqlite_binary.clone()),
        PythonProcessEngine::new(config.python_binary.clone()),
    )
}
