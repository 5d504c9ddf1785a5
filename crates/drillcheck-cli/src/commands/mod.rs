//! Subcommand implementations.

pub mod compare;
pub mod concept;
pub mod grade;
pub mod init;
pub mod lint_sql;
pub mod review;
pub mod validate;

use std::path::Path;

use anyhow::Result;

use drillcheck_core::model::ChallengeSet;
use drillcheck_core::parser;

/// Load one challenge-set file.
pub(crate) fn load_set(path: &Path) -> Result<ChallengeSet> {
    parser::parse_challenge_set(path)
}
