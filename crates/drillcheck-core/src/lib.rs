//! drillcheck-core: Answer evaluation, identifier resolution and grading.
//!
//! This crate defines the challenge model, the concept evaluator, the SQL
//! identifier resolver, the result comparator and the grading engine that
//! the rest of drillcheck builds on.

pub mod compare;
pub mod concept;
pub mod config;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod model;
pub mod parser;
pub mod report;
pub mod review;
pub mod semantic;
pub mod sql;
pub mod text;
pub mod traits;
