//! Paper-to-repository pipeline.
//!
//! A run turns a research paper into a runnable Python project: parse the
//! paper, plan, generate code, execute it in a sandboxed project directory,
//! repair failures, review the result and optionally publish it. Two bounded
//! retry loops (repair inside review) keep every run finite.
//!
//! - **[`core`]**: Pure logic (routing, budgets, invariants, import and config
//!   analysis, project materialization, metric extraction). No I/O.
//! - **[`io`]**: Side effects (processes, the generation backend, files,
//!   configuration, git and publishing). Isolated behind traits for tests.
//! - **[`agents`]**: One type per stage, combining core logic with I/O.
//!
//! [`pipeline`] drives the stages over the routing graph.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
