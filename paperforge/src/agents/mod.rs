//! Pipeline stages backed by the generation service or the sandbox.
//!
//! Each agent owns its prompt settings and mutates the run record in place.
//! Only the coder propagates generation failures; every other stage has a
//! defined fallback so the run always makes progress.

pub mod coder;
pub mod debugger;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod reviewer;
