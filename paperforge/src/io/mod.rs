//! I/O adapters: processes, files, the generation backend and publishing.

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod document;
pub mod git;
pub mod process;
pub mod project;
pub mod prompt;
pub mod publish;
pub mod resolver;
pub mod sandbox;
pub mod stage_log;
