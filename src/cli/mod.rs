//! CLI surface: argument parsing and per-command entry points.

pub mod args;
pub mod cpus;
pub mod daemon;
pub mod exec;
