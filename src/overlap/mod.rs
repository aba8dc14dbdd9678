//! Overlap module: ghost cells and mirror lists of a partitioned forest.
//!
//! This module re-exports the [`ghost`] submodule; [`perf`] holds the hash set alias used
//! in hot lookups.

pub mod ghost;
pub mod perf;

pub use ghost::{GhostCell, GhostLayer};
