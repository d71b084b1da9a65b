//! Metrics collection for cadence.
//!
//! This crate provides a unified metrics interface using the `metrics` crate facade.
//! Recording is a no-op until the embedding process installs a recorder
//! (Prometheus, StatsD, ...); exporting is left to the host.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cadence_metrics::{counter, scheduler, labels};
//!
//! counter!(scheduler::EXECUTIONS_TOTAL, labels::JOB => "post-interest").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
