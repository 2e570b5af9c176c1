//! # cadence-metrics
//!
//! Performance tracking for the Cadence orchestration kernel.

mod tracker;

pub use tracker::{MetricSample, PerformanceReport, PerformanceTracker, Trend};
