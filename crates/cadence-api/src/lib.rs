//! # cadence-api
//!
//! The assembled kernel and its tool surface. [`CadenceKernel`] wires the
//! engines to shared resource pools, checkpoints, and metrics;
//! [`ToolRouter`] exposes them as named tools with JSON arguments.

pub mod kernel;
pub mod router;

pub use kernel::{CadenceKernel, KernelStrategies};
pub use router::{ToolRequest, ToolResponse, ToolRouter};
