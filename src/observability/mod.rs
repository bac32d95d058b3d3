// Observability: Prometheus metrics recorded by each pipeline stage

pub mod metrics;

// Re-export main functions for ease of use
pub use metrics::{init, render};
