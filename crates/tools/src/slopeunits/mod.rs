//! Slope-unit segmentation pipelines

mod metrics;

pub use metrics::{run, MetricsParams, SlopeUnitMetrics};
