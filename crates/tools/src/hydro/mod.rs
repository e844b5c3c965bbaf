//! Hydrology pipelines

mod flatten;

pub use flatten::{run, FlattenParams};
