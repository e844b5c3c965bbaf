//! Environmental similarity pipelines

mod mess;

pub use mess::{run, MessParams, ReferenceSample};
