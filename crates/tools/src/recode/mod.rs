//! Recode pipelines

mod attr;

pub use attr::{output_names, run, separator_byte, RecodeAttrParams};
