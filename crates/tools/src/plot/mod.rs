//! Attribute plotting

mod boxplot;

pub use boxplot::{order_groups, run, summarize, BoxStats, BoxplotParams, SortOrder};
