//! Species occurrence imports

mod import;

pub use import::{requote, run, GbifImportParams};
