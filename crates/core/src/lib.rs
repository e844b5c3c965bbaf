//! # GrassKit Core
//!
//! Engine session layer and shared orchestration primitives for the GrassKit
//! addon tools.
//!
//! This crate provides:
//! - `Engine` / `ModuleCall`: typed module invocations against the engine
//! - `Context`: per-invocation state with guaranteed temporary cleanup
//! - `RegionGuard`: scoped override of the active computational region
//! - `RecodeTable` / `FrequencyTable`: rule files built from engine output
//! - `StreamedCommand`: external processes with streamed diagnostics
//! - Finalization helpers for color tables and layer metadata

pub mod context;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod region;
pub mod rules;
pub mod stats;
pub mod subprocess;
pub mod temp;

pub use context::Context;
pub use engine::{mapcalc, Engine, GrassSession, ModuleCall};
pub use error::{Error, Result};
pub use region::{RegionGuard, RegionInfo, RegionTarget};
pub use temp::TempKind;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::context::Context;
    pub use crate::engine::{mapcalc, Engine, ModuleCall};
    pub use crate::error::{Error, Result};
    pub use crate::region::{RegionGuard, RegionInfo, RegionTarget};
    pub use crate::temp::TempKind;
}
