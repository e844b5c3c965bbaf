//! # GrassKit Tools
//!
//! Addon tool pipelines for the GrassKit CLI. Each module family holds one
//! standalone pipeline: a fixed, linear sequence of engine module calls with
//! parameter validation up front and temporary-layer cleanup guaranteed by
//! the shared [`Context`](grasskit_core::Context).
//!
//! None of these pipelines computes on pixel or geometry data itself; the
//! flood-fill interpolation, connected-component labeling, and zonal
//! aggregation all happen inside the engine. What lives here is the
//! orchestration: which module runs when, with which named inputs and
//! outputs, and what happens to the intermediate names afterwards.

pub mod gbif;
pub mod hydro;
pub mod maxent;
pub mod plot;
pub mod recode;
pub mod similarity;
pub mod slopeunits;
