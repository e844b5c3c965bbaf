//! Maxent integration
//!
//! The species distribution modeling itself runs entirely inside the Maxent
//! JAR; these modules locate a working Java runtime and the JAR, move
//! rasters in and out of the plain-text grid format Maxent reads, and turn
//! known failure signatures into usable diagnostics.

mod java;
mod predict;
mod setup;

pub use java::{addon_base, java_functional, resolve_java, ADDON_BASE_ENV, JAVA_PATH_FILE};
pub use predict::{run as predict, PredictInputs, PredictParams};
pub use setup::{run as setup, SetupParams};
