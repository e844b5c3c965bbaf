//! Scoped region override
//!
//! The active computational region is process-wide engine state, mutated in
//! place. Every sub-computation that needs a different extent saves the
//! current region to a named snapshot, applies its override, and restores
//! the snapshot when done. `RegionGuard` makes the restore unconditional:
//! it runs on drop, so the region is put back on every exit path of the
//! enclosing stage, including failures. Guards nest LIFO.

use tracing::warn;

use crate::context::Context;
use crate::engine::{parse_key_val, ModuleCall};
use crate::error::{Error, Result};
use crate::temp::{unique_name, TempKind};

/// Snapshot of the active spatial extent and resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionInfo {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub nsres: f64,
    pub ewres: f64,
    pub rows: u64,
    pub cols: u64,
}

impl RegionInfo {
    /// Parse the `key=value` output of `g.region -g`.
    pub fn parse(output: &str) -> Result<Self> {
        let map = parse_key_val(output);
        let field = |key: &'static str| -> Result<f64> {
            map.get(key)
                .ok_or(Error::Parse {
                    what: "region",
                    detail: format!("missing field '{key}'"),
                })?
                .parse::<f64>()
                .map_err(|e| Error::Parse {
                    what: "region",
                    detail: format!("field '{key}': {e}"),
                })
        };
        Ok(Self {
            north: field("n")?,
            south: field("s")?,
            east: field("e")?,
            west: field("w")?,
            nsres: field("nsres")?,
            ewres: field("ewres")?,
            rows: field("rows")? as u64,
            cols: field("cols")? as u64,
        })
    }

    /// Mean of the north-south and east-west resolutions.
    pub fn mean_resolution(&self) -> f64 {
        (self.nsres + self.ewres) / 2.0
    }

    /// Area of one cell in map units.
    pub fn cell_area(&self) -> f64 {
        self.nsres * self.ewres
    }
}

/// What to set the region to.
#[derive(Debug, Clone)]
pub enum RegionTarget {
    /// A saved, named region.
    Named(String),
    /// The extent and resolution of a raster layer.
    Raster(String),
    /// The extent of a vector layer, aligned to a raster's grid.
    VectorAligned { vector: String, align: String },
}

impl RegionTarget {
    fn to_call(&self) -> ModuleCall {
        match self {
            RegionTarget::Named(region) => ModuleCall::new("g.region").option("region", region),
            RegionTarget::Raster(raster) => ModuleCall::new("g.region").option("raster", raster),
            RegionTarget::VectorAligned { vector, align } => ModuleCall::new("g.region")
                .option("vector", vector)
                .option("align", align),
        }
    }
}

/// Restores the saved region when dropped.
#[must_use = "dropping the guard immediately restores the previous region"]
pub struct RegionGuard<'a> {
    ctx: &'a Context,
    saved: String,
    restored: bool,
}

impl RegionGuard<'_> {
    /// Restore the saved region now, propagating any engine error.
    ///
    /// Prefer this over relying on drop when the caller can still report
    /// errors; drop-time restoration only logs failures.
    pub fn pop(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        self.ctx
            .run(&ModuleCall::new("g.region").option("region", &self.saved))
    }
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!(region = %self.saved, error = %e, "failed to restore region");
        }
    }
}

impl Context {
    /// Read the active region.
    pub fn region_info(&self) -> Result<RegionInfo> {
        let output = self.read(&ModuleCall::new("g.region").flag('g'))?;
        RegionInfo::parse(&output)
    }

    /// Read the active region with resolutions reported in meters.
    pub fn region_info_meters(&self) -> Result<RegionInfo> {
        let output = self.read(&ModuleCall::new("g.region").flag('g').flag('m'))?;
        RegionInfo::parse(&output)
    }

    /// Save the active region under a tracked temporary name.
    pub fn save_region(&self, prefix: &str) -> Result<String> {
        let name = self.register(unique_name(prefix), TempKind::Region);
        self.run(&ModuleCall::new("g.region").option("save", &name))?;
        Ok(name)
    }

    /// Set the region without saving the previous one.
    pub fn apply_region(&self, target: &RegionTarget) -> Result<()> {
        self.run(&target.to_call())
    }

    /// Save the active region, apply `target`, and return a guard that
    /// restores the saved region when dropped.
    pub fn push_region(&self, target: &RegionTarget) -> Result<RegionGuard<'_>> {
        let saved = self.save_region("region")?;
        self.apply_region(target)?;
        Ok(RegionGuard {
            ctx: self,
            saved,
            restored: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::shared_context;

    const REGION_G: &str = "projection=99\nzone=0\nn=220750\ns=219950\nw=637500\ne=639000\nnsres=10\newres=10\nrows=80\ncols=150\ncells=12000\n";

    #[test]
    fn parses_region_output() {
        let info = RegionInfo::parse(REGION_G).unwrap();
        assert_eq!(info.rows, 80);
        assert_eq!(info.cols, 150);
        assert!((info.mean_resolution() - 10.0).abs() < 1e-12);
        assert!((info.cell_area() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn parse_rejects_missing_fields() {
        assert!(RegionInfo::parse("n=1\ns=0\n").is_err());
    }

    #[test]
    fn guard_restores_on_drop_with_lifo_nesting() {
        let (ctx, session) = shared_context();
        {
            let outer = ctx
                .push_region(&RegionTarget::Raster("dem".to_string()))
                .unwrap();
            {
                let _inner = ctx
                    .push_region(&RegionTarget::Named("reference".to_string()))
                    .unwrap();
            }
            outer.pop().unwrap();
        }

        let log = session.log();
        // save outer, apply outer, save inner, apply inner, restore inner,
        // restore outer
        assert_eq!(log.len(), 6);
        assert!(log[0].starts_with("g.region save=region_"));
        assert!(log[1].starts_with("g.region raster=dem"));
        assert!(log[2].starts_with("g.region save=region_"));
        assert_eq!(log[3], "g.region region=reference");
        let inner_saved = log[2].trim_start_matches("g.region save=").to_string();
        let outer_saved = log[0].trim_start_matches("g.region save=").to_string();
        assert_eq!(log[4], format!("g.region region={inner_saved}"));
        assert_eq!(log[5], format!("g.region region={outer_saved}"));
    }

    #[test]
    fn explicit_pop_restores_once() {
        let (ctx, session) = shared_context();
        let guard = ctx
            .push_region(&RegionTarget::Named("proj".to_string()))
            .unwrap();
        guard.pop().unwrap();
        // Two setup calls plus exactly one restore.
        assert_eq!(session.log().len(), 3);
    }
}
