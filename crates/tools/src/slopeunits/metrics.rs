//! Cohesion and anisotropy metrics over a slope-unit segmentation
//!
//! Two scalar metrics judge a candidate segmentation of a basin into slope
//! units (Espindola et al. 2006; Alvioli et al. 2016, 2020):
//!
//! - `V`: the area-weighted mean of the per-segment circular variance of
//!   terrain aspect. Low values mean aspect is homogeneous within segments.
//! - `I`: the mean alignment of the mean aspect directions of adjacent
//!   segments across their shared boundary, count-weighted over interior
//!   edges. High values mean neighboring segments look alike, so the
//!   segmentation is too fine.
//!
//! Aspect is decomposed into sine and cosine rasters; all aggregation runs
//! through the engine's zonal statistics and the vector attribute engine,
//! with polygon boundaries promoted to a second categorical layer carrying
//! left/right neighbor ids.

use std::f64::consts::PI;

use grasskit_core::{Context, Error, ModuleCall, RegionTarget, Result, TempKind};
use tracing::info;

#[derive(Debug, Clone)]
pub struct MetricsParams {
    /// Basin outline (vector).
    pub basin: String,
    /// Digital elevation model.
    pub demmap: String,
    /// Cleaned slope-unit segmentation (vector).
    pub slumapclean: String,
    /// Slope units smaller than this (map units) are removed first.
    pub cleansize: f64,
    /// Cell resolution in map units.
    pub resolution: f64,
}

/// The two segmentation metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopeUnitMetrics {
    pub v: f64,
    pub i: f64,
}

pub fn run(ctx: &Context, params: &MetricsParams) -> Result<SlopeUnitMetrics> {
    for vector in [&params.basin, &params.slumapclean] {
        if !ctx.vector_exists(vector)? {
            return Err(Error::Precondition(format!(
                "input vector <{vector}> not found"
            )));
        }
    }
    let guard = ctx.push_region(&RegionTarget::VectorAligned {
        vector: params.basin.clone(),
        align: params.demmap.clone(),
    })?;

    if ctx.mask_present()? {
        ctx.run(
            &ModuleCall::new("g.remove")
                .flag('f')
                .option("type", "raster")
                .option("name", "MASK"),
        )?;
    }
    ctx.register("MASK", TempKind::Raster);
    ctx.run(&ModuleCall::new("r.mask").option("vector", &params.basin))?;

    // Work on a copy of the segmentation; small units go before anything is
    // measured.
    let segments = ctx.temp_vector("segments");
    ctx.run(
        &ModuleCall::new("g.copy")
            .option("vector", format!("{},{segments}", params.slumapclean)),
    )?;
    ctx.run(
        &ModuleCall::new("v.db.dropcolumn")
            .option("map", &segments)
            .option("columns", "value,label,area"),
    )?;
    ctx.run(
        &ModuleCall::new("v.db.addcolumn")
            .option("map", &segments)
            .option("columns", "area real"),
    )?;
    ctx.run(
        &ModuleCall::new("v.to.db")
            .option("map", &segments)
            .option("option", "area")
            .option("columns", "area"),
    )?;
    ctx.run(&ModuleCall::new("db.execute").option(
        "sql",
        format!("DELETE FROM {segments} WHERE area < {}", params.cleansize),
    ))?;
    let cleaned = ctx.temp_vector("cleaned");
    ctx.run(
        &ModuleCall::new("v.clean")
            .option("input", &segments)
            .option("type", "area")
            .option("output", &cleaned)
            .option("tool", "rmarea")
            .option("threshold", params.cleansize),
    )?;

    if ctx.mask_present()? {
        ctx.run(
            &ModuleCall::new("g.remove")
                .flag('f')
                .option("type", "raster")
                .option("name", "MASK"),
        )?;
    }
    ctx.run(&ModuleCall::new("r.mask").option("vector", &cleaned))?;
    let segment_rast = ctx.temp_raster("segments");
    ctx.run(
        &ModuleCall::new("v.to.rast")
            .option("input", &cleaned)
            .option("output", &segment_rast)
            .option("use", "cat"),
    )?;

    info!("decomposing aspect into circular components");
    let aspect = ctx.temp_raster("aspect");
    ctx.run(
        &ModuleCall::new("r.slope.aspect")
            .option("elevation", &params.demmap)
            .option("aspect", &aspect),
    )?;
    // Map-algebra trigonometry works in degrees, matching the aspect raster.
    let aspect_cos = ctx.temp_raster("aspect_cos");
    ctx.mapcalc(format!("{aspect_cos} = cos({aspect})"))?;
    let aspect_sin = ctx.temp_raster("aspect_sin");
    ctx.mapcalc(format!("{aspect_sin} = sin({aspect})"))?;

    info!("zonal aspect sums per segment");
    let cell_count = ctx.temp_raster("cellcount");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &segment_rast)
            .option("cover", &segment_rast)
            .option("method", "count")
            .option("output", &cell_count),
    )?;
    let sum_cos = ctx.temp_raster("sumcos");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &segment_rast)
            .option("cover", &aspect_cos)
            .option("method", "sum")
            .option("output", &sum_cos),
    )?;
    let sum_sin = ctx.temp_raster("sumsin");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &segment_rast)
            .option("cover", &aspect_sin)
            .option("method", "sum")
            .option("output", &sum_sin),
    )?;
    let circular_variance = ctx.temp_raster("circvar");
    ctx.mapcalc(format!(
        "{circular_variance} = 1-((sqrt(({sum_sin})^2 + ({sum_cos})^2))/{cell_count})"
    ))?;

    info!("global aspect sums");
    let ones = ctx.temp_raster("ones");
    ctx.mapcalc(format!("{ones} = int({0}/{0})", params.demmap))?;
    let sum_cos_all = ctx.temp_raster("sumcos_all");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &ones)
            .option("cover", &aspect_cos)
            .option("method", "sum")
            .option("output", &sum_cos_all),
    )?;
    let sum_sin_all = ctx.temp_raster("sumsin_all");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &ones)
            .option("cover", &aspect_sin)
            .option("method", "sum")
            .option("output", &sum_sin_all),
    )?;

    info!("promoting segment boundaries to an edge layer");
    let edges = ctx.temp_vector("edges");
    ctx.run(
        &ModuleCall::new("v.category")
            .option("input", &cleaned)
            .option("output", &edges)
            .option("layer", 2)
            .option("type", "boundary")
            .option("option", "add"),
    )?;
    ctx.run(
        &ModuleCall::new("v.db.addtable")
            .option("map", &edges)
            .option("layer", 2)
            .option("columns", "left integer,right integer,length real"),
    )?;
    ctx.run(
        &ModuleCall::new("v.to.db")
            .option("map", &edges)
            .option("option", "sides")
            .option("columns", "left,right")
            .option("layer", 2)
            .option("type", "boundary"),
    )?;
    ctx.run(
        &ModuleCall::new("v.to.db")
            .option("map", &edges)
            .option("option", "length")
            .option("columns", "length")
            .option("layer", 2)
            .option("type", "boundary"),
    )?;

    // Mean resultant angles, degrees from the map algebra, converted to
    // radians for the SQL trigonometry below.
    let angle = ctx.temp_raster("angle");
    ctx.mapcalc(format!("{angle} = atan({sum_sin},{sum_cos})"))?;
    let angle_all = ctx.temp_raster("angle_all");
    ctx.mapcalc(format!("{angle_all} = atan({sum_sin_all},{sum_cos_all})"))?;
    let angle_rad = ctx.temp_raster("angle_rad");
    ctx.mapcalc(format!("{angle_rad} = {angle}*{PI}/180"))?;
    let angle_all_rad = ctx.temp_raster("angle_all_rad");
    ctx.mapcalc(format!("{angle_all_rad} = {angle_all}*{PI}/180"))?;

    for (raster, prefix) in [
        (&angle_rad, "a_i"),
        (&angle_all_rad, "a_all"),
        (&circular_variance, "v_i"),
    ] {
        ctx.run(
            &ModuleCall::new("v.rast.stats")
                .option("map", &edges)
                .option("raster", raster)
                .option("column_prefix", prefix)
                .option("method", "average"),
        )?;
        ctx.run(
            &ModuleCall::new("v.db.renamecolumn")
                .option("map", &edges)
                .option("column", format!("{prefix}_average,{prefix}")),
        )?;
    }
    ctx.run(&ModuleCall::new("db.execute").option(
        "sql",
        format!("UPDATE {edges} SET v_i = 0 WHERE v_i IS NULL"),
    ))?;
    let units = ctx.temp_vector("units");
    ctx.run(
        &ModuleCall::new("v.extract")
            .option("input", &edges)
            .option("where", "v_i>=0")
            .option("output", &units),
    )?;
    let edge_table = format!("{units}_edges");
    ctx.run(
        &ModuleCall::new("v.db.addtable")
            .option("map", &units)
            .option("table", &edge_table)
            .option("layer", 2),
    )?;

    info!("computing the area-weighted circular variance metric V");
    let cell_area = params.resolution * params.resolution;
    let numerator = ctx.temp_raster("v_num");
    ctx.mapcalc(format!("{numerator} = {cell_area}*{circular_variance}"))?;
    let denominator = ctx.temp_raster("v_den");
    ctx.mapcalc(format!("{denominator} = {cell_area}"))?;
    let v = univar_sum(ctx, &numerator)? / univar_sum(ctx, &denominator)?;
    info!("V: {v}");

    info!("computing the edge-alignment metric I");
    ctx.run(
        &ModuleCall::new("v.db.addcolumn")
            .option("map", &units)
            .option("layer", 2)
            .option(
                "columns",
                "ai real, aj real, aall real, ci real, si real, cj real, sj real, num real",
            ),
    )?;
    for sql in [
        format!("UPDATE {edge_table} SET ai = (SELECT a_i FROM {units} WHERE cat={edge_table}.left)"),
        format!("UPDATE {edge_table} SET aj = (SELECT a_i FROM {units} WHERE cat={edge_table}.right)"),
        format!("UPDATE {edge_table} SET aall = (SELECT a_all FROM {units} WHERE cat={edge_table}.right)"),
        format!("UPDATE {edge_table} SET ci = cos(atan((sin(ai)+sin(aall))/(cos(ai)+cos(aall))))"),
        format!("UPDATE {edge_table} SET si = sin(atan((sin(ai)+sin(aall))/(cos(ai)+cos(aall))))"),
        format!("UPDATE {edge_table} SET cj = cos(atan((sin(aj)+sin(aall))/(cos(aj)+cos(aall))))"),
        format!("UPDATE {edge_table} SET sj = sin(atan((sin(aj)+sin(aall))/(cos(aj)+cos(aall))))"),
        format!("UPDATE {edge_table} SET num = ci*cj+si*sj"),
    ] {
        ctx.run(&ModuleCall::new("db.execute").option("sql", sql))?;
    }
    let alignment_sum = select_scalar(
        ctx,
        &format!("SELECT sum(num) FROM {edge_table} WHERE left<>-1 AND right<>-1"),
    )?;
    let edge_count = select_scalar(
        ctx,
        &format!("SELECT count(*) FROM {edge_table} WHERE left<>-1 AND right<>-1"),
    )?;
    if edge_count == 0.0 {
        return Err(Error::Precondition(
            "the segmentation has no interior edges; cannot compute the alignment metric"
                .to_string(),
        ));
    }
    let i = alignment_sum / edge_count;
    info!("I: {i}");

    guard.pop()?;
    Ok(SlopeUnitMetrics { v, i })
}

fn univar_sum(ctx: &Context, raster: &str) -> Result<f64> {
    let output = ctx.read(&ModuleCall::new("r.univar").flag('g').option("map", raster))?;
    let map = grasskit_core::engine::parse_key_val(&output);
    map.get("sum")
        .ok_or(Error::Parse {
            what: "univariate statistics",
            detail: format!("no sum reported for <{raster}>"),
        })?
        .parse()
        .map_err(|e| Error::Parse {
            what: "univariate statistics",
            detail: format!("sum for <{raster}>: {e}"),
        })
}

fn select_scalar(ctx: &Context, sql: &str) -> Result<f64> {
    let output = ctx.read(
        &ModuleCall::new("db.select")
            .flag('c')
            .option("sql", sql),
    )?;
    output.trim().parse().map_err(|e| Error::Parse {
        what: "query result",
        detail: format!("'{}': {e}", output.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use grasskit_core::engine::mock::MockSession;
    use std::sync::Arc;

    #[test]
    fn metrics_are_ratios_of_engine_sums() {
        let session = Arc::new(MockSession::new());
        session.seed_layer("basin");
        session.seed_layer("units");
        // V numerator and denominator sums, then the two edge queries.
        session.respond("r.univar", "sum=12.5\n");
        session.respond("r.univar", "sum=50\n");
        session.respond("db.select", "7.2\n");
        session.respond("db.select", "9\n");
        let ctx = Context::new(Box::new(session.clone()));
        let params = MetricsParams {
            basin: "basin".to_string(),
            demmap: "dem".to_string(),
            slumapclean: "units".to_string(),
            cleansize: 25000.0,
            resolution: 10.0,
        };
        let metrics = run(&ctx, &params).unwrap();
        assert!((metrics.v - 0.25).abs() < 1e-12);
        assert!((metrics.i - 0.8).abs() < 1e-12);
        // The mask was the engine's singleton; it is tracked for cleanup.
        drop(ctx);
        assert!(!session.contains("MASK"));
    }
}
