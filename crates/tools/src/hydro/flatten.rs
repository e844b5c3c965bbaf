//! Water body elevation for hydro-flattening
//!
//! Derives a single elevation value per water body from binned lidar ground
//! returns. Water surfaces return almost no points, so water bodies appear
//! as no-data holes in the binned elevation raster: fill the small gaps,
//! take the remaining holes as water, grow a band of concentric one-cell
//! strips around each hole, and read the requested percentile of the filled
//! elevation in the outermost strip as that body's water level. Breakline
//! geometry can be fused into the band so adjacent bodies separated by a
//! breakline keep separate levels.

use grasskit_core::finalize::{apply_colors, command_history, write_metadata, ColorSource, LayerMetadata};
use grasskit_core::{Context, Error, ModuleCall, Result};
use tracing::info;

/// Cell distance within which `r.fill.stats` interpolates across no-data.
const FILL_DISTANCE: u32 = 3;
/// Minimum number of valid neighbor cells required for a fill.
const FILL_CELLS: u32 = 6;

#[derive(Debug, Clone)]
pub struct FlattenParams {
    /// Raster map of binned lidar point elevation.
    pub input: String,
    /// Vector map of breaklines.
    pub breaklines: Option<String>,
    /// Output raster with one elevation value per water body.
    pub water_elevation: String,
    /// Output raster with the per-body elevation standard deviation.
    pub water_elevation_stddev: String,
    /// Optional output merging the filled elevation with the water levels.
    pub filled_elevation: Option<String>,
    /// Percentile of band elevation used as the water level.
    pub percentile: f64,
    /// Minimum water body size in map units; smaller clusters are dropped.
    pub min_size: Option<f64>,
    /// Keep intermediate layers under `intermediate_*` names.
    pub keep_intermediates: bool,
}

pub fn run(ctx: &Context, params: &FlattenParams) -> Result<()> {
    if !(0.0..=100.0).contains(&params.percentile) {
        return Err(Error::InvalidParameter {
            name: "percentile",
            value: params.percentile.to_string(),
            reason: "must be between 0 and 100".to_string(),
        });
    }
    if !ctx.raster_exists(&params.input)? {
        return Err(Error::Precondition(format!(
            "input raster <{}> not found",
            params.input
        )));
    }

    // One more one-cell strip than r.fill.stats grows; the outermost strip
    // carries this category after buffering.
    let strip = FILL_DISTANCE + 2;
    let region = ctx.region_info()?;
    let resolution_m = ctx.region_info_meters()?.mean_resolution();

    let scratch = |base: &str| -> String {
        if params.keep_intermediates {
            format!("intermediate_{base}")
        } else {
            ctx.temp_raster(base)
        }
    };

    let breakline_rast = match &params.breaklines {
        Some(vector) => {
            let name = scratch("breaklines");
            ctx.run(
                &ModuleCall::new("v.to.rast")
                    .option("input", vector)
                    .option("output", &name)
                    .option("use", "val")
                    .option("value", 1000)
                    .flag('d'),
            )?;
            Some(name)
        }
        None => None,
    };

    info!("filling no-data gaps in {}", params.input);
    let filled = scratch("fillstats");
    ctx.run(
        &ModuleCall::new("r.fill.stats")
            .flag('k')
            .option("input", &params.input)
            .option("output", &filled)
            .option("distance", FILL_DISTANCE)
            .option("cells", FILL_CELLS),
    )?;

    let holes = scratch("holes");
    ctx.mapcalc(format!("{holes} = if(isnull({filled}), 1, null())"))?;

    info!("growing {} one-cell strips around each hole", strip - 1);
    let buffer = scratch("buffer");
    let distances: Vec<f64> = (1..strip).map(|i| f64::from(i) * resolution_m).collect();
    ctx.run(
        &ModuleCall::new("r.buffer")
            .option("input", &holes)
            .option("output", &buffer)
            .option_list("distances", &distances)
            .option("units", "meters"),
    )?;

    let buffer = if let Some(breaklines) = &breakline_rast {
        let patched = scratch("buffer_with_breaklines");
        ctx.run(
            &ModuleCall::new("r.patch")
                .option_list("input", &[breaklines.as_str(), buffer.as_str()])
                .option("output", &patched),
        )?;
        patched
    } else {
        buffer
    };

    let reclass = scratch("reclass_for_clump");
    ctx.write(
        &ModuleCall::new("r.reclass")
            .option("input", &buffer)
            .option("output", &reclass)
            .option("rules", "-"),
        &format!("1 thru {strip} = 1\n"),
    )?;
    let clump = scratch("clump");
    ctx.run(
        &ModuleCall::new("r.clump")
            .flag('d')
            .option("input", &reclass)
            .option("output", &clump),
    )?;
    let strip_map = scratch("strip");
    ctx.mapcalc(format!(
        "{strip_map} = if ({buffer} == {strip}, {clump}, null())"
    ))?;

    info!("deriving water levels per cluster");
    let band_elevation = scratch("water_elevation");
    ctx.run(
        &ModuleCall::new("r.stats.quantile")
            .option("base", &strip_map)
            .option("cover", &filled)
            .option("percentiles", params.percentile)
            .option("output", &band_elevation),
    )?;
    let band_stddev = scratch("water_stddev");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &strip_map)
            .option("cover", &filled)
            .option("method", "stddev")
            .option("output", &band_stddev),
    )?;

    // Broadcast the per-cluster scalars over the full water body footprint.
    let elevation_zonal = scratch("water_elevation_zonal");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &clump)
            .option("cover", &band_elevation)
            .option("method", "average")
            .option("output", &elevation_zonal),
    )?;
    let stddev_zonal = scratch("water_elevation_stddev_zonal");
    ctx.run(
        &ModuleCall::new("r.stats.zonal")
            .option("base", &clump)
            .option("cover", &band_stddev)
            .option("method", "average")
            .option("output", &stddev_zonal),
    )?;

    let elevation_res = scratch("water_elevation_zonal_res");
    if let Some(breaklines) = &breakline_rast {
        let gapped = scratch("water_elevation_zonal_res_breaklines");
        ctx.mapcalc(format!(
            "{gapped} = if (isnull({strip_map}), {elevation_zonal}, null())"
        ))?;
        // heal the breakline holes
        ctx.run(
            &ModuleCall::new("r.neighbors")
                .option("input", &gapped)
                .option("selection", breaklines)
                .option("output", &elevation_res)
                .option("size", 5),
        )?;
    } else {
        ctx.mapcalc(format!(
            "{elevation_res} = if (isnull({strip_map}), {elevation_zonal}, null())"
        ))?;
    }
    let stddev_res = scratch("water_elevation_stddev_zonal_res");
    ctx.mapcalc(format!(
        "{stddev_res} = if (isnull({strip_map}), {stddev_zonal}, null())"
    ))?;

    if let Some(min_size) = params.min_size {
        info!("dropping water bodies below {min_size} map units");
        let threshold = min_size / region.cell_area();
        let ones = scratch("reclass");
        ctx.write(
            &ModuleCall::new("r.reclass")
                .option("input", &elevation_res)
                .option("output", &ones)
                .option("rules", "-"),
            "* = 1\n",
        )?;
        let clusters = scratch("clump_reclass");
        ctx.run(
            &ModuleCall::new("r.clump")
                .option("input", &ones)
                .option("output", &clusters),
        )?;
        let size = scratch("size");
        ctx.run(
            &ModuleCall::new("r.stats.zonal")
                .option("base", &clusters)
                .option("cover", &ones)
                .option("method", "sum")
                .option("output", &size),
        )?;
        ctx.mapcalc(format!(
            "{} = if ({size} > {threshold}, {elevation_res}, null())",
            params.water_elevation
        ))?;
        ctx.mapcalc(format!(
            "{} = if ({size} > {threshold}, {stddev_res}, null())",
            params.water_elevation_stddev
        ))?;
    } else {
        ctx.mapcalc(format!("{} = {elevation_res}", params.water_elevation))?;
        ctx.mapcalc(format!(
            "{} = {stddev_res}",
            params.water_elevation_stddev
        ))?;
    }

    let history = command_history(
        "hydro-flatten",
        &[
            ("input", params.input.clone()),
            (
                "breaklines",
                params.breaklines.clone().unwrap_or_default(),
            ),
            ("percentile", params.percentile.to_string()),
            (
                "min_size",
                params.min_size.map(|s| s.to_string()).unwrap_or_default(),
            ),
        ],
    );
    apply_colors(ctx, &params.water_elevation, ColorSource::CopyFrom(&params.input))?;
    apply_colors(ctx, &params.water_elevation_stddev, ColorSource::Named("reds"))?;
    let metadata = LayerMetadata {
        history: Some(history),
        ..Default::default()
    };
    write_metadata(ctx, &params.water_elevation, &metadata)?;
    write_metadata(ctx, &params.water_elevation_stddev, &metadata)?;

    if let Some(filled_elevation) = &params.filled_elevation {
        ctx.run(
            &ModuleCall::new("r.patch")
                .option_list(
                    "input",
                    &[filled.as_str(), params.water_elevation.as_str()],
                )
                .option("output", filled_elevation),
        )?;
        apply_colors(ctx, filled_elevation, ColorSource::CopyFrom(&params.input))?;
        write_metadata(ctx, filled_elevation, &metadata)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_percentile() {
        let ctx = Context::new(Box::new(
            grasskit_core::engine::mock::MockSession::new(),
        ));
        let params = FlattenParams {
            input: "ground".to_string(),
            breaklines: None,
            water_elevation: "water".to_string(),
            water_elevation_stddev: "water_sd".to_string(),
            filled_elevation: None,
            percentile: 140.0,
            min_size: None,
            keep_intermediates: false,
        };
        let err = run(&ctx, &params).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "percentile", .. }));
    }
}
