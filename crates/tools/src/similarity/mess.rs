//! Multivariate environmental similarity surface
//!
//! For each environmental variable, the reference sample yields an empirical
//! cumulative-frequency distribution over a discretized integer domain. The
//! projection raster is recoded to the percentile each cell's value reaches
//! in that distribution, and the percentile maps to a similarity score:
//! 100 at the reference median, falling linearly to 0 at the observed
//! extremes, and extrapolating linearly below 0 outside the observed range
//! (Elith et al. 2010, Methods in Ecology & Evolution 1:330-342).
//!
//! The aggregate surface is the per-cell minimum over all variables; the
//! most-dissimilar-variable layer is the arg-min index, labeled with the
//! variable names.

use grasskit_core::engine::parse_key_val;
use grasskit_core::finalize::{
    apply_colors, command_history, write_categories, write_metadata, ColorSource, LayerMetadata,
};
use grasskit_core::rules::RecodeTable;
use grasskit_core::stats::{parse_min_max, FrequencyTable};
use grasskit_core::{Context, Error, ModuleCall, RegionTarget, Result};
use tracing::info;

const COLORS_MES: &str = "0% 244:109:67\n0 255:255:255\n100% 50:136:189\n";

const CATEGORIES_NOVEL: &str = "0|within range\n1|novel conditions\n";

/// Where the reference sample comes from.
#[derive(Debug, Clone)]
pub enum ReferenceSample {
    /// Binary raster mask (1 = presence, 0 or null = absence).
    Raster(String),
    /// Point vector layer with reference locations.
    Points(String),
    /// A saved, named region with reference conditions.
    Region(String),
    /// The active region.
    CurrentRegion,
}

#[derive(Debug, Clone)]
pub struct MessParams {
    /// Reference condition rasters.
    pub ref_env: Vec<String>,
    pub sample: ReferenceSample,
    /// Projected condition rasters; defaults to `ref_env`.
    pub proj_env: Option<Vec<String>>,
    /// Region with projected conditions.
    pub proj_region: Option<String>,
    /// Root name of the output layers.
    pub output: String,
    /// Decimal precision of the input layer values.
    pub digits: u32,
    /// Produce the most-dissimilar-variable layer.
    pub most_dissimilar: bool,
    /// Produce the binary novelty mask.
    pub novelty: bool,
    /// Produce the sum of negative similarities.
    pub sum_negative: bool,
    /// Produce the count of negative contributions.
    pub count_negative: bool,
    /// Remove the per-variable similarity layers at the end.
    pub drop_individual: bool,
    pub nprocs: u32,
    pub memory_mb: u32,
}

pub fn run(ctx: &Context, params: &MessParams) -> Result<()> {
    if params.digits > 6 {
        return Err(Error::InvalidParameter {
            name: "digits",
            value: params.digits.to_string(),
            reason: "precision is limited to 0-6 decimals".to_string(),
        });
    }
    if ctx.mask_present()? {
        return Err(Error::Precondition(
            "an active MASK is present; remove it before computing similarity".to_string(),
        ));
    }
    for layer in &params.ref_env {
        if !ctx.raster_exists(layer)? {
            return Err(Error::Precondition(format!("the layer <{layer}> does not exist")));
        }
    }
    match &params.sample {
        ReferenceSample::Raster(raster) => check_binary_reference(ctx, raster)?,
        ReferenceSample::Points(vector) => check_point_reference(ctx, vector)?,
        _ => {}
    }

    let projection = params.proj_env.clone().unwrap_or_else(|| params.ref_env.clone());
    if projection.len() != params.ref_env.len() {
        return Err(Error::Config(format!(
            "the number of reference and projection variables must match; \
             got {} reference and {} projection layers",
            params.ref_env.len(),
            projection.len()
        )));
    }
    if params.proj_env.is_some() {
        for layer in &projection {
            if !ctx.raster_exists(layer)? {
                return Err(Error::Precondition(format!("the layer <{layer}> does not exist")));
            }
        }
    }

    let variables: Vec<String> = params
        .ref_env
        .iter()
        .map(|layer| strip_mapset(layer).to_lowercase())
        .collect();
    let similarity_layers: Vec<String> = variables
        .iter()
        .map(|variable| format!("{}_{variable}", params.output))
        .collect();
    let aggregate = format!("{}_MES", params.output);
    let scale = 10i64.pow(params.digits);
    let history = command_history(
        "mess",
        &[
            ("ref_env", params.ref_env.join(",")),
            ("proj_env", params.proj_env.clone().map(|p| p.join(",")).unwrap_or_default()),
            ("output", params.output.clone()),
            ("digits", params.digits.to_string()),
        ],
    );

    // Snapshot the reference and projection regions as named regions so the
    // per-variable loop can switch between them.
    let ref_region = match &params.sample {
        ReferenceSample::Region(name) => {
            ctx.apply_region(&RegionTarget::Named(name.clone()))?;
            name.clone()
        }
        ReferenceSample::Raster(raster) => {
            ctx.apply_region(&RegionTarget::Raster(raster.clone()))?;
            ctx.save_region("refreg")?
        }
        _ => ctx.save_region("refreg")?,
    };
    let proj_region = match &params.proj_region {
        Some(name) => {
            ctx.apply_region(&RegionTarget::Named(name.clone()))?;
            name.clone()
        }
        None => {
            ctx.apply_region(&RegionTarget::Raster(projection[0].clone()))?;
            ctx.save_region("projreg")?
        }
    };
    ctx.apply_region(&RegionTarget::Named(ref_region.clone()))?;

    match &params.sample {
        ReferenceSample::Points(vector) => reference_from_points(
            ctx,
            params,
            vector,
            &projection,
            &proj_region,
            scale,
            &similarity_layers,
            &history,
        )?,
        _ => reference_from_rasters(
            ctx,
            params,
            &projection,
            &ref_region,
            &proj_region,
            scale,
            &similarity_layers,
            &history,
        )?,
    }

    let region_guard = ctx.push_region(&RegionTarget::Named(proj_region.clone()))?;

    info!("calculating the aggregate similarity surface");
    ctx.run(
        &ModuleCall::new("r.series")
            .option("output", &aggregate)
            .option("input", similarity_layers.join(","))
            .option("method", "minimum")
            .option("nprocs", params.nprocs)
            .option("memory", params.memory_mb),
    )?;
    apply_colors(ctx, &aggregate, ColorSource::Rules(COLORS_MES))?;
    write_metadata(
        ctx,
        &aggregate,
        &LayerMetadata {
            title: Some("Multivariate environmental similarity".to_string()),
            units: Some("0-100 (relative score)".to_string()),
            description: Some("Minimum environmental similarity over all variables".to_string()),
            history: Some(history.clone()),
            ..Default::default()
        },
    )?;

    if params.novelty {
        info!("deriving the novelty mask");
        let novel = format!("{}_novel", params.output);
        ctx.mapcalc(format!("{novel} = if( {aggregate} < 0, 1, 0)"))?;
        write_categories(ctx, &novel, "|", CATEGORIES_NOVEL)?;
        write_metadata(
            ctx,
            &novel,
            &LayerMetadata {
                title: Some("Areas with novel conditions".to_string()),
                source: Some(format!("Based on {aggregate}")),
                description: Some("1 = novel conditions, 0 = within range".to_string()),
                history: Some(history.clone()),
                ..Default::default()
            },
        )?;
    }

    if params.most_dissimilar {
        info!("deriving the most dissimilar variable");
        let argmin = ctx.temp_raster("argmin");
        ctx.run(
            &ModuleCall::new("r.series")
                .option("output", &argmin)
                .option("input", similarity_layers.join(","))
                .option("method", "min_raster")
                .option("nprocs", params.nprocs)
                .option("memory", params.memory_mb),
        )?;
        let most_dissimilar = format!("{}_MoD", params.output);
        ctx.mapcalc(format!("{most_dissimilar} = int({argmin})"))?;
        let labels: String = params
            .ref_env
            .iter()
            .enumerate()
            .map(|(index, layer)| format!("{index}:{layer}\n"))
            .collect();
        write_categories(ctx, &most_dissimilar, ":", &labels)?;
        write_metadata(
            ctx,
            &most_dissimilar,
            &LayerMetadata {
                title: Some("Most dissimilar variable".to_string()),
                source: Some(format!("Based on {aggregate}")),
                description: Some("Name of the most dissimilar variable".to_string()),
                history: Some(history.clone()),
                ..Default::default()
            },
        )?;
    }

    if params.sum_negative {
        info!("summing negative similarities");
        let sum_negative = format!("{}_SumNeg", params.output);
        let ceiling = -0.01 / scale as f64;
        ctx.run(
            &ModuleCall::new("r.series")
                .option("input", similarity_layers.join(","))
                .option("method", "sum")
                .option("range", format!("-inf,{ceiling}"))
                .option("output", &sum_negative)
                .option("nprocs", params.nprocs)
                .option("memory", params.memory_mb),
        )?;
        apply_colors(ctx, &sum_negative, ColorSource::Rules(COLORS_MES))?;
        write_metadata(
            ctx,
            &sum_negative,
            &LayerMetadata {
                title: Some("Sum of negative similarities".to_string()),
                source: Some(format!("Based on {aggregate}")),
                history: Some(history.clone()),
                ..Default::default()
            },
        )?;
    }

    if params.count_negative {
        info!("counting negative contributions");
        let counted = ctx.temp_raster("countneg");
        let count_negative = format!("{}_CountNeg", params.output);
        let range_output = ctx.read(&ModuleCall::new("r.info").flag('r').option("map", &aggregate))?;
        let (aggregate_min, _) = parse_min_max(&range_output)?;
        let ceiling = -0.0001 / scale as f64;
        ctx.run(
            &ModuleCall::new("r.series")
                .option("input", similarity_layers.join(","))
                .option("output", &counted)
                .option("method", "count")
                .option("range", format!("{aggregate_min},{ceiling}"))
                .option("nprocs", params.nprocs)
                .option("memory", params.memory_mb),
        )?;
        ctx.mapcalc(format!("{count_negative} = int({counted})"))?;
        write_metadata(
            ctx,
            &count_negative,
            &LayerMetadata {
                title: Some("Number of variables with negative similarity".to_string()),
                source: Some(format!("Based on {aggregate}")),
                history: Some(history.clone()),
                ..Default::default()
            },
        )?;
    }

    if params.drop_individual {
        ctx.run(
            &ModuleCall::new("g.remove")
                .flag('f')
                .option("type", "raster")
                .option("name", similarity_layers.join(",")),
        )?;
    }

    region_guard.pop()
}

/// Frequency distribution from the reference raster mask or region, then one
/// similarity layer per variable.
#[allow(clippy::too_many_arguments)]
fn reference_from_rasters(
    ctx: &Context,
    params: &MessParams,
    projection: &[String],
    ref_region: &str,
    proj_region: &str,
    scale: i64,
    similarity_layers: &[String],
    history: &str,
) -> Result<()> {
    // The engine's mask is a singleton layer; park it under a temporary name
    // and swap it in only while the reference sample is being read.
    let parked_mask = if let ReferenceSample::Raster(raster) = &params.sample {
        ctx.run(&ModuleCall::new("r.mask").option("raster", raster))?;
        let parked = ctx.temp_raster("refmask");
        ctx.run(&ModuleCall::new("g.rename").option("raster", format!("MASK,{parked}")))?;
        Some(parked)
    } else {
        None
    };

    for (index, env_layer) in params.ref_env.iter().enumerate() {
        info!("computing the frequency distribution for {env_layer}");
        let guard = ctx.push_region(&RegionTarget::Named(ref_region.to_string()))?;
        if let Some(parked) = &parked_mask {
            ctx.run(&ModuleCall::new("g.rename").option("raster", format!("{parked},MASK")))?;
        }
        let scaled_ref = ctx.temp_raster("refscaled");
        ctx.mapcalc(format!("{scaled_ref} = int({scale} * {env_layer})"))?;
        let stats_output = ctx.read(
            &ModuleCall::new("r.stats")
                .flag('c')
                .flag('n')
                .option("input", &scaled_ref)
                .option("sort", "asc")
                .option("separator", ";"),
        )?;
        let frequency = FrequencyTable::parse_stats(&stats_output, ';')?;
        if let Some(parked) = &parked_mask {
            ctx.run(&ModuleCall::new("g.rename").option("raster", format!("MASK,{parked}")))?;
        }
        guard.pop()?;

        let guard = ctx.push_region(&RegionTarget::Named(proj_region.to_string()))?;
        let scaled_proj = ctx.temp_raster("projscaled");
        ctx.mapcalc(format!("{scaled_proj} = int({scale} * {})", projection[index]))?;
        let univar_output = ctx.read(
            &ModuleCall::new("r.univar")
                .flag('g')
                .option("map", &scaled_proj)
                .option("nprocs", params.nprocs),
        )?;
        let (domain_min, domain_max) = parse_min_max(&univar_output)?;

        info!("calculating the similarity layer for {env_layer}");
        compute_similarity(
            ctx,
            &frequency,
            domain_min as i64,
            domain_max as i64,
            &scaled_proj,
            &similarity_layers[index],
        )?;
        write_metadata(
            ctx,
            &similarity_layers[index],
            &similarity_metadata(env_layer, history),
        )?;
        guard.pop()?;
    }
    Ok(())
}

/// Frequency distribution from point observations joined to raster values,
/// then one similarity layer per variable.
#[allow(clippy::too_many_arguments)]
fn reference_from_points(
    ctx: &Context,
    params: &MessParams,
    ref_vect: &str,
    projection: &[String],
    proj_region: &str,
    scale: i64,
    similarity_layers: &[String],
    history: &str,
) -> Result<()> {
    let points = ctx.temp_vector("refpoints");
    ctx.run(
        &ModuleCall::new("v.extract")
            .flag('t')
            .option("input", ref_vect)
            .option("type", "point")
            .option("output", &points),
    )?;
    ctx.run(&ModuleCall::new("v.db.addtable").option("map", &points))?;
    let count_output = ctx.read(
        &ModuleCall::new("db.select")
            .flag('c')
            .option("sql", format!("SELECT count(cat) FROM {points}")),
    )?;
    let point_count: u64 = count_output.trim().parse().map_err(|_| {
        Error::Precondition("database query failed or returned no results".to_string())
    })?;
    if point_count == 0 {
        return Err(Error::Precondition(
            "database query failed or returned no results".to_string(),
        ));
    }

    for (index, env_layer) in params.ref_env.iter().enumerate() {
        info!("computing the frequency distribution for {env_layer}");
        let column = format!("envvar_{index}");
        let column_type = if raster_datatype(ctx, env_layer)? == "CELL" {
            "integer"
        } else {
            "double precision"
        };
        ctx.run(
            &ModuleCall::new("v.db.addcolumn")
                .option("map", &points)
                .option("columns", format!("{column} {column_type}")),
        )?;
        ctx.run(
            &ModuleCall::new("db.execute")
                .option("sql", format!("UPDATE {points} SET {column} = NULL")),
        )?;
        ctx.run(
            &ModuleCall::new("v.what.rast")
                .option("map", &points)
                .option("layer", 1)
                .option("raster", env_layer)
                .option("column", &column),
        )?;
        let rows = ctx.read(
            &ModuleCall::new("db.select")
                .flag('c')
                .option(
                    "sql",
                    format!(
                        "SELECT {column}, count({column}) FROM {points} \
                         WHERE {column} IS NOT NULL GROUP BY {column} ORDER BY {column}"
                    ),
                ),
        )?;
        let frequency = scaled_frequency(&rows, scale)?;
        let sampled = frequency.total();
        if sampled < point_count {
            info!(
                "{} points had no value, probably because they fall outside \
                 the computational region or on nodata cells of {env_layer}",
                point_count - sampled
            );
        }

        let guard = ctx.push_region(&RegionTarget::Named(proj_region.to_string()))?;
        let scaled_proj = ctx.temp_raster("projscaled");
        ctx.mapcalc(format!("{scaled_proj} = int({scale} * {})", projection[index]))?;
        let range_output = ctx.read(&ModuleCall::new("r.info").flag('r').option("map", &scaled_proj))?;
        let (domain_min, domain_max) = parse_min_max(&range_output)?;

        info!("calculating the similarity layer for {env_layer}");
        compute_similarity(
            ctx,
            &frequency,
            domain_min as i64,
            domain_max as i64,
            &scaled_proj,
            &similarity_layers[index],
        )?;
        write_metadata(
            ctx,
            &similarity_layers[index],
            &similarity_metadata(env_layer, history),
        )?;
        guard.pop()?;
    }
    Ok(())
}

/// Recode the scaled projection raster to reference percentiles and map the
/// percentiles to the similarity score.
fn compute_similarity(
    ctx: &Context,
    frequency: &FrequencyTable,
    domain_min: i64,
    domain_max: i64,
    scaled_proj: &str,
    output: &str,
) -> Result<()> {
    let table = RecodeTable::from_cumulative(frequency, domain_min, domain_max)?;
    let rules = table.write_scratch()?;
    let percentile = ctx.temp_raster("percentile");
    let recode = ModuleCall::new("r.recode")
        .option("input", scaled_proj)
        .option("output", &percentile)
        .option("rules", rules.path().display());
    ctx.run(&recode)?;
    if !ctx.raster_exists(&percentile)? {
        return Err(Error::Module {
            command: recode.to_string(),
            stderr: "recode produced no output layer".to_string(),
        });
    }
    let observed_min = frequency.min().unwrap_or(domain_min);
    let observed_max = frequency.max().unwrap_or(domain_max);
    ctx.mapcalc(similarity_expression(
        output,
        &percentile,
        scaled_proj,
        observed_min,
        observed_max,
    ))?;
    apply_colors(ctx, output, ColorSource::Rules(COLORS_MES))
}

/// The 4-branch similarity formula as a map-algebra expression: linear
/// extrapolation below the observed minimum, `2 * p` up to the median,
/// `2 * (100 - p)` up to the maximum, linear extrapolation above it.
fn similarity_expression(
    output: &str,
    percentile: &str,
    value: &str,
    observed_min: i64,
    observed_max: i64,
) -> String {
    format!(
        "{output} = if({percentile} == 0, \
         (float({value}) - {observed_min}) / ({observed_max} - {observed_min}) * 100.0, \
         if({percentile} <= 50, 2 * float({percentile}), \
         if({percentile} < 100, 2 * (100 - float({percentile})), \
         ({observed_max} - float({value})) / ({observed_max} - {observed_min}) * 100.0)))"
    )
}

fn similarity_metadata(env_layer: &str, history: &str) -> LayerMetadata {
    LayerMetadata {
        title: Some(format!("Environmental similarity {env_layer}")),
        units: Some("0-100 (relative score)".to_string()),
        description: Some(format!("Environmental similarity for {env_layer}")),
        history: Some(history.to_string()),
        ..Default::default()
    }
}

/// Parse `value|count` attribute rows and discretize the raw values,
/// truncating toward zero to match the engine's `int()`.
fn scaled_frequency(rows: &str, scale: i64) -> Result<FrequencyTable> {
    let mut pairs = Vec::new();
    for line in rows.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (value, count) = line.split_once('|').ok_or(Error::Parse {
            what: "attribute rows",
            detail: format!("expected 'value|count', got '{line}'"),
        })?;
        let value: f64 = value.trim().parse().map_err(|e| Error::Parse {
            what: "attribute rows",
            detail: format!("value '{value}': {e}"),
        })?;
        let count: u64 = count.trim().parse().map_err(|e| Error::Parse {
            what: "attribute rows",
            detail: format!("count '{count}': {e}"),
        })?;
        pairs.push(((value * scale as f64).trunc() as i64, count));
    }
    if pairs.is_empty() {
        return Err(Error::Parse {
            what: "attribute rows",
            detail: "no observations with values".to_string(),
        });
    }
    Ok(FrequencyTable::from_pairs(pairs))
}

fn strip_mapset(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

fn check_binary_reference(ctx: &Context, raster: &str) -> Result<()> {
    if raster_datatype(ctx, raster)? != "CELL" {
        return Err(Error::Precondition(format!(
            "the reference raster <{raster}> must have type CELL (integer)"
        )));
    }
    let range_output = ctx.read(&ModuleCall::new("r.info").flag('r').option("map", raster))?;
    let (min, max) = parse_min_max(&range_output)?;
    if (min != 0.0 && min != 1.0) || max != 1.0 {
        return Err(Error::Precondition(format!(
            "the reference raster <{raster}> must be binary (values 0 and 1, or 1 only); \
             its range is {min} to {max}"
        )));
    }
    Ok(())
}

fn check_point_reference(ctx: &Context, vector: &str) -> Result<()> {
    let topology = ctx.read(&ModuleCall::new("v.info").flag('t').option("map", vector))?;
    let points = parse_key_val(&topology)
        .get("points")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    if points == 0 {
        return Err(Error::Precondition(format!(
            "the reference vector <{vector}> does not contain points"
        )));
    }
    Ok(())
}

fn raster_datatype(ctx: &Context, raster: &str) -> Result<String> {
    let output = ctx.read(&ModuleCall::new("r.info").flag('g').option("map", raster))?;
    parse_key_val(&output)
        .remove("datatype")
        .ok_or(Error::Parse {
            what: "raster info",
            detail: format!("no datatype reported for <{raster}>"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference evaluation of the similarity formula, mirroring the
    /// map-algebra expression branch for branch.
    fn similarity_score(percentile: f64, value: f64, observed_min: f64, observed_max: f64) -> f64 {
        if percentile == 0.0 {
            (value - observed_min) / (observed_max - observed_min) * 100.0
        } else if percentile <= 50.0 {
            2.0 * percentile
        } else if percentile < 100.0 {
            2.0 * (100.0 - percentile)
        } else {
            (observed_max - value) / (observed_max - observed_min) * 100.0
        }
    }

    #[test]
    fn median_scores_one_hundred() {
        assert_eq!(similarity_score(50.0, 500.0, 100.0, 900.0), 100.0);
    }

    #[test]
    fn extrapolation_is_continuous_at_the_observed_extremes() {
        // Below the minimum the recode yields percentile 0; the branch
        // evaluates to 0 exactly at the minimum and goes negative below it.
        assert_eq!(similarity_score(0.0, 100.0, 100.0, 900.0), 0.0);
        assert!(similarity_score(0.0, 20.0, 100.0, 900.0) < 0.0);
        // At the maximum the cumulative percentile is 100; the branch
        // evaluates to 0 exactly at the maximum and goes negative above it.
        assert_eq!(similarity_score(100.0, 900.0, 100.0, 900.0), 0.0);
        assert!(similarity_score(100.0, 950.0, 100.0, 900.0) < 0.0);
        // Just below 100 the percentile branches approach 0 as well.
        assert!(similarity_score(99.9, 900.0, 100.0, 900.0) < 0.3);
    }

    #[test]
    fn expression_contains_all_four_branches() {
        let expr = similarity_expression("sim", "pct", "val", 10, 90);
        assert!(expr.starts_with("sim = if(pct == 0,"));
        assert!(expr.contains("if(pct <= 50, 2 * float(pct)"));
        assert!(expr.contains("if(pct < 100, 2 * (100 - float(pct))"));
        assert!(expr.contains("(90 - float(val)) / (90 - 10) * 100.0"));
    }

    #[test]
    fn scaled_frequency_truncates_toward_zero() {
        let table = scaled_frequency("1.2345|3\n2.5|1\n", 1000).unwrap();
        let values: Vec<i64> = table.values().collect();
        assert_eq!(values, vec![1234, 2500]);
        assert_eq!(table.total(), 4);
    }

    #[test]
    fn scaled_frequency_rejects_garbage() {
        assert!(scaled_frequency("not-a-row\n", 10).is_err());
        assert!(scaled_frequency("", 10).is_err());
    }

    #[test]
    fn strip_mapset_drops_the_suffix() {
        assert_eq!(strip_mapset("bio1@climate"), "bio1");
        assert_eq!(strip_mapset("bio1"), "bio1");
    }
}
