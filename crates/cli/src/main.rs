//! GrassKit CLI - addon tools for the engine's raster and vector modules

use anyhow::{Context as _, Result};
use clap::{ArgGroup, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use grasskit_core::{Context, GrassSession};
use grasskit_tools::plot::SortOrder;
use grasskit_tools::{gbif, hydro, maxent, plot, recode, similarity, slopeunits};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "grasskit")]
#[command(author, version, about = "Addon tools for GRASS GIS", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the elevation of water bodies for hydro-flattening
    HydroFlatten {
        /// Raster map of binned lidar point elevation
        #[arg(long)]
        input: String,
        /// Vector map of breaklines
        #[arg(long)]
        breaklines: Option<String>,
        /// Output raster with one elevation value per water body
        #[arg(long)]
        water_elevation: String,
        /// Output raster with the derived elevation standard deviation
        #[arg(long)]
        water_elevation_stddev: String,
        /// Optional output merging the filled elevation with the water levels
        #[arg(long)]
        filled_elevation: Option<String>,
        /// Percentile of elevation determining the water level
        #[arg(long, default_value = "5")]
        percentile: f64,
        /// Minimum size of water bodies in map units
        #[arg(long)]
        min_size: Option<f64>,
        /// Keep intermediate results
        #[arg(short = 'k', long)]
        keep: bool,
    },
    /// Multivariate environmental similarity surface
    Mess {
        /// Reference condition rasters
        #[arg(long, value_delimiter = ',', required = true)]
        ref_env: Vec<String>,
        /// Reference area raster (1 = presence, 0 or null = absence)
        #[arg(long, group = "reference")]
        ref_rast: Option<String>,
        /// Point vector layer with reference locations
        #[arg(long, group = "reference")]
        ref_vect: Option<String>,
        /// Saved region with reference conditions
        #[arg(long, group = "reference")]
        ref_region: Option<String>,
        /// Projected condition rasters; defaults to ref-env
        #[arg(long, value_delimiter = ',')]
        proj_env: Option<Vec<String>>,
        /// Saved region with projected conditions
        #[arg(long)]
        proj_region: Option<String>,
        /// Root name of the output layers
        #[arg(long)]
        output: String,
        /// Decimal precision of the input layer values
        #[arg(long, default_value = "3")]
        digits: u32,
        /// Also compute the most dissimilar variable layer
        #[arg(short = 'm', long)]
        most_dissimilar: bool,
        /// Also compute the binary novelty mask
        #[arg(short = 'n', long)]
        novelty: bool,
        /// Also compute the sum of negative similarities
        #[arg(short = 'k', long)]
        sum_negative: bool,
        /// Also compute the count of negative contributions
        #[arg(short = 'c', long)]
        count_negative: bool,
        /// Remove the per-variable similarity layers at the end
        #[arg(short = 'i', long)]
        remove_individual: bool,
        /// Number of processes forwarded to the series modules
        #[arg(long, default_value = "1")]
        nprocs: u32,
        /// Memory in MB forwarded to the series modules
        #[arg(long, default_value = "300")]
        memory: u32,
    },
    /// Recode a raster through the columns of an attribute table
    RecodeAttr {
        /// Input raster map
        #[arg(long)]
        input: String,
        /// Output name(s), one per target column or a single base name
        #[arg(long, value_delimiter = ',', required = true)]
        output: Vec<String>,
        /// Full path to the rules table
        #[arg(long)]
        rules: PathBuf,
        /// Field separator: comma, pipe, space, tab, or a literal character
        #[arg(long, default_value = "comma")]
        separator: String,
        /// Align the region to the input raster map
        #[arg(short = 'a', long)]
        align: bool,
    },
    /// Cohesion and anisotropy metrics over a slope-unit segmentation
    SlopeunitsMetrics {
        /// Input basin (vector)
        #[arg(long)]
        basin: String,
        /// Input digital elevation model
        #[arg(long)]
        demmap: String,
        /// Cleaned slope units layer (vector)
        #[arg(long)]
        slumapclean: String,
        /// Slope unit size to be removed
        #[arg(long, default_value = "25000")]
        cleansize: f64,
        /// Minimum area below which a unit is not further segmented
        #[arg(long)]
        areamin: f64,
        /// Minimum circular variance below which a unit is not further segmented
        #[arg(long)]
        cvmin: f64,
        /// Cell resolution in map units
        #[arg(long)]
        resolution: f64,
        /// File the metric line is appended to
        #[arg(long)]
        outfile: Option<PathBuf>,
    },
    /// Predict suitability through a trained Maxent model
    #[command(group(ArgGroup::new("inputs").required(true)))]
    MaxentPredict {
        /// Lambda model file written by Maxent
        #[arg(long)]
        lambdafile: PathBuf,
        /// Names of the environmental raster layers
        #[arg(long, value_delimiter = ',', group = "inputs")]
        rasters: Option<Vec<String>>,
        /// Variable names matching the rasters, in the same order
        #[arg(long, value_delimiter = ',', requires = "rasters")]
        variables: Option<Vec<String>>,
        /// Directory with already-exported environmental grids
        #[arg(long, group = "inputs", conflicts_with = "variables")]
        projectionlayers: Option<PathBuf>,
        /// Two-column csv of variable names and raster names
        #[arg(long, group = "inputs", conflicts_with = "variables")]
        alias_file: Option<PathBuf>,
        /// Output raster with the predicted suitability scores
        #[arg(long)]
        output: String,
        /// Location of maxent.jar
        #[arg(long)]
        maxent: Option<PathBuf>,
        /// Location of the java executable
        #[arg(long)]
        java: Option<PathBuf>,
        /// Maximum memory used by Maxent, in MB
        #[arg(long, default_value = "512")]
        memory: u32,
        /// Do not apply clamping when projecting
        #[arg(short = 'c', long, conflicts_with = "fade_by_clamping")]
        no_clamping: bool,
        /// Fade predictions by the clamping difference
        #[arg(short = 'f', long)]
        fade_by_clamping: bool,
        /// Resample to a square resolution when ns and ew differ
        #[arg(short = 'e', long)]
        adapt_resolution: bool,
        /// Log the assembled Maxent command line
        #[arg(short = 'p', long)]
        print_command: bool,
    },
    /// Install Maxent and cache the java location under the addon directory
    #[command(group(ArgGroup::new("action").required(true).multiple(true)))]
    MaxentSetup {
        /// Location of the maxent.jar file to install
        #[arg(long, group = "action")]
        maxent: Option<PathBuf>,
        /// Location of the java executable to cache
        #[arg(long, group = "action")]
        java: Option<PathBuf>,
        /// Check whether java is reachable from the session
        #[arg(short = 'j', long, group = "action", conflicts_with_all = ["maxent", "java", "update"])]
        check_java: bool,
        /// Overwrite an existing installed jar or cached path
        #[arg(short = 'u', long)]
        update: bool,
    },
    /// Import GBIF species occurrence data
    GbifImport {
        /// GBIF occurrence dump (tab-delimited)
        #[arg(long)]
        input: PathBuf,
        /// Name of the imported vector layer
        #[arg(long)]
        output: String,
        /// Directory where kept VRT files land
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Keep the generated VRT and csv files
        #[arg(short = 'c', long, requires = "dir")]
        keep_vrt: bool,
        /// Reproject on the fly
        #[arg(short = 'r', long)]
        reproject: bool,
    },
    /// Draw boxplots of values in a vector attribute column
    Boxplot {
        /// Vector map holding the attribute table
        #[arg(long)]
        map: String,
        /// Attribute column to plot
        #[arg(long)]
        column: String,
        /// Attribute column to group the data by
        #[arg(long)]
        group_by: Option<String>,
        /// Extra row filter (sql where clause)
        #[arg(long)]
        r#where: Option<String>,
        /// Output image file
        #[arg(long)]
        output: PathBuf,
        /// Figure dimensions in inches as width,height
        #[arg(long)]
        plot_dimensions: Option<String>,
        /// Resolution of the plot
        #[arg(long, default_value = "100")]
        dpi: f64,
        /// Default font size
        #[arg(long, default_value = "10")]
        fontsize: u32,
        /// Sort boxplots by median: ascending or descending
        #[arg(long)]
        order: Option<String>,
        /// Limit the value axis as min,max
        #[arg(long)]
        axis_limits: Option<String>,
        /// Draw the boxplots horizontally
        #[arg(long)]
        horizontal: bool,
        /// Draw the outliers
        #[arg(short = 'o', long)]
        outliers: bool,
        /// Draw notched boxplots
        #[arg(short = 'n', long)]
        notch: bool,
        /// Rotate the category labels
        #[arg(short = 'r', long)]
        rotate_labels: bool,
        /// Add grid lines
        #[arg(short = 'g', long)]
        grid: bool,
        /// Fill color of the boxes
        #[arg(long, default_value = "white")]
        bx_color: String,
        /// Color of box borders, whiskers and caps
        #[arg(long, default_value = "black")]
        bx_blcolor: String,
        /// Color of the median line
        #[arg(long, default_value = "orange")]
        median_color: String,
        /// Color of the fliers
        #[arg(long, default_value = "black")]
        flier_color: String,
        /// Box width within the unit slot, (0, 1]
        #[arg(long, default_value = "0.75")]
        bx_width: f64,
        /// Border, whisker and cap line width
        #[arg(long, default_value = "1")]
        bx_lw: u32,
        /// Median line width
        #[arg(long, default_value = "2")]
        median_lw: u32,
        /// Flier marker size
        #[arg(long, default_value = "2")]
        flier_size: f64,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn session() -> Result<Context> {
    let engine = GrassSession::from_env()?;
    Ok(Context::new(Box::new(engine)))
}

fn done(name: &str, elapsed: std::time::Duration) {
    println!("{name} finished in {elapsed:.2?}");
}

fn parse_pair(name: &str, value: &str) -> Result<(f64, f64)> {
    let mut parts = value.split(',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => {
            let a: f64 = a.trim().parse().with_context(|| format!("invalid {name}: {value}"))?;
            let b: f64 = b.trim().parse().with_context(|| format!("invalid {name}: {value}"))?;
            Ok((a, b))
        }
        _ => anyhow::bail!("{name} must be two comma separated numbers, got: {value}"),
    }
}

fn parse_order(value: &str) -> Result<SortOrder> {
    match value.to_lowercase().as_str() {
        "ascending" | "asc" => Ok(SortOrder::Ascending),
        "descending" | "desc" => Ok(SortOrder::Descending),
        _ => anyhow::bail!("order must be ascending or descending, got: {value}"),
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::HydroFlatten {
            input,
            breaklines,
            water_elevation,
            water_elevation_stddev,
            filled_elevation,
            percentile,
            min_size,
            keep,
        } => {
            let ctx = session()?;
            let params = hydro::FlattenParams {
                input,
                breaklines,
                water_elevation,
                water_elevation_stddev,
                filled_elevation,
                percentile,
                min_size,
                keep_intermediates: keep,
            };
            let pb = spinner("Deriving water body elevation...");
            let start = Instant::now();
            hydro::run(&ctx, &params).context("Failed to derive water elevation")?;
            pb.finish_and_clear();
            done("Hydro-flattening", start.elapsed());
        }

        Commands::Mess {
            ref_env,
            ref_rast,
            ref_vect,
            ref_region,
            proj_env,
            proj_region,
            output,
            digits,
            most_dissimilar,
            novelty,
            sum_negative,
            count_negative,
            remove_individual,
            nprocs,
            memory,
        } => {
            let ctx = session()?;
            let sample = if let Some(raster) = ref_rast {
                similarity::ReferenceSample::Raster(raster)
            } else if let Some(vector) = ref_vect {
                similarity::ReferenceSample::Points(vector)
            } else if let Some(region) = ref_region {
                similarity::ReferenceSample::Region(region)
            } else {
                similarity::ReferenceSample::CurrentRegion
            };
            let params = similarity::MessParams {
                ref_env,
                sample,
                proj_env,
                proj_region,
                output,
                digits,
                most_dissimilar,
                novelty,
                sum_negative,
                count_negative,
                drop_individual: remove_individual,
                nprocs,
                memory_mb: memory,
            };
            let pb = spinner("Computing environmental similarity...");
            let start = Instant::now();
            similarity::run(&ctx, &params).context("Failed to compute similarity")?;
            pb.finish_and_clear();
            done("Similarity surface", start.elapsed());
        }

        Commands::RecodeAttr {
            input,
            output,
            rules,
            separator,
            align,
        } => {
            let ctx = session()?;
            let delimiter = recode::separator_byte(&separator)?;
            let params = recode::RecodeAttrParams {
                input,
                outputs: output,
                rules,
                delimiter,
                align,
            };
            let start = Instant::now();
            recode::run(&ctx, &params).context("Failed to recode")?;
            done("Recode", start.elapsed());
        }

        Commands::SlopeunitsMetrics {
            basin,
            demmap,
            slumapclean,
            cleansize,
            areamin,
            cvmin,
            resolution,
            outfile,
        } => {
            let ctx = session()?;
            let params = slopeunits::MetricsParams {
                basin,
                demmap,
                slumapclean,
                cleansize,
                resolution,
            };
            let pb = spinner("Calculating slope unit metrics...");
            let start = Instant::now();
            let metrics =
                slopeunits::run(&ctx, &params).context("Failed to calculate metrics")?;
            pb.finish_and_clear();
            println!("areamin={areamin}");
            println!("cvmin={cvmin}");
            println!("v_fin={}", metrics.v);
            println!("i_fin={}", metrics.i);
            if let Some(outfile) = outfile {
                use std::io::Write as _;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&outfile)
                    .with_context(|| format!("Cannot open {}", outfile.display()))?;
                writeln!(file, "{areamin} {cvmin} {} {}", metrics.v, metrics.i)?;
            }
            done("Metrics", start.elapsed());
        }

        Commands::MaxentPredict {
            lambdafile,
            rasters,
            variables,
            projectionlayers,
            alias_file,
            output,
            maxent,
            java,
            memory,
            no_clamping,
            fade_by_clamping,
            adapt_resolution,
            print_command,
        } => {
            let ctx = session()?;
            let inputs = if let Some(dir) = projectionlayers {
                maxent::PredictInputs::Directory(dir)
            } else if let Some(file) = alias_file {
                maxent::PredictInputs::AliasFile(file)
            } else {
                maxent::PredictInputs::Layers {
                    rasters: rasters.unwrap_or_default(),
                    variables,
                }
            };
            let params = maxent::PredictParams {
                lambdafile,
                inputs,
                output,
                maxent_jar: maxent,
                java,
                memory_mb: memory,
                no_clamping,
                fade_by_clamping,
                adapt_resolution,
                print_command,
            };
            let start = Instant::now();
            maxent::predict(&ctx, &params).context("Failed to create the prediction layer")?;
            done("Prediction", start.elapsed());
        }

        Commands::MaxentSetup {
            maxent: jar,
            java,
            check_java,
            update,
        } => {
            let params = maxent::SetupParams {
                maxent: jar,
                java,
                check_java,
                overwrite: update,
            };
            maxent::setup(&params).context("Maxent setup failed")?;
        }

        Commands::GbifImport {
            input,
            output,
            dir,
            keep_vrt,
            reproject,
        } => {
            let ctx = session()?;
            let params = gbif::GbifImportParams {
                input,
                output,
                dir,
                keep_files: keep_vrt,
                reproject,
            };
            let pb = spinner("Importing GBIF data...");
            let start = Instant::now();
            gbif::run(&ctx, &params).context("Failed to import GBIF data")?;
            pb.finish_and_clear();
            done("GBIF import", start.elapsed());
        }

        Commands::Boxplot {
            map,
            column,
            group_by,
            r#where,
            output,
            plot_dimensions,
            dpi,
            fontsize,
            order,
            axis_limits,
            horizontal,
            outliers,
            notch,
            rotate_labels,
            grid,
            bx_color,
            bx_blcolor,
            median_color,
            flier_color,
            bx_width,
            bx_lw,
            median_lw,
            flier_size,
        } => {
            let ctx = session()?;
            let dimensions = plot_dimensions
                .as_deref()
                .map(|value| parse_pair("plot-dimensions", value))
                .transpose()?;
            let axis_limits = axis_limits
                .as_deref()
                .map(|value| parse_pair("axis-limits", value))
                .transpose()?;
            let order = order.as_deref().map(parse_order).transpose()?;
            let params = plot::BoxplotParams {
                map,
                column,
                group_by,
                where_clause: r#where,
                output: output.clone(),
                dimensions,
                dpi,
                fontsize,
                order,
                axis_limits,
                horizontal,
                show_outliers: outliers,
                notch,
                rotate_labels,
                grid,
                box_color: bx_color,
                border_color: bx_blcolor,
                median_color,
                flier_color,
                box_width: bx_width,
                line_width: bx_lw,
                median_line_width: median_lw,
                flier_size,
            };
            let start = Instant::now();
            plot::run(&ctx, &params).context("Failed to draw the boxplot")?;
            info!("plot saved to {}", output.display());
            done("Boxplot", start.elapsed());
        }
    }

    Ok(())
}
