//! Suitability prediction through a trained Maxent model
//!
//! Exports the environmental rasters as plain-text grids, runs the Maxent
//! JAR's `density.Project` over them with the given lambda file, and imports
//! the produced grid back as a named raster. Integration glue only; the
//! prediction itself is Maxent's.

use std::path::{Path, PathBuf};

use grasskit_core::engine::parse_key_val;
use grasskit_core::subprocess::{DiagnosticRule, StreamedCommand};
use grasskit_core::temp::unique_name;
use grasskit_core::{Context, Error, ModuleCall, Result};
use tracing::info;

use super::java::{resolve_java, scripts_dir};

/// Where the environmental layers come from.
#[derive(Debug, Clone)]
pub enum PredictInputs {
    /// Named rasters, optionally aliased to the variable names the model
    /// was trained with (same order).
    Layers {
        rasters: Vec<String>,
        variables: Option<Vec<String>>,
    },
    /// A directory of already-exported grids.
    Directory(PathBuf),
    /// Two-column CSV of variable names and raster names.
    AliasFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PredictParams {
    /// Lambda model file written by Maxent.
    pub lambdafile: PathBuf,
    pub inputs: PredictInputs,
    /// Output raster with the predicted suitability scores.
    pub output: String,
    /// Path to maxent.jar; defaults to the copy under the addon base.
    pub maxent_jar: Option<PathBuf>,
    /// Path to the java executable; resolved when not given.
    pub java: Option<PathBuf>,
    /// Maximum memory for the Java VM, in MB.
    pub memory_mb: u32,
    /// Do not apply clamping when projecting.
    pub no_clamping: bool,
    /// Fade predictions by the clamping difference.
    pub fade_by_clamping: bool,
    /// Resample to a square resolution instead of failing when the ns and
    /// ew resolutions differ.
    pub adapt_resolution: bool,
    /// Log the assembled Maxent command line.
    pub print_command: bool,
}

pub fn run(ctx: &Context, params: &PredictParams) -> Result<()> {
    if params.no_clamping && params.fade_by_clamping {
        return Err(Error::Config(
            "clamping cannot be both disabled and faded".to_string(),
        ));
    }
    if !params.lambdafile.is_file() {
        return Err(Error::Config(format!(
            "the lambda model file {} was not found",
            params.lambdafile.display()
        )));
    }
    let java = resolve_java(params.java.as_deref())?;
    let jar = match &params.maxent_jar {
        Some(path) => {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "maxent.jar was not found at {}",
                    path.display()
                )));
            }
            path.clone()
        }
        None => {
            let path = scripts_dir()?.join("maxent.jar");
            if !path.is_file() {
                return Err(Error::Precondition(format!(
                    "no maxent.jar given and none found at {}; \
                     install it with the maxent-setup tool",
                    path.display()
                )));
            }
            path
        }
    };

    let region = ctx.region_info()?;
    if region.nsres != region.ewres {
        if params.adapt_resolution {
            let resolution = region.nsres.min(region.ewres);
            info!(
                "the ns and ew resolutions differ; resampling to the smaller \
                 of the two ({resolution})"
            );
            ctx.run(
                &ModuleCall::new("g.region")
                    .flag('a')
                    .option("res", resolution),
            )?;
        } else {
            return Err(Error::Precondition(
                "the ns and ew resolutions of the region differ; adjust the \
                 region or pass the adapt-resolution flag to resample to the \
                 smaller of the two"
                    .to_string(),
            ));
        }
    }

    // Keep the scratch directory handle alive until the import is done;
    // dropping it deletes the exported grids.
    let mut scratch_dir = None;
    let grid_dir = match &params.inputs {
        PredictInputs::Directory(dir) => dir.clone(),
        inputs => {
            let dir = tempfile::tempdir()?;
            let (file_names, layer_names) = input_names(inputs)?;
            check_layers(ctx, &layer_names)?;
            info!("exporting the raster layers as plain-text grids for Maxent");
            for (file_name, layer_name) in file_names.iter().zip(&layer_names) {
                export_grid(ctx, layer_name, &dir.path().join(format!("{file_name}.asc")))?;
            }
            let path = dir.path().to_path_buf();
            scratch_dir = Some(dir);
            path
        }
    };

    let grid_file = grid_dir.join(format!("{}.asc", unique_name("mxt")));
    let mut command = StreamedCommand::new(java.display().to_string())
        .arg(format!("-mx{}m", params.memory_mb))
        .arg("-cp")
        .arg(jar.display().to_string())
        .arg("density.Project")
        .arg(params.lambdafile.display().to_string())
        .arg(grid_dir.display().to_string())
        .arg(grid_file.display().to_string())
        .rule(DiagnosticRule::new(
            r"java\.util\.NoSuchElementException",
            "check the variable names and the path and names of the input files",
        )?);
    if params.no_clamping {
        command = command.arg("doclamp=false");
    }
    if params.fade_by_clamping {
        command = command.arg("fadebyclamping=true");
    }
    if params.print_command {
        info!("maxent command: {}", command.command_line());
    }

    info!("running Maxent to create the prediction layer; this may take some time");
    let outcome = command.run()?;
    if !outcome.success() {
        let detail = outcome
            .diagnostics
            .first()
            .cloned()
            .unwrap_or_else(|| "Maxent terminated with an error".to_string());
        return Err(Error::External {
            program: "maxent".to_string(),
            detail,
        });
    }
    if !grid_file.is_file() {
        return Err(Error::External {
            program: "maxent".to_string(),
            detail: "no output grid was produced; check the messages above".to_string(),
        });
    }

    info!("importing the predicted suitability layer");
    ctx.run(
        &ModuleCall::new("r.in.gdal")
            .flag('o')
            .option("input", grid_file.display())
            .option("output", &params.output)
            .option("memory", params.memory_mb),
    )?;
    drop(scratch_dir);
    Ok(())
}

/// Variable file names and raster layer names, in matching order.
fn input_names(inputs: &PredictInputs) -> Result<(Vec<String>, Vec<String>)> {
    match inputs {
        PredictInputs::Layers { rasters, variables } => {
            let file_names = match variables {
                Some(variables) => {
                    if variables.len() != rasters.len() {
                        return Err(Error::Config(format!(
                            "{} variable names given for {} rasters",
                            variables.len(),
                            rasters.len()
                        )));
                    }
                    variables.clone()
                }
                None => rasters
                    .iter()
                    .map(|name| strip_mapset(name).to_string())
                    .collect(),
            };
            Ok((file_names, rasters.clone()))
        }
        PredictInputs::AliasFile(path) => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .from_path(path)
                .map_err(|e| {
                    Error::Config(format!("cannot read alias file {}: {e}", path.display()))
                })?;
            let mut file_names = Vec::new();
            let mut layer_names = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|e| {
                    Error::Config(format!("cannot read alias file {}: {e}", path.display()))
                })?;
                match (record.get(0), record.get(1)) {
                    (Some(variable), Some(layer)) => {
                        file_names.push(variable.trim().to_string());
                        layer_names.push(layer.trim().to_string());
                    }
                    _ => {
                        return Err(Error::Config(
                            "the alias file needs two columns: variable name, raster name"
                                .to_string(),
                        ))
                    }
                }
            }
            if file_names.is_empty() {
                return Err(Error::Config("the alias file holds no rows".to_string()));
            }
            Ok((file_names, layer_names))
        }
        PredictInputs::Directory(_) => Err(Error::Other(
            "directory inputs are used as-is and carry no layer names".to_string(),
        )),
    }
}

/// All layers must exist, and be unambiguous across accessible mapsets.
fn check_layers(ctx: &Context, layers: &[String]) -> Result<()> {
    let current_mapset = ctx
        .read(&ModuleCall::new("g.gisenv").option("get", "MAPSET"))?
        .trim()
        .to_string();
    let mut missing = Vec::new();
    let mut ambiguous = Vec::new();
    for layer in layers {
        let (name, mapset) = match layer.split_once('@') {
            Some((name, mapset)) => (name, mapset),
            None => (layer.as_str(), ""),
        };
        let mut call = ModuleCall::new("g.list")
            .flag('m')
            .option("type", "raster")
            .option("pattern", name);
        if !mapset.is_empty() {
            call = call.option("mapset", mapset);
        }
        let listing = ctx.read(&call)?;
        let matches: Vec<&str> = listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if matches.is_empty() {
            missing.push(layer.clone());
        } else if matches.len() > 1
            && !matches
                .iter()
                .any(|full| full.split_once('@').map(|(_, m)| m) == Some(current_mapset.as_str()))
        {
            ambiguous.push(layer.clone());
        }
    }
    if !missing.is_empty() {
        return Err(Error::Precondition(format!(
            "the layer(s) {} do not exist in the accessible mapsets",
            missing.join(", ")
        )));
    }
    if !ambiguous.is_empty() {
        return Err(Error::Precondition(format!(
            "the layer(s) {} exist in multiple accessible mapsets, none of them \
             the current one; qualify them with a mapset name",
            ambiguous.join(", ")
        )));
    }
    Ok(())
}

/// Export one raster as an AAIGrid; integers keep a compact type and a
/// matching nodata marker.
fn export_grid(ctx: &Context, layer: &str, file: &Path) -> Result<()> {
    let info_output = ctx.read(&ModuleCall::new("r.info").flag('g').option("map", layer))?;
    let datatype = parse_key_val(&info_output)
        .remove("datatype")
        .unwrap_or_default();
    let mut call = ModuleCall::new("r.out.gdal")
        .flag('c')
        .option("input", layer)
        .option("output", file.display())
        .option("format", "AAIGrid");
    if datatype == "CELL" {
        call = call.option("type", "Int16").option("nodata", -9999);
    } else {
        call = call.option("nodata", -9999999);
    }
    ctx.run(&call)
}

fn strip_mapset(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn aliases_must_match_raster_count() {
        let inputs = PredictInputs::Layers {
            rasters: vec!["bio1".to_string(), "bio12".to_string()],
            variables: Some(vec!["temperature".to_string()]),
        };
        assert!(input_names(&inputs).is_err());
    }

    #[test]
    fn missing_aliases_strip_the_mapset() {
        let inputs = PredictInputs::Layers {
            rasters: vec!["bio1@climate".to_string()],
            variables: None,
        };
        let (files, layers) = input_names(&inputs).unwrap();
        assert_eq!(files, vec!["bio1"]);
        assert_eq!(layers, vec!["bio1@climate"]);
    }

    #[test]
    fn alias_file_pairs_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "temperature,bio1").unwrap();
        writeln!(file, "precipitation,bio12@climate").unwrap();
        let (files, layers) =
            input_names(&PredictInputs::AliasFile(file.path().to_path_buf())).unwrap();
        assert_eq!(files, vec!["temperature", "precipitation"]);
        assert_eq!(layers, vec!["bio1", "bio12@climate"]);
    }
}
