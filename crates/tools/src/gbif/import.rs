//! GBIF occurrence import
//!
//! GBIF occurrence dumps are tab-delimited with unquoted free-text fields
//! in whatever encoding the publisher used. The dump is re-quoted into a
//! clean comma CSV, wrapped in a VRT that builds point geometry from the
//! longitude/latitude columns, and imported through the engine's OGR
//! reader.

use std::path::{Path, PathBuf};

use grasskit_core::engine::parse_key_val;
use grasskit_core::{Context, Error, ModuleCall, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GbifImportParams {
    /// Raw GBIF occurrence dump (tab-delimited).
    pub input: PathBuf,
    /// Name of the imported vector layer.
    pub output: String,
    /// Directory to keep the generated VRT and CSV in.
    pub dir: Option<PathBuf>,
    /// Keep the generated VRT and CSV instead of deleting them.
    pub keep_files: bool,
    /// Reproject on the fly instead of requiring a latlon location.
    pub reproject: bool,
}

/// The GBIF occurrence column schema: imported name, source column, OGR
/// type, optional field width.
const FIELDS: &[(&str, &str, &str, Option<u32>)] = &[
    ("g_gbifid", "gbifid", "Integer64", None),
    ("g_datasetkey", "datasetkey", "String", Some(255)),
    ("g_occurrenceid", "occurrenceid", "String", Some(255)),
    ("g_kingdom", "kingdom", "String", Some(50)),
    ("g_phylum", "phylum", "String", Some(50)),
    ("g_class", "class", "String", Some(50)),
    ("g_order", "order", "String", Some(50)),
    ("g_family", "family", "String", Some(100)),
    ("g_genus", "genus", "String", Some(255)),
    ("g_species", "species", "String", Some(255)),
    ("g_infraspecificepithet", "infraspecificepithet", "String", Some(100)),
    ("g_taxonrank", "taxonrank", "String", Some(50)),
    ("g_scientificname", "scientificname", "String", Some(255)),
    ("g_countrycode", "countrycode", "String", Some(25)),
    ("g_locality", "locality", "String", Some(255)),
    ("g_publishingorgkey", "publishingorgkey", "String", Some(255)),
    ("g_decimallatitude", "decimallatitude", "Real", None),
    ("g_decimallongitude", "decimallongitude", "Real", None),
    ("g_elevation", "elevation", "Real", None),
    ("g_elevationaccuracy", "elevationaccuracy", "String", Some(50)),
    ("g_depth", "depth", "String", Some(255)),
    ("g_depthaccuracy", "depthaccuracy", "String", Some(255)),
    ("g_eventdate", "eventdate", "String", Some(255)),
    ("g_day", "day", "Integer", None),
    ("g_month", "month", "Integer", None),
    ("g_year", "year", "Integer", None),
    ("g_taxonkey", "taxonkey", "String", Some(100)),
    ("g_specieskey", "specieskey", "String", Some(100)),
    ("g_basisofrecord", "basisofrecord", "String", Some(100)),
    ("g_institutioncode", "institutioncode", "String", Some(100)),
    ("g_collectioncode", "collectioncode", "String", Some(100)),
    ("g_catalognumber", "catalognumber", "String", Some(255)),
    ("g_recordnumber", "recordnumber", "String", Some(255)),
    ("g_identifiedby", "identifiedby", "String", Some(255)),
    ("g_license", "license", "String", Some(255)),
    ("g_rightsholder", "rightsholder", "String", Some(255)),
    ("g_recordedby", "recordedby", "String", Some(255)),
    ("g_typestatus", "typestatus", "String", Some(255)),
    ("g_establishmentmeans", "establishmentmeans", "String", Some(255)),
    ("g_lastinterpreted", "lastinterpreted", "String", Some(255)),
    ("g_mediatype", "mediatype", "String", Some(100)),
    ("g_issue", "issue", "String", Some(255)),
];

/// Re-quote a raw tab-delimited dump into a fully-quoted comma CSV.
///
/// Decoding is two-tier: strict UTF-8 first; when that fails, a permissive
/// pass substitutes the undecodable bytes and the import proceeds with a
/// warning.
pub fn requote(input: &Path, output: &Path) -> Result<()> {
    let bytes = std::fs::read(input)?;
    let text = match std::str::from_utf8(&bytes) {
        Ok(text) => std::borrow::Cow::Borrowed(text),
        Err(e) => {
            warn!("unable to decode {} strictly: {e}", input.display());
            warn!("falling back to a permissive decode; undecodable characters are substituted");
            String::from_utf8_lossy(&bytes)
        }
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_path(output)
        .map_err(|e| Error::Other(format!("cannot write {}: {e}", output.display())))?;
    for record in reader.records() {
        let record = record.map_err(|e| {
            Error::Other(format!("cannot parse {}: {e}", input.display()))
        })?;
        writer
            .write_record(&record)
            .map_err(|e| Error::Other(format!("cannot write {}: {e}", output.display())))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_vrt(path: &Path, layer: &str, csv_file: &str) -> Result<()> {
    let mut vrt = String::new();
    vrt.push_str("<OGRVRTDataSource>\n");
    vrt.push_str(&format!("    <OGRVRTLayer name=\"{layer}\">\n"));
    vrt.push_str(&format!(
        "        <SrcDataSource relativeToVRT=\"1\">{csv_file}</SrcDataSource>\n"
    ));
    vrt.push_str("        <GeometryType>wkbPoint</GeometryType>\n");
    vrt.push_str("        <LayerSRS>WGS84</LayerSRS>\n");
    for (name, src, kind, width) in FIELDS {
        match width {
            Some(width) => vrt.push_str(&format!(
                "        <Field name=\"{name}\" src=\"{src}\" type=\"{kind}\" width=\"{width}\" />\n"
            )),
            None => vrt.push_str(&format!(
                "        <Field name=\"{name}\" src=\"{src}\" type=\"{kind}\" />\n"
            )),
        }
    }
    vrt.push_str(
        "        <GeometryField encoding=\"PointFromColumns\" \
         x=\"decimallongitude\" y=\"decimallatitude\"/>\n",
    );
    vrt.push_str("    </OGRVRTLayer>\n");
    vrt.push_str("</OGRVRTDataSource>\n");
    std::fs::write(path, vrt)?;
    Ok(())
}

pub fn run(ctx: &Context, params: &GbifImportParams) -> Result<()> {
    let keep_dir = if params.keep_files {
        Some(params.dir.clone().ok_or_else(|| {
            Error::Config("keeping the VRT files requires a target directory".to_string())
        })?)
    } else {
        None
    };

    let projection = ctx.read(&ModuleCall::new("g.proj").flag('g'))?;
    let location = parse_key_val(&projection)
        .remove("name")
        .unwrap_or_default();
    if location.to_lowercase() == "xy_location_unprojected" {
        return Err(Error::Precondition(
            "xy locations are not supported; use a projected or latlon location".to_string(),
        ));
    }

    let work_dir = std::env::temp_dir();
    let csv_name = format!("{}.csv", params.output);
    let csv_path = work_dir.join(&csv_name);
    let vrt_path = work_dir.join(format!("{}.vrt", params.output));

    info!("re-quoting the occurrence dump");
    requote(&params.input, &csv_path)?;
    info!("writing the VRT wrapper");
    write_vrt(&vrt_path, &params.output, &csv_name)?;

    info!("importing the occurrence points");
    if params.reproject {
        ctx.run(
            &ModuleCall::new("v.import")
                .option("input", vrt_path.display())
                .option("output", &params.output),
        )?;
    } else {
        ctx.run(
            &ModuleCall::new("v.in.ogr")
                .option("input", vrt_path.display())
                .option("layer", &params.output)
                .option("output", &params.output),
        )?;
    }

    if let Some(dir) = &keep_dir {
        move_file(&vrt_path, &dir.join(format!("{}.vrt", params.output)))?;
        move_file(&csv_path, &dir.join(&csv_name))?;
        info!("kept the VRT files under {}", dir.display());
    } else {
        std::fs::remove_file(&vrt_path)?;
        std::fs::remove_file(&csv_path)?;
    }
    Ok(())
}

/// Rename, falling back to copy-and-delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requote_quotes_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.txt");
        let output = dir.path().join("quoted.csv");
        std::fs::write(&input, "gbifid\tspecies\n42\tParus major\n").unwrap();
        requote(&input, &output).unwrap();
        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text, "\"gbifid\",\"species\"\n\"42\",\"Parus major\"\n");
    }

    #[test]
    fn requote_substitutes_undecodable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.txt");
        let output = dir.path().join("quoted.csv");
        std::fs::write(&input, b"locality\nK\xf6ln\n").unwrap();
        requote(&input, &output).unwrap();
        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn vrt_wraps_the_csv_with_point_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let vrt = dir.path().join("birds.vrt");
        write_vrt(&vrt, "birds", "birds.csv").unwrap();
        let text = std::fs::read_to_string(&vrt).unwrap();
        assert!(text.contains("<OGRVRTLayer name=\"birds\">"));
        assert!(text.contains("<SrcDataSource relativeToVRT=\"1\">birds.csv</SrcDataSource>"));
        assert!(text.contains("x=\"decimallongitude\" y=\"decimallatitude\""));
        assert!(text.contains("<Field name=\"g_species\" src=\"species\" type=\"String\" width=\"255\" />"));
    }
}
