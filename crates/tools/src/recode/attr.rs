//! Recode a raster through the columns of an attribute table
//!
//! The table's first column holds the source category value; every further
//! column is one recode target. Each target column becomes one output layer,
//! produced by a separate recode pass over the same input.

use std::path::PathBuf;

use grasskit_core::rules::write_value_rules;
use grasskit_core::{Context, Error, ModuleCall, Result};
use tracing::info;

#[derive(Debug, Clone)]
pub struct RecodeAttrParams {
    pub input: String,
    /// One name per target column, or a single base name to derive from.
    pub outputs: Vec<String>,
    /// Delimited table; first row holds the column headers.
    pub rules: PathBuf,
    pub delimiter: u8,
    /// Align the region to the input raster.
    pub align: bool,
}

/// Resolve a named separator (`comma`, `pipe`, `space`, `tab`) or a literal
/// single character to its byte value.
pub fn separator_byte(separator: &str) -> Result<u8> {
    match separator {
        "comma" => Ok(b','),
        "pipe" => Ok(b'|'),
        "space" => Ok(b' '),
        "tab" => Ok(b'\t'),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => Ok(c as u8),
                _ => Err(Error::Config(format!(
                    "separator must be comma, pipe, space, tab, or a single character, got '{other}'"
                ))),
            }
        }
    }
}

/// One output name per target column: positional when the counts match,
/// otherwise `<base>_<column header>`.
pub fn output_names(outputs: &[String], headers: &[String]) -> Vec<String> {
    let targets = headers.len() - 1;
    if outputs.len() == targets {
        outputs.to_vec()
    } else {
        headers[1..]
            .iter()
            .map(|header| format!("{}_{header}", outputs[0]))
            .collect()
    }
}

#[derive(Debug)]
struct RuleTable {
    headers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

fn read_rule_table(path: &PathBuf, delimiter: u8) -> Result<RuleTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| Error::Config(format!("cannot read rules table {}: {e}", path.display())))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::Config(format!("cannot read rules table header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.len() < 2 {
        return Err(Error::Config(
            "the rules table needs a value column and at least one target column".to_string(),
        ));
    }
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| Error::Config(format!("cannot read rules table row {}: {e}", line + 2)))?;
        let mut row = Vec::with_capacity(headers.len());
        for field in record.iter() {
            let value: f64 = field.parse().map_err(|_| {
                Error::Config(format!(
                    "rules table row {} holds a non-numeric value '{field}'",
                    line + 2
                ))
            })?;
            row.push(value);
        }
        if row.len() != headers.len() {
            return Err(Error::Config(format!(
                "rules table row {} has {} fields, expected {}",
                line + 2,
                row.len(),
                headers.len()
            )));
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(Error::Config("the rules table holds no rows".to_string()));
    }
    Ok(RuleTable { headers, rows })
}

pub fn run(ctx: &Context, params: &RecodeAttrParams) -> Result<()> {
    let table = read_rule_table(&params.rules, params.delimiter)?;
    let names = output_names(&params.outputs, &table.headers);

    for (column, name) in names.iter().enumerate() {
        let target = column + 1;
        if ctx.raster_exists(name)? {
            return Err(Error::Precondition(format!(
                "the layer <{name}> already exists in this mapset"
            )));
        }
        let pairs: Vec<(f64, f64)> = table
            .rows
            .iter()
            .map(|row| (row[0], row[target]))
            .collect();
        let rules = write_value_rules(&pairs)?;
        info!("recoding {} through column {}", params.input, table.headers[target]);
        let mut call = ModuleCall::new("r.recode")
            .option("input", &params.input)
            .option("output", name)
            .option("rules", rules.path().display());
        if params.align {
            call = call.flag('a');
        }
        ctx.run(&call)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matching_counts_use_names_positionally() {
        let outputs = vec!["soil".to_string(), "depth".to_string()];
        let names = output_names(&outputs, &headers(&["value", "ph", "cm"]));
        assert_eq!(names, vec!["soil", "depth"]);
    }

    #[test]
    fn single_base_name_derives_column_suffixes() {
        let outputs = vec!["soil".to_string()];
        let names = output_names(&outputs, &headers(&["value", "ph", "cm"]));
        assert_eq!(names, vec!["soil_ph", "soil_cm"]);
    }

    #[test]
    fn named_separators_resolve() {
        assert_eq!(separator_byte("comma").unwrap(), b',');
        assert_eq!(separator_byte("tab").unwrap(), b'\t');
        assert_eq!(separator_byte(";").unwrap(), b';');
        assert!(separator_byte("whatever").is_err());
    }

    #[test]
    fn table_rejects_non_numeric_cells() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "value,ph").unwrap();
        writeln!(file, "1,acid").unwrap();
        let err = read_rule_table(&file.path().to_path_buf(), b',').unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn table_parses_headers_and_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "value,ph,cm").unwrap();
        writeln!(file, "1,5.5,30").unwrap();
        writeln!(file, "2,6.1,45").unwrap();
        let table = read_rule_table(&file.path().to_path_buf(), b',').unwrap();
        assert_eq!(table.headers, headers(&["value", "ph", "cm"]));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec![2.0, 6.1, 45.0]);
    }
}
