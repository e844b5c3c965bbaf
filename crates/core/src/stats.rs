//! Frequency and summary statistics parsed from engine output
//!
//! Modules report statistics as text (`r.stats -cn`, `r.univar -g`,
//! `r.info -r`, attribute queries). This module turns those into typed
//! tables the rule builders can consume.

use crate::engine::parse_key_val;
use crate::error::{Error, Result};

/// Sorted (value, count) pairs over a discretized integer domain.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    entries: Vec<(i64, u64)>,
}

impl FrequencyTable {
    /// Build from unsorted pairs; entries are sorted by value.
    pub fn from_pairs(mut pairs: Vec<(i64, u64)>) -> Self {
        pairs.sort_by_key(|(value, _)| *value);
        Self { entries: pairs }
    }

    /// Parse `value<sep>count` lines as printed by `r.stats -cn`.
    pub fn parse_stats(output: &str, separator: char) -> Result<Self> {
        let mut pairs = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (value, count) = line.split_once(separator).ok_or(Error::Parse {
                what: "statistics",
                detail: format!("expected 'value{separator}count', got '{line}'"),
            })?;
            let value: f64 = value.trim().parse().map_err(|e| Error::Parse {
                what: "statistics",
                detail: format!("value '{value}': {e}"),
            })?;
            let count: f64 = count.trim().parse().map_err(|e| Error::Parse {
                what: "statistics",
                detail: format!("count '{count}': {e}"),
            })?;
            pairs.push((value.round() as i64, count.round() as u64));
        }
        if pairs.is_empty() {
            return Err(Error::Parse {
                what: "statistics",
                detail: "no value/count lines in module output".to_string(),
            });
        }
        Ok(Self::from_pairs(pairs))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|(value, _)| *value)
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn min(&self) -> Option<i64> {
        self.entries.first().map(|(value, _)| *value)
    }

    pub fn max(&self) -> Option<i64> {
        self.entries.last().map(|(value, _)| *value)
    }

    /// Cumulative percentile reached at each value, in value order.
    pub fn cumulative_percent(&self) -> Vec<f64> {
        let total = self.total() as f64;
        let mut running = 0u64;
        self.entries
            .iter()
            .map(|(_, count)| {
                running += count;
                running as f64 / total * 100.0
            })
            .collect()
    }
}

/// Parse the `min=..`/`max=..` pair printed by `r.info -r` or `r.univar -g`.
pub fn parse_min_max(output: &str) -> Result<(f64, f64)> {
    let map = parse_key_val(output);
    let field = |key: &'static str| -> Result<f64> {
        map.get(key)
            .ok_or(Error::Parse {
                what: "value range",
                detail: format!("missing field '{key}'"),
            })?
            .parse::<f64>()
            .map_err(|e| Error::Parse {
                what: "value range",
                detail: format!("field '{key}': {e}"),
            })
    };
    Ok((field("min")?, field("max")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_sorts_stats_output() {
        let table = FrequencyTable::parse_stats("300;5\n100;10\n200;5\n", ';').unwrap();
        assert_eq!(table.min(), Some(100));
        assert_eq!(table.max(), Some(300));
        assert_eq!(table.total(), 20);
    }

    #[test]
    fn cumulative_percent_reaches_one_hundred() {
        let table = FrequencyTable::from_pairs(vec![(1, 1), (2, 1), (3, 2)]);
        let cumulative = table.cumulative_percent();
        assert_eq!(cumulative.len(), 3);
        assert!((cumulative[0] - 25.0).abs() < 1e-12);
        assert!((cumulative[1] - 50.0).abs() < 1e-12);
        assert!((cumulative[2] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn empty_output_is_a_parse_error() {
        assert!(FrequencyTable::parse_stats("\n\n", ';').is_err());
    }

    #[test]
    fn min_max_from_range_output() {
        let (min, max) = parse_min_max("min=12\nmax=840\n").unwrap();
        assert_eq!(min, 12.0);
        assert_eq!(max, 840.0);
    }
}
