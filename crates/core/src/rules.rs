//! Recode rule tables
//!
//! The engine's recode operation consumes a rules file of
//! `lower:upper:value` lines. Tables are built either from a cumulative
//! frequency distribution (one interval per observed value, extended one
//! step past the observed extremes toward the projection domain) or from
//! exact-value pairs taken from an attribute table. The file lives in a
//! scratch location and is deleted when the handle drops.

use std::io::Write as _;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::stats::FrequencyTable;

/// One `lower:upper:value` recode interval (bounds inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecodeRule {
    pub lower: i64,
    pub upper: i64,
    pub value: f64,
}

/// An ordered recode rule table.
#[derive(Debug, Clone, Default)]
pub struct RecodeTable {
    rules: Vec<RecodeRule>,
}

impl RecodeTable {
    /// Map each observed value to the cumulative percentile it reaches.
    ///
    /// The interval for observed value `v[k]` spans `v[k]..v[k+1]-1`; a
    /// leading zero-percent interval covers everything below the observed
    /// minimum and the last interval extends to the top of the domain. The
    /// domain bounds come from the projection layer so every projected cell
    /// falls into exactly one interval.
    pub fn from_cumulative(
        frequency: &FrequencyTable,
        domain_min: i64,
        domain_max: i64,
    ) -> Result<Self> {
        if frequency.is_empty() {
            return Err(Error::Other(
                "cannot build recode rules from an empty frequency table".to_string(),
            ));
        }
        let observed: Vec<i64> = frequency.values().collect();
        let observed_min = observed[0];
        let observed_max = observed[observed.len() - 1];
        let lower_bound = if domain_min < observed_min {
            domain_min - 1
        } else {
            observed_min - 1
        };
        let upper_bound = if domain_max > observed_max {
            domain_max + 1
        } else {
            observed_max + 1
        };

        let cumulative = frequency.cumulative_percent();
        let mut rules = Vec::with_capacity(observed.len() + 1);
        rules.push(RecodeRule {
            lower: lower_bound,
            upper: observed_min - 1,
            value: 0.0,
        });
        for (k, &value) in observed.iter().enumerate() {
            let upper = if k + 1 < observed.len() {
                observed[k + 1] - 1
            } else {
                upper_bound
            };
            rules.push(RecodeRule {
                lower: value,
                upper,
                value: cumulative[k],
            });
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RecodeRule] {
        &self.rules
    }

    /// Intervals are ordered and never regress.
    pub fn is_monotonic(&self) -> bool {
        self.rules
            .windows(2)
            .all(|pair| pair[0].upper < pair[1].lower)
    }

    /// Consecutive intervals leave no gap in the covered range.
    pub fn is_exhaustive(&self) -> bool {
        self.rules
            .windows(2)
            .all(|pair| pair[1].lower == pair[0].upper + 1)
    }

    /// Write the table to a scratch rules file.
    pub fn write_scratch(&self) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        for rule in &self.rules {
            writeln!(file, "{}:{}:{}", rule.lower, rule.upper, rule.value)?;
        }
        file.flush()?;
        Ok(file)
    }
}

/// Write exact-value recode pairs (`source:source:target` lines) to a
/// scratch rules file, as used when recoding through an attribute column.
pub fn write_value_rules(pairs: &[(f64, f64)]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    for (source, target) in pairs {
        writeln!(file, "{source}:{source}:{target}")?;
    }
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RecodeTable {
        let freq = FrequencyTable::from_pairs(vec![(10, 2), (12, 1), (15, 1)]);
        RecodeTable::from_cumulative(&freq, 8, 20).unwrap()
    }

    #[test]
    fn rules_are_monotonic_and_exhaustive() {
        let table = table();
        assert!(table.is_monotonic());
        assert!(table.is_exhaustive());
    }

    #[test]
    fn covers_domain_extended_past_observed_extremes() {
        let table = table();
        let rules = table.rules();
        // Domain minimum 8 is below the observed minimum 10.
        assert_eq!(rules[0], RecodeRule { lower: 7, upper: 9, value: 0.0 });
        assert_eq!(rules.last().unwrap().upper, 21);
    }

    #[test]
    fn observed_extremes_inside_domain_extend_by_one_step() {
        let freq = FrequencyTable::from_pairs(vec![(10, 1), (20, 1)]);
        let table = RecodeTable::from_cumulative(&freq, 12, 18).unwrap();
        let rules = table.rules();
        assert_eq!(rules[0].lower, 9);
        assert_eq!(rules.last().unwrap().upper, 21);
    }

    #[test]
    fn cumulative_values_climb_to_one_hundred() {
        let table = table();
        let values: Vec<f64> = table.rules().iter().map(|r| r.value).collect();
        assert_eq!(values[0], 0.0);
        assert!((values[1] - 50.0).abs() < 1e-12);
        assert!((values[3] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn scratch_file_has_one_line_per_rule() {
        let table = table();
        let file = table.write_scratch().unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text.lines().count(), table.rules().len());
        assert!(text.starts_with("7:9:0"));
    }

    #[test]
    fn value_rules_repeat_the_source() {
        let file = write_value_rules(&[(1.0, 5.0), (2.0, 7.5)]).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text, "1:1:5\n2:2:7.5\n");
    }

    #[test]
    fn empty_frequency_is_rejected() {
        let freq = FrequencyTable::from_pairs(Vec::new());
        assert!(RecodeTable::from_cumulative(&freq, 0, 1).is_err());
    }
}
