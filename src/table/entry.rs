//! A single trait table row and pairwise comparison metrics.
//!
//! ## Metrics Overview
//!
//! | Metric       | What it measures                                | Better |
//! |--------------|--------------------------------------------------|--------|
//! | Correlation  | Spearman rank correlation of shared traits       | higher |
//! | Disimilarity | Mean absolute difference over shared traits      | lower  |
//! | PositivePred | Fraction of shared traits with exactly equal     | higher |
//! |              | values                                           |        |
//!
//! Comparison always restricts itself to the intersection of the two
//! entries' trait sets: a trait present on only one side is silently
//! excluded rather than failing the whole comparison. An empty
//! intersection is a [`Error::NoOverlap`].
//!
//! The metric set is a closed enum rather than string dispatch, so adding
//! a metric is a compile-time-checked extension. Strings only enter at
//! the CLI boundary via [`Metric::from_str`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::table::METADATA_PREFIX;

/// A trait value: numeric if the raw field parses as a number, otherwise
/// kept as text.
#[derive(Debug, Clone, PartialEq)]
pub enum TraitValue {
    Numeric(f64),
    Text(String),
}

impl TraitValue {
    /// Parse a raw field, preferring the numeric interpretation.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(n) => Self::Numeric(n),
            Err(_) => Self::Text(raw.to_string()),
        }
    }

    /// Numeric view, if this value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{}", n),
            Self::Text(t) => write!(f, "{}", t),
        }
    }
}

/// Comparison metric for two table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Spearman rank correlation over shared numeric traits.
    Correlation,
    /// Mean absolute difference over shared numeric traits.
    Disimilarity,
    /// Fraction of shared traits whose values are exactly equal.
    ///
    /// Exact equality between a continuous prediction and an observed
    /// value is a suspicious accuracy measure; preserved as historically
    /// computed, flagged for review in DESIGN.md.
    PositivePred,
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "correlation" => Ok(Self::Correlation),
            "disimilarity" => Ok(Self::Disimilarity),
            "positivepred" => Ok(Self::PositivePred),
            other => Err(Error::InvalidMetric(other.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Correlation => "correlation",
            Self::Disimilarity => "disimilarity",
            Self::PositivePred => "positivepred",
        };
        write!(f, "{}", name)
    }
}

/// One entity's row: identifier, predictive traits, and side-channel
/// metadata (reserved-prefix columns such as confidence scores).
#[derive(Debug, Clone, Default)]
pub struct TableEntry {
    /// Unique entity identifier (organism/genome name).
    pub name: String,
    /// Ordinary predictive traits.
    pub traits: HashMap<String, TraitValue>,
    /// Metadata traits, keyed by name with the reserved prefix stripped.
    pub metadata: HashMap<String, TraitValue>,
}

impl TableEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Add a trait from its raw header name and raw field text.
    ///
    /// Columns carrying the reserved metadata prefix are routed to the
    /// metadata map under the stripped name. Assigning a key twice for
    /// the same entry fails with [`Error::DuplicateKey`].
    pub fn add_trait(&mut self, trait_name: &str, raw: &str) -> Result<()> {
        let value = TraitValue::parse(raw);

        if let Some(stripped) = trait_name.strip_prefix(METADATA_PREFIX) {
            if self.metadata.contains_key(stripped) {
                return Err(Error::DuplicateKey {
                    entity: self.name.clone(),
                    key: stripped.to_string(),
                });
            }
            self.metadata.insert(stripped.to_string(), value);
        } else {
            if self.traits.contains_key(trait_name) {
                return Err(Error::DuplicateKey {
                    entity: self.name.clone(),
                    key: trait_name.to_string(),
                });
            }
            self.traits.insert(trait_name.to_string(), value);
        }

        Ok(())
    }

    /// Value for a raw header column name, looking through the metadata
    /// prefix. Used when writing rows back out.
    pub fn value_for(&self, trait_name: &str) -> Option<&TraitValue> {
        match trait_name.strip_prefix(METADATA_PREFIX) {
            Some(stripped) => self.metadata.get(stripped),
            None => self.traits.get(trait_name),
        }
    }

    /// Compare this entry to another using the supplied metric.
    ///
    /// `traits`, when given, restricts the comparison to those names;
    /// otherwise all of self's traits are candidates. Only traits both
    /// entries carry are used. For the numeric metrics, shared traits
    /// where either side is text are likewise excluded.
    pub fn compare(
        &self,
        other: &TableEntry,
        metric: Metric,
        traits: Option<&[String]>,
    ) -> Result<f64> {
        // Candidate names in a deterministic order.
        let candidates: Vec<&str> = match traits {
            Some(list) => list.iter().map(String::as_str).collect(),
            None => {
                let mut names: Vec<&str> = self.traits.keys().map(String::as_str).collect();
                names.sort_unstable();
                names
            }
        };

        let shared: Vec<(&TraitValue, &TraitValue)> = candidates
            .iter()
            .filter_map(|name| {
                let a = self.traits.get(*name)?;
                let b = other.traits.get(*name)?;
                Some((a, b))
            })
            .collect();

        if shared.is_empty() {
            return Err(Error::NoOverlap { a: self.name.clone(), b: other.name.clone() });
        }

        match metric {
            Metric::PositivePred => {
                let equal = shared.iter().filter(|(a, b)| a == b).count();
                Ok(equal as f64 / shared.len() as f64)
            }
            Metric::Correlation | Metric::Disimilarity => {
                let pairs: Vec<(f64, f64)> = shared
                    .iter()
                    .filter_map(|(a, b)| Some((a.as_f64()?, b.as_f64()?)))
                    .collect();

                if pairs.is_empty() {
                    return Err(Error::NoOverlap {
                        a: self.name.clone(),
                        b: other.name.clone(),
                    });
                }

                match metric {
                    Metric::Correlation => Ok(spearman(&pairs)),
                    Metric::Disimilarity => {
                        let total: f64 = pairs.iter().map(|(a, b)| (a - b).abs()).sum();
                        Ok(total / pairs.len() as f64)
                    }
                    Metric::PositivePred => unreachable!(),
                }
            }
        }
    }
}

/// Spearman rank correlation of paired observations.
///
/// Ranks use the average-of-ties convention, then Pearson correlation is
/// taken over the rank vectors. Degenerate cases are pinned down so that
/// self-comparison behaves sensibly:
/// - identical rank vectors (including all-constant input) → 1.0
/// - one side constant while the other varies → 0.0
fn spearman(pairs: &[(f64, f64)]) -> f64 {
    let xs: Vec<f64> = pairs.iter().map(|(a, _)| *a).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, b)| *b).collect();

    let rx = ranks(&xs);
    let ry = ranks(&ys);

    if rx == ry {
        return 1.0;
    }

    let n = rx.len() as f64;
    let mx = rx.iter().sum::<f64>() / n;
    let my = ry.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in rx.iter().zip(ry.iter()) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }

    let denom = (vx * vy).sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    cov / denom
}

/// Fractional ranks (1-based) with ties averaged.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        // Find the run of tied values.
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Average 1-based rank across the tie run.
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = avg;
        }
        i = j + 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, traits: &[(&str, &str)]) -> TableEntry {
        let mut e = TableEntry::new(name);
        for (t, v) in traits {
            e.add_trait(t, v).unwrap();
        }
        e
    }

    #[test]
    fn test_numeric_parse_fallback_to_text() {
        assert_eq!(TraitValue::parse("1.5"), TraitValue::Numeric(1.5));
        assert_eq!(TraitValue::parse("abc"), TraitValue::Text("abc".into()));
    }

    #[test]
    fn test_duplicate_trait_rejected() {
        let mut e = TableEntry::new("g1");
        e.add_trait("K001", "1").unwrap();
        let err = e.add_trait("K001", "2").unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn test_duplicate_metadata_rejected() {
        let mut e = TableEntry::new("g1");
        e.add_trait("metadata_NSTI", "0.1").unwrap();
        assert!(e.metadata.contains_key("NSTI"));
        let err = e.add_trait("metadata_NSTI", "0.2").unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn test_metadata_excluded_from_comparison() {
        let a = entry("a", &[("K1", "1"), ("metadata_NSTI", "0.03")]);
        let b = entry("b", &[("K1", "1"), ("metadata_NSTI", "0.99")]);

        // Wildly different NSTI must not affect the score.
        let score = a.compare(&b, Metric::PositivePred, None).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_self_is_one() {
        let a = entry("a", &[("K1", "1"), ("K2", "5"), ("K3", "2")]);
        let score = a.compare(&a, Metric::Correlation, None).unwrap();
        assert!((score - 1.0).abs() < 1e-12, "self-correlation should be 1.0, got {}", score);

        // Even a constant profile correlates perfectly with itself.
        let c = entry("c", &[("K1", "3"), ("K2", "3")]);
        let score = c.compare(&c, Metric::Correlation, None).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_reversed_is_negative_one() {
        let a = entry("a", &[("K1", "1"), ("K2", "2"), ("K3", "3")]);
        let b = entry("b", &[("K1", "3"), ("K2", "2"), ("K3", "1")]);
        let score = a.compare(&b, Metric::Correlation, None).unwrap();
        assert!((score + 1.0).abs() < 1e-12, "got {}", score);
    }

    #[test]
    fn test_disimilarity_is_symmetric() {
        let a = entry("a", &[("K1", "1"), ("K2", "4")]);
        let b = entry("b", &[("K1", "2"), ("K2", "8")]);
        let ab = a.compare(&b, Metric::Disimilarity, None).unwrap();
        let ba = b.compare(&a, Metric::Disimilarity, None).unwrap();
        assert_eq!(ab, ba);
        // (|1-2| + |4-8|) / 2
        assert!((ab - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_trait_silently_excluded() {
        // Reference is missing K2; prediction has it. Comparison succeeds
        // using the remaining shared traits.
        let a = entry("a", &[("K1", "1")]);
        let b = entry("b", &[("K1", "3"), ("K2", "9")]);
        let score = a.compare(&b, Metric::Disimilarity, None).unwrap();
        assert!((score - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_overlap_errors() {
        let a = entry("a", &[("K1", "1")]);
        let b = entry("b", &[("K2", "2")]);
        let err = a.compare(&b, Metric::Disimilarity, None).unwrap_err();
        assert!(matches!(err, Error::NoOverlap { .. }));
    }

    #[test]
    fn test_explicit_trait_restriction() {
        let a = entry("a", &[("K1", "1"), ("K2", "10")]);
        let b = entry("b", &[("K1", "1"), ("K2", "20")]);
        let only_k1 = vec!["K1".to_string()];
        let score = a.compare(&b, Metric::Disimilarity, Some(&only_k1)).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_positivepred_counts_exact_matches() {
        let a = entry("a", &[("K1", "1"), ("K2", "2"), ("K3", "x")]);
        let b = entry("b", &[("K1", "1"), ("K2", "5"), ("K3", "x")]);
        let score = a.compare(&b, Metric::PositivePred, None).unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("correlation".parse::<Metric>().unwrap(), Metric::Correlation);
        assert_eq!("disimilarity".parse::<Metric>().unwrap(), Metric::Disimilarity);
        assert_eq!("positivepred".parse::<Metric>().unwrap(), Metric::PositivePred);
        let err = "spearman2".parse::<Metric>().unwrap_err();
        assert!(matches!(err, Error::InvalidMetric(_)));
    }

    #[test]
    fn test_spearman_with_ties() {
        // Ties on both sides, monotone overall.
        let pairs = vec![(1.0, 2.0), (1.0, 2.0), (3.0, 5.0)];
        let rho = spearman(&pairs);
        assert!((rho - 1.0).abs() < 1e-12, "got {}", rho);
    }
}
