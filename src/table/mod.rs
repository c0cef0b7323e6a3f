//! Trait table parsing, lazy iteration, subsetting, and comparison.
//!
//! A trait table is UTF-8, tab-separated text: one header line
//! (`entityKey<TAB>trait1<TAB>trait2...`) and one line per entity after
//! it. The first header field names the entity key column (a leading `#`
//! comment sigil is stripped); columns whose name carries the reserved
//! `metadata_` prefix are side-channel metadata (confidence scores and
//! the like), stored apart from ordinary traits and excluded from
//! comparisons.
//!
//! ## Lazy, restartable iteration
//!
//! [`TraitTable`] holds only the path and the parsed header. Every call
//! to [`TraitTable::entries`] re-opens the file and streams one
//! [`TableEntry`] per line, so iteration is restartable at an explicit
//! O(file size) cost per restart, and a table is never materialized in
//! memory unless the consumer collects it. Reference tables in this
//! domain run to tens of thousands of genomes by thousands of gene
//! families; streaming is not optional.
//!
//! ## Line-level error policy
//!
//! A line whose value count does not match the header's trait count is
//! skipped with a `warn!` diagnostic. Scans never abort over one bad
//! line; errors that would make a whole experiment silently wrong are
//! raised eagerly instead (duplicate header columns at parse time,
//! unknown comparison names in [`TraitTable::compare_two_tables`]).

pub mod entry;
pub mod natural;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use entry::{Metric, TableEntry, TraitValue};
pub use natural::NaturalKey;

use crate::error::{Error, Result};

/// Reserved prefix marking a header column as side-channel metadata.
pub const METADATA_PREFIX: &str = "metadata_";

/// Placeholder written for a value an entry does not carry.
const MISSING_VALUE: &str = "NA";

/// A parsed trait table: source path plus header. Rows stream lazily.
#[derive(Debug, Clone)]
pub struct TraitTable {
    path: PathBuf,
    /// Name of the entity key column, leading `#` stripped.
    pub entry_key: String,
    /// Trait column names in file order (metadata-prefixed included).
    pub traits: Vec<String>,
}

impl TraitTable {
    /// Parse the header of a trait table file.
    ///
    /// Only the first line is read; rows are streamed later through
    /// [`entries`](Self::entries). Fails with [`Error::Format`] if the
    /// header is absent, carries no trait columns, or names a trait
    /// twice.
    pub fn parse(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let mut reader = BufReader::new(file);

        let mut header = String::new();
        reader
            .read_line(&mut header)
            .map_err(|e| Error::io(&path, e))?;
        let header = header.trim_end_matches(['\n', '\r']);

        if header.is_empty() {
            return Err(Error::Format(format!(
                "{}: missing header line",
                path.display()
            )));
        }

        let mut fields = header.split('\t');
        let entry_key = fields
            .next()
            .unwrap_or_default()
            .trim_start_matches('#')
            .to_string();
        let traits: Vec<String> = fields.map(str::to_string).collect();

        if traits.is_empty() {
            return Err(Error::Format(format!(
                "{}: header has no trait columns",
                path.display()
            )));
        }

        // Duplicate columns would assign the same trait twice for every
        // entity; reject up front rather than per line.
        let mut seen = HashSet::new();
        for t in &traits {
            if !seen.insert(t.as_str()) {
                return Err(Error::Format(format!(
                    "{}: duplicate trait column '{}'",
                    path.display(),
                    t
                )));
            }
        }

        Ok(Self { path, entry_key, traits })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream one entry per non-blank line, skipping the header.
    ///
    /// Each call re-opens the source: restartable, O(file size) per
    /// restart.
    pub fn entries(&self) -> Result<Entries> {
        let file = File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let mut lines = BufReader::new(file).lines();
        // Skip the header line.
        let _ = lines.next();

        Ok(Entries { lines, traits: self.traits.clone(), path: self.path.clone() })
    }

    /// Trait names sorted by natural order.
    ///
    /// Digit runs compare numerically, text runs lexically; with
    /// `metadata_last`, metadata-prefixed traits sort after all ordinary
    /// traits regardless of their natural-order key.
    pub fn ordered_traits(&self, metadata_last: bool) -> Vec<String> {
        let mut names = self.traits.clone();
        names.sort_by_key(|n| NaturalKey::new(n, metadata_last));
        names
    }

    /// Filter [`entries`](Self::entries) down to `ids` (or, with
    /// `remove`, to everything but `ids`).
    ///
    /// Short-circuits once every id has been seen: with `remove=false`
    /// the scan stops early; with `remove=true` remaining rows pass
    /// through without further membership checks. The found-counter
    /// increments only on an actual match and the exhaustion check runs
    /// before each row is considered (see DESIGN.md on the historical
    /// off-by-one this resolves).
    pub fn subset<I, S>(&self, ids: I, remove: bool) -> Result<Subset>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: HashSet<String> = ids.into_iter().map(Into::into).collect();
        Ok(Subset {
            target: ids.len(),
            found: 0,
            ids,
            remove,
            entries: self.entries()?,
        })
    }

    /// Write a new table containing exactly the entities selected by
    /// [`subset`](Self::subset), in this table's own trait order.
    ///
    /// Entities are written in source-file order (order preservation is
    /// guaranteed). A value an entry lacks is written as `NA` with a
    /// diagnostic. Returns the identifiers actually written so callers
    /// can verify coverage.
    pub fn write_subset(
        &self,
        path: impl AsRef<Path>,
        ids: &[String],
        remove: bool,
    ) -> Result<Vec<String>> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut out = BufWriter::new(file);

        let mut header = vec![self.entry_key.as_str()];
        header.extend(self.traits.iter().map(String::as_str));
        writeln!(out, "{}", header.join("\t")).map_err(|e| Error::io(path, e))?;

        let mut written = Vec::new();
        for entry in self.subset(ids.iter().cloned(), remove)? {
            let mut row = vec![entry.name.clone()];
            for trait_name in &self.traits {
                match entry.value_for(trait_name) {
                    Some(v) => row.push(v.to_string()),
                    None => {
                        warn!(entity = %entry.name, trait_name, "missing value, writing NA");
                        row.push(MISSING_VALUE.to_string());
                    }
                }
            }
            writeln!(out, "{}", row.join("\t")).map_err(|e| Error::io(path, e))?;
            written.push(entry.name);
        }

        out.flush().map_err(|e| Error::io(path, e))?;
        Ok(written)
    }

    /// Compare the entries named in `to_compare` (all of `tab1` if
    /// `None`) across two tables. Returns one row per compared entity,
    /// carrying an NSTI confidence value when either side has one.
    ///
    /// Every requested name must exist in `tab1`
    /// ([`Error::UnknownEntity`]), and every requested name must resolve
    /// to a score ([`Error::IncompleteResult`]) — a silently partial
    /// comparison is worse than none.
    pub fn compare_two_tables(
        tab1: &Path,
        tab2: &Path,
        to_compare: Option<&[String]>,
        metric: Metric,
    ) -> Result<Vec<Comparison>> {
        let observed = Self::parse(tab1)?;
        let predicted = Self::parse(tab2)?;

        // Materialize the comparison side only: one pass over tab1.
        let mut comp_entries: HashMap<String, TableEntry> = HashMap::new();
        match to_compare {
            None => {
                debug!("using all entries from table 1 for the comparison");
                for entry in observed.entries()? {
                    comp_entries.insert(entry.name.clone(), entry);
                }
            }
            Some(names) => {
                let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
                for entry in observed.entries()? {
                    if wanted.contains(entry.name.as_str()) {
                        comp_entries.insert(entry.name.clone(), entry);
                    }
                }
                for name in names {
                    if !comp_entries.contains_key(name) {
                        return Err(Error::UnknownEntity(name.clone()));
                    }
                }
            }
        }

        // One pass over tab2, scoring every match.
        let mut results: HashMap<String, Comparison> = HashMap::new();
        for pred in predicted.entries()? {
            let Some(obs) = comp_entries.get(&pred.name) else {
                continue;
            };
            let score = obs.compare(&pred, metric, None)?;
            let nsti = obs
                .metadata
                .get("NSTI")
                .or_else(|| pred.metadata.get("NSTI"))
                .and_then(TraitValue::as_f64);
            results.insert(pred.name.clone(), Comparison { name: pred.name.clone(), score, nsti });
        }

        for name in comp_entries.keys() {
            if !results.contains_key(name) {
                return Err(Error::IncompleteResult { entity: name.clone() });
            }
        }

        let mut rows: Vec<Comparison> = results.into_values().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }
}

/// One scored row from [`TraitTable::compare_two_tables`].
#[derive(Debug, Clone)]
pub struct Comparison {
    pub name: String,
    pub score: f64,
    /// Nearest-sequenced-taxon-index confidence, when either table
    /// carries it as metadata.
    pub nsti: Option<f64>,
}

/// Restartable streaming iterator over table rows.
///
/// Blank lines are skipped silently; lines with a mismatched field count
/// are skipped with a diagnostic. An I/O error mid-stream ends the scan
/// with a diagnostic rather than panicking.
pub struct Entries {
    lines: std::io::Lines<BufReader<File>>,
    traits: Vec<String>,
    path: PathBuf,
}

impl Iterator for Entries {
    type Item = TableEntry;

    fn next(&mut self) -> Option<TableEntry> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "read error, ending scan");
                    return None;
                }
            };

            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let Some((name, values)) = line.split_once('\t') else {
                warn!(path = %self.path.display(), line, "no tab separator, skipping line");
                continue;
            };

            let values: Vec<&str> = values.split('\t').collect();
            if values.len() != self.traits.len() {
                warn!(
                    path = %self.path.display(),
                    entity = name,
                    expected = self.traits.len(),
                    got = values.len(),
                    "field count mismatch, skipping line"
                );
                continue;
            }

            let mut entry = TableEntry::new(name);
            let mut ok = true;
            for (trait_name, raw) in self.traits.iter().zip(values) {
                if let Err(e) = entry.add_trait(trait_name, raw) {
                    warn!(path = %self.path.display(), error = %e, "skipping line");
                    ok = false;
                    break;
                }
            }
            if ok {
                return Some(entry);
            }
        }
    }
}

/// Lazy filter over [`Entries`], produced by [`TraitTable::subset`].
pub struct Subset {
    entries: Entries,
    ids: HashSet<String>,
    target: usize,
    found: usize,
    remove: bool,
}

impl Iterator for Subset {
    type Item = TableEntry;

    fn next(&mut self) -> Option<TableEntry> {
        loop {
            // Exhaustion check before each row: once every id has been
            // matched, a keep-filter is done and a remove-filter becomes
            // pure pass-through.
            if self.found == self.target {
                return if self.remove { self.entries.next() } else { None };
            }

            let entry = self.entries.next()?;
            let is_member = self.ids.contains(&entry.name);
            if is_member {
                self.found += 1;
            }
            if is_member != self.remove {
                return Some(entry);
            }
        }
    }
}
