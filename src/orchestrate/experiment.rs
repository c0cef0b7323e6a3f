//! Bootstrap driver: repeat a fold, merge per-iteration scores.
//!
//! Each iteration runs one complete k-fold trial in its own `fold<i>/`
//! subdirectory and contributes one column to the summary table
//! (rows = entity identifiers, columns = iteration labels, cells =
//! comparison scores). No cross-iteration aggregation happens here -
//! means, bests, and confidence intervals belong to downstream
//! analysis, not to the orchestrator.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::executor::JobExecutor;
use crate::table::Metric;

use super::fold::Fold;

/// Name of the merged results artifact under the experiment directory.
const SUMMARY_FILE: &str = "summary.tab";

/// A bootstrapped k-fold experiment.
pub struct Experiment {
    tree: PathBuf,
    traits: PathBuf,
    k: usize,
    work_dir: PathBuf,
    seed: u64,
    test_subset: Option<Vec<String>>,
    /// (iteration label, entity → score) in iteration order.
    columns: Vec<(String, HashMap<String, f64>)>,
}

impl Experiment {
    /// Set up an experiment rooted at `work_dir`, creating it if absent.
    pub fn new(
        tree: impl Into<PathBuf>,
        traits: impl Into<PathBuf>,
        k: usize,
        work_dir: impl Into<PathBuf>,
        seed: u64,
        test_subset: Option<Vec<String>>,
    ) -> Result<Self> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir).map_err(|e| Error::io(&work_dir, e))?;
        Ok(Self {
            tree: tree.into(),
            traits: traits.into(),
            k,
            work_dir,
            seed,
            test_subset,
            columns: Vec::new(),
        })
    }

    /// Run (or resume) every iteration and write the merged summary.
    ///
    /// Iteration `i` lives in `fold<i>/` and is seeded with
    /// `seed + i` so groupings differ across iterations while the whole
    /// experiment stays reproducible. A fatal error in any fold aborts
    /// the experiment; there is no per-fold isolation.
    pub fn run(
        &mut self,
        iterations: usize,
        metric: Metric,
        executor: &dyn JobExecutor,
    ) -> Result<PathBuf> {
        info!(iterations, k = self.k, "beginning bootstrapped evaluation");

        // Submit everything first; jobs run on the scheduler while
        // later folds are still being prepared.
        let mut folds = Vec::new();
        for i in 0..iterations {
            let fold_dir = self.work_dir.join(format!("fold{}", i));
            let mut fold = Fold::new(&self.tree, &self.traits, fold_dir)?;
            fold.partition(self.k, self.test_subset.clone(), self.seed + i as u64, executor)?;
            folds.push(fold);
        }

        // Then block on each in turn and collect its column.
        for (i, mut fold) in folds.into_iter().enumerate() {
            fold.analyze(metric, executor)?;
            self.columns.push((format!("iter{}", i), fold.results));
        }

        self.write_summary()
    }

    /// Write the wide results table: one row per entity, one column per
    /// iteration.
    fn write_summary(&self) -> Result<PathBuf> {
        let path = self.work_dir.join(SUMMARY_FILE);
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        let mut out = BufWriter::new(file);

        let mut header = vec!["genome".to_string()];
        header.extend(self.columns.iter().map(|(label, _)| label.clone()));
        writeln!(out, "{}", header.join("\t")).map_err(|e| Error::io(&path, e))?;

        // Sorted union of entity ids; every fold should cover the same
        // population, so a missing cell is worth a diagnostic.
        let entities: BTreeSet<&str> = self
            .columns
            .iter()
            .flat_map(|(_, scores)| scores.keys().map(String::as_str))
            .collect();

        for entity in entities {
            let mut row = vec![entity.to_string()];
            for (label, scores) in &self.columns {
                match scores.get(entity) {
                    Some(score) => row.push(score.to_string()),
                    None => {
                        warn!(entity, iteration = %label, "no score for entity, writing NA");
                        row.push("NA".to_string());
                    }
                }
            }
            writeln!(out, "{}", row.join("\t")).map_err(|e| Error::io(&path, e))?;
        }

        out.flush().map_err(|e| Error::io(&path, e))?;
        info!(path = %path.display(), "wrote summary");
        Ok(path)
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
