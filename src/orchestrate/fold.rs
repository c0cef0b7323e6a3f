//! One complete k-way partitioning-and-prediction trial.
//!
//! A fold owns the full reference trait table, the tree-derived entity
//! population, and k [`Partition`]s whose held-out sets tile the
//! population exactly once: sizes are `floor(n/k)` with the `n mod k`
//! remainder handed out one-per-group to the first groups, and each
//! group is drawn by uniform sampling without replacement from the
//! remaining pool.
//!
//! ## Reload before randomize
//!
//! Construction against a working directory that already holds
//! partitions must reload them, never re-randomize - a fresh shuffle
//! would silently score jobs against the wrong held-out sets. Reload is
//! all-or-nothing: partition 0 missing means a fresh run; partition 0
//! present with a later one missing means a truncated or corrupted
//! prior run, and that is fatal.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::error::{Error, Result};
use crate::executor::JobExecutor;
use crate::table::{Metric, TraitTable};
use crate::tree;

use super::partition::{Partition, PartitionContext};

/// One k-fold experiment over a tree and its trait table.
pub struct Fold {
    tree: PathBuf,
    table: TraitTable,
    work_dir: PathBuf,
    test_subset: Option<Vec<String>>,
    partitions: Vec<Partition>,
    /// Merged entity → score mapping, filled by [`analyze`](Self::analyze).
    pub results: HashMap<String, f64>,
}

impl Fold {
    /// Open a fold rooted at `work_dir`, creating the directory if
    /// absent. The trait table header is parsed eagerly; rows stream
    /// later.
    pub fn new(
        tree: impl Into<PathBuf>,
        traits: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir).map_err(|e| Error::io(&work_dir, e))?;

        let fold = Self {
            tree: tree.into(),
            table: TraitTable::parse(traits.into())?,
            work_dir,
            test_subset: None,
            partitions: Vec::new(),
            results: HashMap::new(),
        };
        info!(dir = %fold.work_dir.display(), "initialized k-folds experiment");
        Ok(fold)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn partition_dir(&self, index: usize) -> PathBuf {
        self.work_dir.join(format!("partition{}", index))
    }

    /// Create (or reload) the k partitions and start their jobs.
    ///
    /// `test_subset` restricts the evaluated population to an explicit
    /// identifier list; every listed identifier must be a tree leaf.
    /// `seed` makes the random grouping reproducible.
    pub fn partition(
        &mut self,
        k: usize,
        test_subset: Option<Vec<String>>,
        seed: u64,
        executor: &dyn JobExecutor,
    ) -> Result<()> {
        if k == 0 {
            return Err(Error::Format("cannot partition into k=0 groups".into()));
        }
        self.test_subset = test_subset;
        // Field-level borrows so partitions can be pushed while the
        // context is alive.
        let ctx = PartitionContext {
            table: &self.table,
            tree: &self.tree,
            restrict: self.test_subset.is_some(),
        };

        // Reload path: an existing partition 0 means a prior run owns
        // this directory.
        if let Some(p0) = Partition::recover(self.partition_dir(0), &ctx, executor)? {
            let mut partitions = vec![p0];
            for index in 1..k {
                match Partition::recover(self.partition_dir(index), &ctx, executor)? {
                    Some(p) => partitions.push(p),
                    None => {
                        return Err(Error::PartialLoad { dir: self.work_dir.clone(), index });
                    }
                }
            }
            info!(k, dir = %self.work_dir.display(), "reloaded existing partitions");
            self.partitions = partitions;
            return Ok(());
        }

        // Fresh run: resolve the population, then randomize.
        let leaves = tree::leaf_names(&self.tree)?;
        let population: Vec<String> = match &self.test_subset {
            None => leaves,
            Some(subset) => {
                let leaf_set: HashSet<&str> = leaves.iter().map(String::as_str).collect();
                for id in subset {
                    if !leaf_set.contains(id.as_str()) {
                        return Err(Error::UnknownEntity(id.clone()));
                    }
                }
                subset.clone()
            }
        };

        let n = population.len();
        if k > n {
            return Err(Error::Format(format!(
                "cannot partition {} entities into {} groups",
                n, k
            )));
        }

        let base = n / k;
        let remainder = n % k;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pool = population;

        for group in 0..k {
            // Remainder entities go one-per-group to the first groups.
            let count = base + usize::from(group < remainder);

            let sample: Vec<String> =
                pool.choose_multiple(&mut rng, count).cloned().collect();
            let chosen: HashSet<&str> = sample.iter().map(String::as_str).collect();
            pool.retain(|id| !chosen.contains(id.as_str()));

            let mut partition = Partition::new(sample, self.partition_dir(group))?;
            partition.prepare(&ctx, executor)?;
            info!(group, n = count, "created partition");
            self.partitions.push(partition);
        }

        Ok(())
    }

    /// Resolve every partition and merge the scores.
    ///
    /// A partition whose job output is not ready gets exactly one
    /// wait-then-retry; every other failure propagates immediately and
    /// fails the fold.
    pub fn analyze(&mut self, metric: Metric, executor: &dyn JobExecutor) -> Result<()> {
        let ctx = PartitionContext {
            table: &self.table,
            tree: &self.tree,
            restrict: self.test_subset.is_some(),
        };

        for partition in &mut self.partitions {
            let scores = match partition.resolve(&ctx, metric) {
                Ok(scores) => scores,
                Err(Error::ResultsNotReady { .. }) => {
                    info!(dir = %partition.work_dir().display(), "waiting for partition job");
                    if let Some(name) = partition.job_name() {
                        let pattern = name.to_string();
                        executor.wait(&pattern)?;
                    }
                    partition.resolve(&ctx, metric)?
                }
                Err(e) => return Err(e),
            };
            self.results.extend(scores);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrate::testing::{DeferredExecutor, InstantExecutor};
    use std::collections::HashSet;

    /// Ten genomes, a matching star-ish tree, fresh work dir.
    fn setup(tag: &str) -> (PathBuf, PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("traitfold_fold_{}", tag));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let traits = dir.join("traits.tab");
        let mut content = String::from("#OTU\tK1\tK2\tK3\n");
        for i in 1..=10 {
            content.push_str(&format!("g{i}\t{}\t{}\t{}\n", i, i * 2, 31 - i));
        }
        fs::write(&traits, content).unwrap();

        let tree = dir.join("tree.newick");
        let leaves: Vec<String> = (1..=10).map(|i| format!("g{i}:0.1")).collect();
        fs::write(&tree, format!("({});", leaves.join(","))).unwrap();

        (dir, tree, traits)
    }

    #[test]
    fn test_partition_sizes_tile_population() {
        let (dir, tree, traits) = setup("sizes");
        let executor = InstantExecutor::new(&traits);

        let mut fold = Fold::new(&tree, &traits, dir.join("fold")).unwrap();
        fold.partition(3, None, 0, &executor).unwrap();

        // 10 entities, k=3 → sizes {4,3,3}.
        let mut sizes: Vec<usize> =
            fold.partitions().iter().map(|p| p.held_out().len()).collect();
        assert_eq!(sizes, vec![4, 3, 3], "remainder goes to the first groups");

        // Disjoint and covering.
        let mut all = HashSet::new();
        for p in fold.partitions() {
            for id in p.held_out() {
                assert!(all.insert(id.clone()), "'{}' appears in two partitions", id);
            }
        }
        assert_eq!(all.len(), 10, "every entity held out exactly once");

        sizes.sort_unstable();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_partitioning_is_seeded() {
        let (dir, tree, traits) = setup("seeded");

        let executor = InstantExecutor::new(&traits);
        let mut a = Fold::new(&tree, &traits, dir.join("a")).unwrap();
        a.partition(3, None, 42, &executor).unwrap();

        let executor = InstantExecutor::new(&traits);
        let mut b = Fold::new(&tree, &traits, dir.join("b")).unwrap();
        b.partition(3, None, 42, &executor).unwrap();

        let ids = |f: &Fold| -> Vec<Vec<String>> {
            f.partitions().iter().map(|p| p.held_out().to_vec()).collect()
        };
        assert_eq!(ids(&a), ids(&b), "same seed, same grouping");
    }

    #[test]
    fn test_reload_instead_of_rerandomize() {
        let (dir, tree, traits) = setup("reload");
        let work = dir.join("fold");

        let executor = InstantExecutor::new(&traits);
        let mut first = Fold::new(&tree, &traits, &work).unwrap();
        first.partition(3, None, 7, &executor).unwrap();
        let original: Vec<Vec<String>> =
            first.partitions().iter().map(|p| p.held_out().to_vec()).collect();
        assert_eq!(executor.submission_count(), 3);

        // Second construction against the same directory, different
        // seed: must reload, not reshuffle, and not resubmit.
        let executor = InstantExecutor::new(&traits);
        let mut second = Fold::new(&tree, &traits, &work).unwrap();
        second.partition(3, None, 999, &executor).unwrap();
        let reloaded: Vec<Vec<String>> =
            second.partitions().iter().map(|p| p.held_out().to_vec()).collect();

        assert_eq!(original, reloaded, "held-out sets survive reload");
        assert_eq!(executor.submission_count(), 0, "completed jobs not resubmitted");
    }

    #[test]
    fn test_partial_load_is_fatal() {
        let (dir, tree, traits) = setup("partial");
        let work = dir.join("fold");

        let executor = InstantExecutor::new(&traits);
        let mut fold = Fold::new(&tree, &traits, &work).unwrap();
        fold.partition(3, None, 0, &executor).unwrap();

        // Wipe partition 1: partition 0 still present, so this is a
        // corrupted prior run, not a fresh one.
        fs::remove_dir_all(work.join("partition1")).unwrap();

        let mut again = Fold::new(&tree, &traits, &work).unwrap();
        let err = again.partition(3, None, 0, &executor).unwrap_err();
        assert!(matches!(err, Error::PartialLoad { index: 1, .. }));
    }

    #[test]
    fn test_unknown_test_identifier_rejected() {
        let (dir, tree, traits) = setup("unknown");
        let executor = InstantExecutor::new(&traits);

        let mut fold = Fold::new(&tree, &traits, dir.join("fold")).unwrap();
        let subset = Some(vec!["g1".to_string(), "not_in_tree".to_string()]);
        let err = fold.partition(2, subset, 0, &executor).unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(name) if name == "not_in_tree"));
    }

    #[test]
    fn test_test_subset_restricts_population() {
        let (dir, tree, traits) = setup("subset");
        let executor = InstantExecutor::new(&traits);

        let subset: Vec<String> = vec!["g1".into(), "g5".into(), "g8".into(), "g9".into()];
        let mut fold = Fold::new(&tree, &traits, dir.join("fold")).unwrap();
        fold.partition(2, Some(subset.clone()), 0, &executor).unwrap();

        let mut all: Vec<String> = fold
            .partitions()
            .iter()
            .flat_map(|p| p.held_out().iter().cloned())
            .collect();
        all.sort();
        assert_eq!(all, subset, "only the test subset is partitioned");
    }

    #[test]
    fn test_analyze_merges_all_partitions() {
        let (dir, tree, traits) = setup("analyze");
        let executor = InstantExecutor::new(&traits);

        let mut fold = Fold::new(&tree, &traits, dir.join("fold")).unwrap();
        fold.partition(3, None, 0, &executor).unwrap();
        fold.analyze(Metric::Correlation, &executor).unwrap();

        assert_eq!(fold.results.len(), 10);
        for (id, score) in &fold.results {
            assert!((score - 1.0).abs() < 1e-12, "{} scored {}", id, score);
        }
    }

    #[test]
    fn test_analyze_waits_then_retries_once() {
        let (dir, tree, traits) = setup("deferred");
        let executor = DeferredExecutor::new(&traits);

        let mut fold = Fold::new(&tree, &traits, dir.join("fold")).unwrap();
        fold.partition(2, None, 0, &executor).unwrap();

        // Jobs produce no output until waited on.
        fold.analyze(Metric::Correlation, &executor).unwrap();
        assert_eq!(*executor.waits.borrow(), 2, "one wait per pending partition");
        assert_eq!(fold.results.len(), 10);
    }
}
