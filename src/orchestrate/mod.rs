//! Resumable k-fold experiment orchestration.
//!
//! This is the state machine the crate exists for. The pipeline:
//!
//! ```text
//! Experiment → N Folds → k Partitions each → one scheduler job each
//!      ↓           ↓            ↓                     ↓
//!  summary.tab  merge      held-out ids,        format → asr →
//!              results    reference table        predict
//! ```
//!
//! Every layer persists its state to the working directory as it goes,
//! so a killed process resumes where it left off: a [`Partition`] whose
//! predicted output already exists is never resubmitted, and a
//! [`Fold`] reloads its existing partitions instead of re-randomizing
//! them.
//!
//! ## Ownership discipline
//!
//! There are no locks because there is no sharing: each partition is the
//! sole writer to its own subdirectory, each fold to its `fold<i>/`
//! tree, and the experiment to the top-level summary file. Correctness
//! depends on never running two orchestrator processes against the same
//! working directory at once - a caller obligation this crate does not
//! enforce.

pub mod experiment;
pub mod fold;
pub mod partition;

pub use experiment::Experiment;
pub use fold::Fold;
pub use partition::{Partition, PartitionContext, Status};

/// Shared test plumbing: stub executors that stand in for the batch
/// scheduler.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::error::{Error, Result};
    use crate::executor::{JobExecutor, JobHandle};
    use crate::table::TraitTable;

    /// Reads the partition's held-out list at submit time and writes
    /// perfect predictions (the truth table's own rows) immediately, so
    /// every comparison scores as a perfect prediction.
    pub struct InstantExecutor {
        truth: PathBuf,
        pub submissions: RefCell<Vec<String>>,
    }

    impl InstantExecutor {
        pub fn new(truth: impl Into<PathBuf>) -> Self {
            Self { truth: truth.into(), submissions: RefCell::new(Vec::new()) }
        }

        pub fn submission_count(&self) -> usize {
            self.submissions.borrow().len()
        }
    }

    pub fn write_predictions(truth: &Path, work_dir: &Path) -> Result<()> {
        let ids = read_held_out(work_dir)?;
        let table = TraitTable::parse(truth)?;
        table.write_subset(work_dir.join("predicted_traits.tab"), &ids, false)?;
        Ok(())
    }

    pub fn read_held_out(work_dir: &Path) -> Result<Vec<String>> {
        let path = work_dir.join("test_genomes.txt");
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(text.lines().map(str::to_string).collect())
    }

    impl JobExecutor for InstantExecutor {
        fn submit(&self, _steps: &[String], work_dir: &Path) -> Result<JobHandle> {
            write_predictions(&self.truth, work_dir)?;
            let name = format!("stub{}", self.submissions.borrow().len());
            self.submissions.borrow_mut().push(name.clone());
            Ok(JobHandle { name })
        }

        fn wait(&self, _pattern: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Defers writing predictions until `wait` is called, exercising the
    /// not-ready → wait → retry path in `Fold::analyze`.
    pub struct DeferredExecutor {
        truth: PathBuf,
        pending: RefCell<Vec<(String, PathBuf)>>,
        pub waits: RefCell<usize>,
    }

    impl DeferredExecutor {
        pub fn new(truth: impl Into<PathBuf>) -> Self {
            Self { truth: truth.into(), pending: RefCell::new(Vec::new()), waits: RefCell::new(0) }
        }
    }

    impl JobExecutor for DeferredExecutor {
        fn submit(&self, _steps: &[String], work_dir: &Path) -> Result<JobHandle> {
            let name = format!("deferred{}", self.pending.borrow().len());
            self.pending.borrow_mut().push((name.clone(), work_dir.to_path_buf()));
            Ok(JobHandle { name })
        }

        fn wait(&self, pattern: &str) -> Result<()> {
            *self.waits.borrow_mut() += 1;
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(|(name, _)| name == pattern) {
                let (_, work_dir) = pending.remove(pos);
                write_predictions(&self.truth, &work_dir)?;
            }
            Ok(())
        }
    }
}
