//! traitfold - Resumable k-fold evaluation of phylogenetic trait prediction
//!
//! Holds out slices of a reference trait table, asks an external
//! PICRUSt-style tool to predict them back from the phylogeny, and scores
//! the predictions against the truth. Everything is file-backed and
//! resumable: kill the orchestrator mid-experiment and it picks up from
//! whatever the working directory already holds.
//!
//! # Architecture
//!
//! ```text
//! Trait Table → k-fold Partitioning → Scheduler Jobs → Comparison → Summary
//!      ↓               ↓                    ↓               ↓           ↓
//!   lazy tab        seeded rand         bsub/bjobs      Spearman    summary.tab
//!   streaming       disjoint folds      polling         et al.      wide table
//! ```
//!
//! # Design notes
//!
//! - Trait tables stream lazily; reference tables are too large to hold
//!   in memory
//! - Partition state persists to disk as it changes, never reconstructed
//!   from guesswork
//! - The prediction tool is opaque: we own paths and job names, nothing
//!   else
//! - Single-threaded on purpose; the cluster provides the parallelism

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrate;
pub mod table;
pub mod tree;

// Re-export core types
pub use config::Config;
pub use error::{Error, Result};
pub use executor::{BsubExecutor, JobExecutor, JobHandle, JobSequence};
pub use orchestrate::{Experiment, Fold, Partition, Status};
pub use table::{Comparison, Metric, TableEntry, TraitTable, TraitValue};
