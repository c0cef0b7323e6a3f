//! One held-out subset of entities and the lifecycle of its prediction
//! job.
//!
//! ## State machine
//!
//! ```text
//! Incomplete ──prepare──▶ Running ──resolve──▶ Finished
//!      ▲                     │
//!      └──────recover────────┴────────────────▶ Failed
//! ```
//!
//! State is persisted in the partition directory as it changes:
//!
//! ```text
//! <workdir>/partitionN/
//!   test_genomes.txt       held-out identifier list, one per line
//!   reference_traits.tab   full table minus the held-out entities
//!   status.json            explicit status + submitted job name
//!   predicted_traits.tab   written by the external job when it finishes
//! ```
//!
//! `status.json` removes the ambiguity between "not yet started" and
//! "started but crashed before writing", which bare file-existence
//! checks cannot distinguish. Presence of `predicted_traits.tab` stays
//! authoritative for job completion, because only the external job
//! writes it.
//!
//! Recovery is deterministic and idempotent: recovering a directory that
//! already holds complete state re-reads it without resubmitting the job
//! or overwriting its output.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::executor::{trait_workflow, JobExecutor, JobHandle, TableKind};
use crate::table::{Metric, TableEntry, TraitTable};

const TEST_GENOMES_FILE: &str = "test_genomes.txt";
const REFERENCE_TRAITS_FILE: &str = "reference_traits.tab";
const STATUS_FILE: &str = "status.json";
const PREDICTED_TRAITS_FILE: &str = "predicted_traits.tab";

/// Partition lifecycle status, persisted in `status.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Constructed; nothing written or submitted yet.
    Incomplete,
    /// Inputs written and the prediction job submitted.
    Running,
    /// Every held-out entity scored.
    Finished,
    /// The job completed but at least one held-out entity has no score.
    Failed,
}

/// On-disk manifest mirrored by `status.json`.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    status: Status,
    job_name: Option<String>,
}

/// Read-only fold state a partition needs to do its work. Split out so
/// the fold can hand it to one partition while holding the rest.
pub struct PartitionContext<'a> {
    /// The full reference trait table (ground truth for every entity).
    pub table: &'a TraitTable,
    /// The reference tree handed to the external tool.
    pub tree: &'a Path,
    /// True when the experiment tests a proper subset of the tree; the
    /// predict step is then restricted to the held-out identifiers.
    pub restrict: bool,
}

/// One held-out test set, its working directory, and its job.
#[derive(Debug)]
pub struct Partition {
    held_out: Vec<String>,
    work_dir: PathBuf,
    status: Status,
    job: Option<JobHandle>,
}

impl Partition {
    /// Construct a fresh partition around a held-out identifier set,
    /// creating the working directory if absent.
    pub fn new(held_out: Vec<String>, work_dir: impl Into<PathBuf>) -> Result<Self> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir).map_err(|e| Error::io(&work_dir, e))?;
        Ok(Self { held_out, work_dir, status: Status::Incomplete, job: None })
    }

    pub fn held_out(&self) -> &[String] {
        &self.held_out
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Name of the submitted job, if one is known.
    pub fn job_name(&self) -> Option<&str> {
        self.job.as_ref().map(|j| j.name.as_str())
    }

    fn path(&self, file: &str) -> PathBuf {
        self.work_dir.join(file)
    }

    /// Incomplete → Running: write the held-out list and the reference
    /// table (everything except the held-out entities), then submit the
    /// prediction job.
    pub fn prepare(&mut self, ctx: &PartitionContext<'_>, executor: &dyn JobExecutor) -> Result<()> {
        self.write_held_out()?;
        self.write_reference(ctx)?;
        self.submit(ctx, executor)?;
        Ok(())
    }

    /// Cold-start recovery from a working directory alone.
    ///
    /// Returns `Ok(None)` when the directory holds no partition (no
    /// held-out list), which callers interpret as "this index was never
    /// created". Otherwise reconstructs the partition: regenerates the
    /// reference table if it went missing, and resubmits the job unless
    /// the predicted output already exists.
    pub fn recover(
        work_dir: impl Into<PathBuf>,
        ctx: &PartitionContext<'_>,
        executor: &dyn JobExecutor,
    ) -> Result<Option<Self>> {
        let work_dir = work_dir.into();
        let ids_path = work_dir.join(TEST_GENOMES_FILE);
        if !ids_path.is_file() {
            return Ok(None);
        }

        let text = fs::read_to_string(&ids_path).map_err(|e| Error::io(&ids_path, e))?;
        let held_out: Vec<String> =
            text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();

        let manifest = Self::read_manifest(&work_dir);
        let mut partition = Self {
            held_out,
            work_dir,
            status: Status::Incomplete,
            job: manifest
                .as_ref()
                .and_then(|m| m.job_name.clone())
                .map(|name| JobHandle { name }),
        };

        if !partition.path(REFERENCE_TRAITS_FILE).is_file() {
            info!(dir = %partition.work_dir.display(), "reference table missing, regenerating");
            partition.write_reference(ctx)?;
        }

        if partition.path(PREDICTED_TRAITS_FILE).is_file() {
            // Job output exists: the job completed in a prior life. Keep
            // a previously recorded Finished status, otherwise fall back
            // to Running so resolve() parses the output.
            partition.status = match manifest.map(|m| m.status) {
                Some(Status::Finished) => Status::Finished,
                _ => Status::Running,
            };
            partition.write_manifest()?;
            info!(dir = %partition.work_dir.display(), "recovered with completed job output");
        } else {
            info!(dir = %partition.work_dir.display(), "no job output, resubmitting");
            partition.submit(ctx, executor)?;
        }

        Ok(Some(partition))
    }

    /// Running → Finished: parse the predicted table and score every
    /// held-out entity against its observed counterpart.
    ///
    /// Fails with [`Error::ResultsNotReady`] while the job output is
    /// absent - callers may wait on the job and retry. A held-out entity
    /// without a resolvable score fails the whole partition with
    /// [`Error::IncompleteResult`]; partial partition results are not
    /// acceptable.
    pub fn resolve(
        &mut self,
        ctx: &PartitionContext<'_>,
        metric: Metric,
    ) -> Result<HashMap<String, f64>> {
        let predicted_path = self.path(PREDICTED_TRAITS_FILE);
        if !predicted_path.is_file() {
            return Err(Error::ResultsNotReady { path: predicted_path });
        }

        let predicted = TraitTable::parse(&predicted_path)?;
        let wanted: HashSet<&str> = self.held_out.iter().map(String::as_str).collect();

        // One pass over the predicted table, keeping only held-out rows.
        let mut predictions: HashMap<String, TableEntry> = HashMap::new();
        for entry in predicted.entries()? {
            if wanted.contains(entry.name.as_str()) {
                predictions.insert(entry.name.clone(), entry);
            }
        }

        // Join observed to predicted by identifier and score each pair.
        let mut results = HashMap::new();
        for observed in ctx.table.subset(self.held_out.iter().cloned(), false)? {
            if let Some(pred) = predictions.get(&observed.name) {
                let score = observed.compare(pred, metric, None)?;
                results.insert(observed.name.clone(), score);
            }
        }

        for id in &self.held_out {
            if !results.contains_key(id) {
                self.status = Status::Failed;
                self.write_manifest()?;
                return Err(Error::IncompleteResult { entity: id.clone() });
            }
        }

        self.status = Status::Finished;
        self.write_manifest()?;
        Ok(results)
    }

    fn write_held_out(&self) -> Result<()> {
        let path = self.path(TEST_GENOMES_FILE);
        let mut text = self.held_out.join("\n");
        text.push('\n');
        fs::write(&path, text).map_err(|e| Error::io(&path, e))
    }

    fn write_reference(&self, ctx: &PartitionContext<'_>) -> Result<()> {
        ctx.table.write_subset(self.path(REFERENCE_TRAITS_FILE), &self.held_out, true)?;
        Ok(())
    }

    fn submit(&mut self, ctx: &PartitionContext<'_>, executor: &dyn JobExecutor) -> Result<()> {
        let limit = ctx.restrict.then_some(self.held_out.as_slice());
        let workflow = trait_workflow(
            ctx.tree,
            &self.path(REFERENCE_TRAITS_FILE),
            TableKind::Trait,
            &self.work_dir,
            limit,
        )?;
        let handle = executor.submit(&workflow.steps, &self.work_dir)?;
        self.job = Some(handle);
        self.status = Status::Running;
        self.write_manifest()
    }

    fn write_manifest(&self) -> Result<()> {
        let manifest = Manifest {
            status: self.status,
            job_name: self.job.as_ref().map(|j| j.name.clone()),
        };
        let path = self.path(STATUS_FILE);
        let json = serde_json::to_string_pretty(&manifest)
            .expect("manifest serialization cannot fail");
        fs::write(&path, json).map_err(|e| Error::io(&path, e))
    }

    fn read_manifest(work_dir: &Path) -> Option<Manifest> {
        let text = fs::read_to_string(work_dir.join(STATUS_FILE)).ok()?;
        serde_json::from_str(&text).ok()
    }
}
