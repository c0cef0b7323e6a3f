//! External batch job submission and polling.
//!
//! The prediction tool runs as a pipeline of shell steps on an LSF-style
//! scheduler, far outside this process. This module owns exactly two
//! verbs:
//!
//! 1. `submit` - enqueue a named pipeline, fire-and-forget
//! 2. `wait` - block, polling until the scheduler no longer reports the
//!    named job
//!
//! There is no cancellation and no timeout at this layer: once submitted
//! a job runs to completion or failure on its own, and callers needing a
//! bounded wait must impose one externally.
//!
//! ## Job naming
//!
//! Unique job names come from a [`JobSequence`] injected at executor
//! construction. The sequence is plain owned state, not a process-wide
//! global, so two executors in one process (in tests, say) never collide
//! over job numbering.

pub mod workflow;

use std::cell::Cell;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

pub use workflow::{metagenome_workflow, trait_workflow, TableKind, Workflow};

use crate::config::Config;
use crate::error::{Error, Result};

/// Handle to a submitted job, identified by its scheduler job name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
}

/// Monotonic job-sequence counter.
///
/// Injected into executors at construction; each `submit` consumes one
/// number. Single-threaded by design, like the rest of the orchestrator.
#[derive(Debug, Default)]
pub struct JobSequence(Cell<u64>);

impl JobSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a specific value (useful when resuming).
    pub fn starting_at(n: u64) -> Self {
        Self(Cell::new(n))
    }

    fn next(&self) -> u64 {
        let n = self.0.get();
        self.0.set(n + 1);
        n
    }
}

/// Submission and blocking-wait contract for an external scheduler.
///
/// `submit` takes an ordered list of shell-invocable steps (dependent,
/// run sequentially in one job) and the job's working directory, and
/// returns immediately. `wait` takes a job-name glob pattern and blocks
/// until the scheduler reports no matching job.
pub trait JobExecutor {
    fn submit(&self, steps: &[String], work_dir: &Path) -> Result<JobHandle>;
    fn wait(&self, pattern: &str) -> Result<()>;
}

/// LSF executor: `bsub` to submit, `bjobs` polled to wait.
///
/// Command names and the polling interval come from [`Config`], so other
/// bsub-compatible wrappers can be dropped in without code changes.
pub struct BsubExecutor {
    config: Config,
    sequence: JobSequence,
}

impl BsubExecutor {
    pub fn new(config: Config, sequence: JobSequence) -> Self {
        Self { config, sequence }
    }
}

impl JobExecutor for BsubExecutor {
    fn submit(&self, steps: &[String], work_dir: &Path) -> Result<JobHandle> {
        let name = format!("{}{}", self.config.job_prefix, self.sequence.next());
        // Dependent steps chained into a single scheduler job.
        let pipeline = steps.join("; ");

        info!(job = %name, dir = %work_dir.display(), "submitting prediction job");
        debug!(%pipeline);

        let status = Command::new(&self.config.submit)
            .arg("-o")
            .arg(work_dir.join("scheduler.out"))
            .arg("-e")
            .arg(work_dir.join("scheduler.err"))
            .arg("-J")
            .arg(&name)
            .arg(&pipeline)
            .status()
            .map_err(|e| Error::Scheduler(format!("failed to run {}: {}", self.config.submit, e)))?;

        if !status.success() {
            return Err(Error::Scheduler(format!(
                "{} exited with {} submitting job '{}'",
                self.config.submit, status, name
            )));
        }

        Ok(JobHandle { name })
    }

    fn wait(&self, pattern: &str) -> Result<()> {
        info!(%pattern, "waiting for job to leave the queue");
        loop {
            let output = Command::new(&self.config.query)
                .arg("-J")
                .arg(pattern)
                .output()
                .map_err(|e| {
                    Error::Scheduler(format!("failed to run {}: {}", self.config.query, e))
                })?;

            // An empty job listing means nothing matching is pending or
            // running. bjobs reports "no matching job found" on stderr,
            // so only stdout counts.
            if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(());
            }

            std::thread::sleep(self.config.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = JobSequence::new();
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn test_independent_sequences_do_not_collide() {
        let a = JobSequence::new();
        let b = JobSequence::starting_at(100);
        assert_eq!(a.next(), 0);
        assert_eq!(b.next(), 100);
        assert_eq!(a.next(), 1);
    }
}
