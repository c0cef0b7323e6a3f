//! traitfold CLI - k-fold evaluation of phylogenetic trait prediction
//!
//! Command-line entry point. Three verbs:
//!
//! 1. evaluate: run a bootstrapped k-fold experiment against a reference
//!    trait table and tree, writing per-iteration scores to summary.tab
//! 2. compare: score two trait tables against each other directly
//! 3. predict: submit one prediction pipeline and wait for its output
//!
//! Design philosophy:
//! - Everything restartable: rerun the same command after a crash and it
//!   resumes instead of redoing finished work
//! - Fail fast with clear error messages
//! - The scheduler is configuration, not code (traitfold.toml)
//! - Verbose mode narrates every stage for long cluster runs

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use traitfold::executor::{metagenome_workflow, trait_workflow, TableKind};
use traitfold::{BsubExecutor, Config, Experiment, JobExecutor, JobSequence, Metric, TraitTable};

/// Evaluate phylogenetic trait prediction by k-fold cross-validation
///
/// traitfold holds out genomes from a reference trait table, has the
/// external prediction tool infer their traits from the phylogeny, and
/// scores the predictions against the held-out truth. Work runs on an
/// LSF-style batch scheduler and every stage persists to disk, so a
/// killed run resumes where it stopped.
///
/// Examples:
///   traitfold evaluate -t tree.newick -i traits.tab -k 10 -o eval/
///   traitfold compare --observed truth.tab --predicted pred.tab
///   traitfold predict -t tree.newick -i traits.tab -o out/
#[derive(Parser, Debug)]
#[command(name = "traitfold")]
#[command(version)]
#[command(about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    ///
    /// Narrates progress during execution:
    ///   "Partitioning 2134 genomes into 10 folds"
    ///   "Submitted traitfold_cmd3"
    ///   "Waiting on fold 0..."
    ///
    /// Helpful for multi-hour cluster runs.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a bootstrapped k-fold evaluation experiment
    Evaluate(EvaluateArgs),
    /// Score two trait tables against each other
    Compare(CompareArgs),
    /// Submit one prediction pipeline and wait for its output
    Predict(PredictArgs),
}

#[derive(clap::Args, Debug)]
pub struct EvaluateArgs {
    /// Reference tree in newick format
    ///
    /// Tip names must match the entity identifiers in the trait table;
    /// the fold population is drawn from these tips.
    #[arg(short, long)]
    pub tree: PathBuf,

    /// Reference trait table (tab-separated, header first)
    #[arg(short = 'i', long)]
    pub traits: PathBuf,

    /// Number of folds per iteration
    ///
    /// Each iteration splits the population into k disjoint partitions;
    /// every genome is held out exactly once per iteration.
    #[arg(short, long, default_value = "10")]
    pub k: usize,

    /// Number of bootstrap iterations
    ///
    /// Each iteration re-randomizes the fold assignment (seeded) and
    /// contributes one score column to summary.tab.
    #[arg(short, long, default_value = "1")]
    pub bootstrap: usize,

    /// Comparison metric: correlation, disimilarity, or positivepred
    #[arg(short, long, default_value = "correlation")]
    pub metric: String,

    /// Random seed for fold assignment
    ///
    /// Iteration i uses seed + i, so a fixed seed reproduces the whole
    /// experiment exactly.
    #[arg(short, long, default_value = "0")]
    pub seed: u64,

    /// Working directory for the experiment
    ///
    /// Holds fold<i>/partition<j>/ state and the final summary.tab.
    /// Rerunning over an existing directory resumes it.
    #[arg(short, long)]
    pub out: PathBuf,

    /// Restrict evaluation to the genome ids in this file (one per line)
    ///
    /// Only listed genomes are partitioned and predicted; the rest of
    /// the table still serves as reference data.
    #[arg(long)]
    pub test_subset: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct CompareArgs {
    /// Observed (ground truth) trait table
    #[arg(long)]
    pub observed: PathBuf,

    /// Predicted trait table
    #[arg(long)]
    pub predicted: PathBuf,

    /// Compare only the entity ids in this file (one per line)
    ///
    /// Defaults to every entity in the observed table.
    #[arg(long)]
    pub ids: Option<PathBuf>,

    /// Comparison metric: correlation, disimilarity, or positivepred
    #[arg(short, long, default_value = "correlation")]
    pub metric: String,

    /// Write results here instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// Which prediction pipeline to submit.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictKind {
    /// Functional trait prediction from the tree
    Trait,
    /// Marker gene copy-number prediction from the tree
    Marker,
    /// Metagenome prediction from an OTU table
    Metagenome,
}

#[derive(clap::Args, Debug)]
pub struct PredictArgs {
    /// Pipeline to run
    #[arg(long, value_enum, default_value = "trait")]
    pub kind: PredictKind,

    /// Reference tree in newick format (trait and marker pipelines)
    #[arg(short, long)]
    pub tree: Option<PathBuf>,

    /// Input trait table
    ///
    /// The trait or marker table for tree-based prediction, or the
    /// per-genome trait table for metagenome prediction.
    #[arg(short = 'i', long)]
    pub traits: PathBuf,

    /// OTU abundance table (metagenome pipeline)
    #[arg(long)]
    pub otu_table: Option<PathBuf>,

    /// Marker copy-number table (metagenome pipeline)
    #[arg(long)]
    pub copy_numbers: Option<PathBuf>,

    /// Working directory for pipeline intermediates and output
    #[arg(short, long)]
    pub out: PathBuf,

    /// Limit prediction to these tip names (comma-separated)
    #[arg(short = 'g', long, value_delimiter = ',')]
    pub limit: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Evaluate(args) => run_evaluate(&cli, args),
        Command::Compare(args) => run_compare(&cli, args),
        Command::Predict(args) => run_predict(&cli, args),
    }
}

/// One id per line, blank lines skipped.
fn read_id_file(path: &PathBuf) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read id file '{}'", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn scheduler_executor(cli: &Cli, work_dir: &PathBuf) -> BsubExecutor {
    let config = Config::load(work_dir);
    if cli.verbose {
        eprintln!("{}", config.display_summary());
    }
    BsubExecutor::new(config, JobSequence::new())
}

fn run_evaluate(cli: &Cli, args: &EvaluateArgs) -> Result<()> {
    let metric: Metric = args.metric.parse()?;
    let test_subset = args.test_subset.as_ref().map(read_id_file).transpose()?;

    if cli.verbose {
        eprintln!("🧬 traitfold v{}", env!("CARGO_PKG_VERSION"));
        eprintln!(
            "📂 Evaluating {} over {} ({} folds, {} iterations, {})",
            args.traits.display(),
            args.tree.display(),
            args.k,
            args.bootstrap,
            metric
        );
    }

    let executor = scheduler_executor(cli, &args.out);
    let mut experiment = Experiment::new(
        &args.tree,
        &args.traits,
        args.k,
        &args.out,
        args.seed,
        test_subset,
    )?;
    let summary = experiment.run(args.bootstrap, metric, &executor)?;

    if cli.verbose {
        eprintln!("✓ Wrote {}", summary.display());
    }
    println!("{}", summary.display());
    Ok(())
}

fn run_compare(cli: &Cli, args: &CompareArgs) -> Result<()> {
    let metric: Metric = args.metric.parse()?;
    let ids = args.ids.as_ref().map(read_id_file).transpose()?;

    let rows =
        TraitTable::compare_two_tables(&args.observed, &args.predicted, ids.as_deref(), metric)?;

    let mut out = String::from("genome\tscore\tmetadata_NSTI\n");
    for row in &rows {
        let nsti = row.nsti.map(|n| n.to_string()).unwrap_or_else(|| "NA".into());
        out.push_str(&format!("{}\t{}\t{}\n", row.name, row.score, nsti));
    }

    match &args.out {
        Some(path) => {
            fs::write(path, &out)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if cli.verbose {
                eprintln!("✓ Wrote {} comparisons to {}", rows.len(), path.display());
            }
        }
        None => print!("{}", out),
    }
    Ok(())
}

fn run_predict(cli: &Cli, args: &PredictArgs) -> Result<()> {
    let limit = (!args.limit.is_empty()).then_some(args.limit.as_slice());

    let workflow = match args.kind {
        PredictKind::Trait | PredictKind::Marker => {
            let tree = args
                .tree
                .as_ref()
                .context("--tree is required for trait and marker prediction")?;
            let kind = match args.kind {
                PredictKind::Trait => TableKind::Trait,
                _ => TableKind::Marker,
            };
            trait_workflow(tree, &args.traits, kind, &args.out, limit)?
        }
        PredictKind::Metagenome => {
            let otu_table = args
                .otu_table
                .as_ref()
                .context("--otu-table is required for metagenome prediction")?;
            let copy_numbers = args
                .copy_numbers
                .as_ref()
                .context("--copy-numbers is required for metagenome prediction")?;
            metagenome_workflow(otu_table, copy_numbers, &args.traits, &args.out)?
        }
    };

    let executor = scheduler_executor(cli, &args.out);
    let handle = executor.submit(&workflow.steps, &args.out)?;
    if cli.verbose {
        eprintln!("✓ Submitted {} ({} steps)", handle.name, workflow.steps.len());
        eprintln!("⏳ Waiting for the scheduler...");
    }
    executor.wait(&handle.name)?;

    if !workflow.predicted_output.exists() {
        anyhow::bail!(
            "job '{}' finished but '{}' was not produced; check scheduler.err in {}",
            handle.name,
            workflow.predicted_output.display(),
            args.out.display()
        );
    }

    if cli.verbose {
        eprintln!("✓ Prediction complete");
    }
    println!("{}", workflow.predicted_output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_evaluate() {
        let cli = Cli::parse_from([
            "traitfold", "evaluate", "-t", "tree.newick", "-i", "traits.tab", "-o", "eval",
        ]);
        let Command::Evaluate(args) = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(args.tree, PathBuf::from("tree.newick"));
        assert_eq!(args.k, 10);
        assert_eq!(args.bootstrap, 1);
        assert_eq!(args.metric, "correlation");
        assert_eq!(args.seed, 0);
    }

    #[test]
    fn test_cli_parse_evaluate_overrides() {
        let cli = Cli::parse_from([
            "traitfold", "evaluate", "-t", "t", "-i", "i", "-o", "o", "-k", "5", "-b", "3",
            "-m", "disimilarity", "-s", "42", "--test-subset", "ids.txt", "-v",
        ]);
        assert!(cli.verbose);
        let Command::Evaluate(args) = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(args.k, 5);
        assert_eq!(args.bootstrap, 3);
        assert_eq!(args.metric, "disimilarity");
        assert_eq!(args.seed, 42);
        assert_eq!(args.test_subset, Some(PathBuf::from("ids.txt")));
    }

    #[test]
    fn test_cli_parse_compare() {
        let cli = Cli::parse_from([
            "traitfold", "compare", "--observed", "a.tab", "--predicted", "b.tab",
        ]);
        let Command::Compare(args) = cli.command else {
            panic!("expected compare");
        };
        assert_eq!(args.observed, PathBuf::from("a.tab"));
        assert!(args.ids.is_none());
        assert!(args.out.is_none());
    }

    #[test]
    fn test_cli_parse_predict_limit() {
        let cli = Cli::parse_from([
            "traitfold", "predict", "-t", "tree.newick", "-i", "traits.tab", "-o", "out",
            "-g", "g1,g2,g3",
        ]);
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert_eq!(args.kind, PredictKind::Trait);
        assert_eq!(args.limit, vec!["g1", "g2", "g3"]);
    }

    #[test]
    fn test_cli_parse_predict_metagenome() {
        let cli = Cli::parse_from([
            "traitfold", "predict", "--kind", "metagenome", "-i", "traits.tab",
            "--otu-table", "otus.biom", "--copy-numbers", "copies.tab", "-o", "out",
        ]);
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert_eq!(args.kind, PredictKind::Metagenome);
        assert_eq!(args.otu_table, Some(PathBuf::from("otus.biom")));
    }

    #[test]
    fn test_bad_metric_rejected_at_parse() {
        let err = "euclidean".parse::<Metric>().unwrap_err();
        assert!(err.to_string().contains("euclidean"));
    }
}
