//! Command pipelines for the external prediction tool.
//!
//! The prediction algorithm is opaque to this crate; what we own is the
//! path contract of its PICRUSt-style scripts, each an independently
//! executable step with explicit input/output paths:
//!
//! - trait prediction: format → ancestral-state-reconstruction → predict
//! - metagenome prediction: normalize → predict-metagenome
//!
//! A [`Workflow`] bundles the ordered step list (submitted as one
//! scheduler job) with the path where the final prediction lands, which
//! is everything the orchestrator needs to later parse results.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Which kind of table a trait-prediction workflow operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Functional trait counts per genome.
    Trait,
    /// Marker gene copy numbers per genome.
    Marker,
}

/// An ordered pipeline of external steps plus its promised output path.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Shell-invocable steps, dependent, in execution order.
    pub steps: Vec<String>,
    /// Path the final step writes its predictions to.
    pub predicted_output: PathBuf,
}

/// Build the trait-prediction pipeline for one working directory.
///
/// `limit`, when given, restricts prediction to those tip names; it is
/// passed to the predict step as the comma-joined list its `-g` flag
/// expects.
pub fn trait_workflow(
    tree: &Path,
    trait_table: &Path,
    kind: TableKind,
    base_dir: &Path,
    limit: Option<&[String]>,
) -> Result<Workflow> {
    fs::create_dir_all(base_dir).map_err(|e| Error::io(base_dir, e))?;

    let (format_dir, predicted_output) = match kind {
        TableKind::Trait => (base_dir.join("format_trait"), base_dir.join("predicted_traits.tab")),
        TableKind::Marker => {
            (base_dir.join("format_marker"), base_dir.join("predicted_markers.tab"))
        }
    };

    // Paths produced by the format step, consumed downstream.
    let fmt_table = format_dir.join("trait_table.tab");
    let fmt_tree = format_dir.join("reference_tree.newick");
    let pruned_tree = format_dir.join("pruned_tree.newick");
    let asr_out = format_dir.join("asr.tab");

    let format = format!(
        "format_tree_and_trait_table.py -t {} -i {} -o {}",
        tree.display(),
        trait_table.display(),
        format_dir.display()
    );
    let reconstruct = format!(
        "ancestral_state_reconstruction.py -i {} -t {} -o {}",
        fmt_table.display(),
        pruned_tree.display(),
        asr_out.display()
    );
    let mut predict = format!(
        "predict_traits.py -i {} -t {} -r {} -o {} -a",
        fmt_table.display(),
        fmt_tree.display(),
        asr_out.display(),
        predicted_output.display()
    );
    if let Some(ids) = limit {
        if !ids.is_empty() {
            predict.push_str(&format!(" -g {}", ids.join(",")));
        }
    }

    Ok(Workflow { steps: vec![format, reconstruct, predict], predicted_output })
}

/// Build the metagenome-prediction pipeline for one working directory.
pub fn metagenome_workflow(
    otu_table: &Path,
    copy_numbers: &Path,
    trait_table: &Path,
    base_dir: &Path,
) -> Result<Workflow> {
    fs::create_dir_all(base_dir).map_err(|e| Error::io(base_dir, e))?;

    let normalized = base_dir.join("normalized_OTU_table.biom");
    let predicted_output = base_dir.join("predicted_metagenome.tab");

    let normalize = format!(
        "normalize_by_copy_number.py -i {} -c {} -o {}",
        otu_table.display(),
        copy_numbers.display(),
        normalized.display()
    );
    let predict = format!(
        "predict_metagenomes.py -i {} -c {} -o {} -f",
        normalized.display(),
        trait_table.display(),
        predicted_output.display()
    );

    Ok(Workflow { steps: vec![normalize, predict], predicted_output })
}
