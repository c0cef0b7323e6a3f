//! Natural-order sort key for trait names.
//!
//! Trait names in real tables mix text and counters ("KO2", "KO10",
//! "pathway3b"). Plain lexical sort puts "KO10" before "KO2"; natural
//! order splits each name into alternating digit and non-digit runs and
//! compares digit runs numerically, so "KO2" < "KO10" as a human expects.
//!
//! Digit runs sort before text runs when the two are compared directly,
//! which keeps the ordering total for heterogeneous names like "10x"
//! vs "abc".

use std::cmp::Ordering;

use crate::table::METADATA_PREFIX;

/// One run of a split trait name: either a parsed number or raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Text(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            // Numbers sort before text.
            (Segment::Num(_), Segment::Text(_)) => Ordering::Less,
            (Segment::Text(_), Segment::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key: metadata flag (optional) first, then the segment runs.
///
/// When `metadata_last` is set, any name carrying the reserved metadata
/// prefix keys after every ordinary name regardless of its natural-order
/// segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaturalKey {
    metadata: bool,
    segments: Vec<Segment>,
}

impl NaturalKey {
    /// Build the key for one trait name.
    pub fn new(name: &str, metadata_last: bool) -> Self {
        Self {
            metadata: metadata_last && name.starts_with(METADATA_PREFIX),
            segments: split_runs(name),
        }
    }
}

/// Split a name into alternating digit / non-digit runs.
///
/// Digit runs longer than what fits in u64 fall back to text comparison,
/// which preserves totality at the cost of oddness nobody hits in
/// practice.
fn split_runs(name: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut run = String::new();
    let mut run_is_digit = false;

    for ch in name.chars() {
        let is_digit = ch.is_ascii_digit();
        if !run.is_empty() && is_digit != run_is_digit {
            segments.push(finish_run(run, run_is_digit));
            run = String::new();
        }
        run_is_digit = is_digit;
        run.push(ch);
    }
    if !run.is_empty() {
        segments.push(finish_run(run, run_is_digit));
    }

    segments
}

fn finish_run(run: String, is_digit: bool) -> Segment {
    if is_digit {
        match run.parse::<u64>() {
            Ok(n) => Segment::Num(n),
            Err(_) => Segment::Text(run),
        }
    } else {
        Segment::Text(run)
    }
}
