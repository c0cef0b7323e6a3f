//! Leaf-name extraction from newick trees.
//!
//! The orchestrator only needs the set of terminal taxon names from the
//! reference tree; topology, branch lengths, and support values are the
//! external prediction tool's business. This is therefore not a tree
//! parser but a scanner that recognizes the one structural fact that
//! matters: a label token directly following `(` or `,` names a leaf.
//!
//! Digit-only leaf names are kept as names (some reference trees use
//! bare genome ids), bracketed comments are skipped, and quoted labels
//! are supported. Duplicate leaf names violate the entity-uniqueness
//! contract and are a format error.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Read a newick file and return its leaf names in file order.
pub fn leaf_names(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let leaves = leaves_from_newick(&text)?;
    if leaves.is_empty() {
        return Err(Error::Format(format!(
            "{}: no leaf names found in tree",
            path.display()
        )));
    }
    Ok(leaves)
}

/// Sentinel for "the previous token was a label, not a delimiter".
const AFTER_LABEL: char = '\0';

fn leaves_from_newick(text: &str) -> Result<Vec<String>> {
    let mut leaves = Vec::new();
    let mut seen = HashSet::new();
    // Treat the start of input as following '(' so a degenerate
    // single-leaf tree like "g1;" still yields its one name.
    let mut prev = '(';

    let mut iter = text.chars().peekable();
    while let Some(&c) = iter.peek() {
        match c {
            // Bracketed comment: skip wholesale.
            '[' => {
                iter.next();
                for x in iter.by_ref() {
                    if x == ']' {
                        break;
                    }
                }
            }
            '(' | ',' | ')' | ':' | ';' => {
                prev = c;
                iter.next();
            }
            c if c.is_whitespace() => {
                iter.next();
            }
            // Quoted label.
            '\'' => {
                iter.next();
                let mut token = String::new();
                for x in iter.by_ref() {
                    if x == '\'' {
                        break;
                    }
                    token.push(x);
                }
                record_token(token, prev, &mut leaves, &mut seen)?;
                prev = AFTER_LABEL;
            }
            // Bare label (or a branch length / internal name, decided
            // by context).
            _ => {
                let mut token = String::new();
                while let Some(&x) = iter.peek() {
                    if matches!(x, '(' | ',' | ')' | ':' | ';' | '[') || x.is_whitespace() {
                        break;
                    }
                    token.push(x);
                    iter.next();
                }
                record_token(token, prev, &mut leaves, &mut seen)?;
                prev = AFTER_LABEL;
            }
        }
    }

    Ok(leaves)
}

fn record_token(
    token: String,
    prev: char,
    leaves: &mut Vec<String>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    // Only a label directly after '(' or ',' is a leaf; after ')' it is
    // an internal node name, after ':' it is a branch length.
    if (prev == '(' || prev == ',') && !token.is_empty() {
        if !seen.insert(token.clone()) {
            return Err(Error::Format(format!("duplicate leaf name '{}' in tree", token)));
        }
        leaves.push(token);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tree() {
        let leaves = leaves_from_newick("(g1:0.1,(g2:0.2,g3:0.3)inner:0.4);").unwrap();
        assert_eq!(leaves, vec!["g1", "g2", "g3"]);
    }

    #[test]
    fn test_internal_names_and_lengths_ignored() {
        let leaves = leaves_from_newick("((a,b)98:1.0,(c,d)77:2.0)root;").unwrap();
        assert_eq!(leaves, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_digit_only_leaf_names_kept() {
        let leaves = leaves_from_newick("(1234,(5678,91011));").unwrap();
        assert_eq!(leaves, vec!["1234", "5678", "91011"]);
    }

    #[test]
    fn test_quoted_and_commented() {
        let leaves = leaves_from_newick("('g one':0.1[support],g2:0.2);").unwrap();
        assert_eq!(leaves, vec!["g one", "g2"]);
    }

    #[test]
    fn test_duplicate_leaf_is_error() {
        let err = leaves_from_newick("(g1,g1);").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_single_leaf() {
        assert_eq!(leaves_from_newick("g1;").unwrap(), vec!["g1"]);
    }
}
