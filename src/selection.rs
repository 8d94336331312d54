//! Index expressions and destroy-set resolution.
//!
//! Operators pick instances by their position in `skiff list`. An expression
//! such as `1,3,5-7` expands to a set of positions which are resolved
//! against a freshly captured [`Snapshot`]. Modules left without members are
//! pulled into the destroy set so Terraform does not keep empty groupings.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;

use crate::instance::Snapshot;

/// Errors raised while interpreting an index expression.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SelectionError {
    /// Raised when a token is neither an index nor an ascending range.
    #[error(
        "invalid index expression token '{token}': expected a non-negative integer or a range like 2-5"
    )]
    InvalidSyntax {
        /// The offending token as typed.
        token: String,
    },
    /// Raised when an index does not exist in the snapshot.
    #[error("{}", out_of_range_message(.index, .len))]
    OutOfRange {
        /// The requested index.
        index: usize,
        /// Number of instances in the snapshot.
        len: usize,
    },
}

fn out_of_range_message(index: &usize, len: &usize) -> String {
    match len.checked_sub(1) {
        Some(last) => format!(
            "index {index} is out of range: there are {len} instances (valid indices 0-{last})"
        ),
        None => format!("index {index} is out of range: there are no instances"),
    }
}

/// Parsed index expression, held as inclusive ranges so that bounds can be
/// checked before any range is materialised.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexExpression {
    ranges: Vec<(usize, usize)>,
}

impl IndexExpression {
    /// Parses a comma-separated list of indices and `lo-hi` ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::InvalidSyntax`] for the first token that is
    /// empty, non-numeric, negative, or a descending range.
    pub fn parse(expression: &str) -> Result<Self, SelectionError> {
        let mut ranges = Vec::new();
        for raw in expression.split(',') {
            let token = raw.trim();
            let invalid = || SelectionError::InvalidSyntax {
                token: token.to_owned(),
            };
            let range = match token.split_once('-') {
                Some((lo, hi)) => {
                    let start = parse_index(lo).ok_or_else(invalid)?;
                    let end = parse_index(hi).ok_or_else(invalid)?;
                    if start > end {
                        return Err(invalid());
                    }
                    (start, end)
                }
                None => {
                    let index = parse_index(token).ok_or_else(invalid)?;
                    (index, index)
                }
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }

    /// Lowest selected index that is not below `len`, if any.
    #[must_use]
    pub fn first_at_or_above(&self, len: usize) -> Option<usize> {
        self.ranges
            .iter()
            .filter(|(_, hi)| *hi >= len)
            .map(|(lo, _)| (*lo).max(len))
            .min()
    }

    /// Ascending, de-duplicated positions, all of which are below `len`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::OutOfRange`] naming the lowest selected index
    /// outside `0..len`. No range is expanded in that case.
    pub fn indices_within(&self, len: usize) -> Result<Vec<usize>, SelectionError> {
        if let Some(index) = self.first_at_or_above(len) {
            return Err(SelectionError::OutOfRange { index, len });
        }
        Ok(self.indices())
    }

    fn indices(&self) -> Vec<usize> {
        let mut indices = BTreeSet::new();
        for (lo, hi) in &self.ranges {
            indices.extend(*lo..=*hi);
        }
        indices.into_iter().collect()
    }
}

/// Expands an index expression into ascending, de-duplicated positions.
///
/// Ranges are expanded in full; use [`IndexExpression::indices_within`] when
/// the expression comes from an operator and a bound is known.
///
/// # Errors
///
/// Returns [`SelectionError::InvalidSyntax`] for the first token that is
/// empty, non-numeric, negative, or a descending range.
pub fn expand(expression: &str) -> Result<Vec<usize>, SelectionError> {
    IndexExpression::parse(expression).map(|parsed| parsed.indices())
}

fn parse_index(text: &str) -> Option<usize> {
    let digits = text.trim();
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Resolves positions to instance names, preserving ascending index order.
///
/// # Errors
///
/// Returns [`SelectionError::OutOfRange`] for the first index that is not
/// present in `snapshot`.
pub fn resolve(indices: &[usize], snapshot: &Snapshot) -> Result<Vec<String>, SelectionError> {
    let ordered: BTreeSet<usize> = indices.iter().copied().collect();
    ordered
        .into_iter()
        .map(|index| {
            snapshot
                .get(index)
                .map(|instance| instance.name.clone())
                .ok_or(SelectionError::OutOfRange {
                    index,
                    len: snapshot.len(),
                })
        })
        .collect()
}

/// Returns the module addresses whose every member is being destroyed.
#[must_use]
pub fn orphaned_groups(names: &[String], snapshot: &Snapshot) -> Vec<String> {
    let doomed: HashSet<&str> = names.iter().map(String::as_str).collect();
    snapshot
        .groups()
        .into_iter()
        .filter(|(_, members)| members.iter().all(|member| doomed.contains(member)))
        .map(|(group, _)| group.to_owned())
        .collect()
}

/// Everything a single destroy invocation removes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DestroySet {
    /// Names of the selected instances, in ascending index order.
    pub instances: Vec<String>,
    /// Modules that would be left empty by removing `instances`.
    pub orphaned_groups: Vec<String>,
    /// Terraform addresses to pass as `-target` arguments.
    pub targets: Vec<String>,
}

impl DestroySet {
    /// Expands `expression`, resolves it against `snapshot` and computes the
    /// orphaned-module closure.
    ///
    /// Instances inside an orphaned module are targeted through the module
    /// address alone.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError`] when the expression is malformed or refers
    /// to positions outside the snapshot.
    pub fn from_expression(expression: &str, snapshot: &Snapshot) -> Result<Self, SelectionError> {
        let indices = IndexExpression::parse(expression)?.indices_within(snapshot.len())?;
        let instances = resolve(&indices, snapshot)?;
        let orphaned = orphaned_groups(&instances, snapshot);

        let mut targets = orphaned.clone();
        targets.extend(
            instances
                .iter()
                .filter_map(|name| snapshot.find(name))
                .filter(|instance| !orphaned.contains(&instance.group))
                .map(|instance| instance.address.clone()),
        );

        Ok(Self {
            instances,
            orphaned_groups: orphaned,
            targets,
        })
    }
}
