//! Range queries over a file's remarks.

use crate::model::Remark;
use crate::model::SourceRange;
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

/// Label of the bucket holding every remark in range.
pub const ALL_REMARKS: &str = "All remarks";
/// Only choice offered when nothing is in range.
pub const NO_REMARKS: &str = "No remarks found in range";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("range starts after it ends: {0}")]
    InvertedRange(SourceRange),
}

/// Remarks inside a range, grouped by pass in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupedRemarks {
    pub all: Vec<Remark>,
    pub by_pass: IndexMap<String, Vec<Remark>>,
}

impl GroupedRemarks {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Pick-list labels: the aggregate bucket first, then each pass.
    pub fn choices(&self) -> Vec<&str> {
        if self.is_empty() {
            return vec![NO_REMARKS];
        }
        std::iter::once(ALL_REMARKS)
            .chain(self.by_pass.keys().map(String::as_str))
            .collect()
    }

    /// Remarks behind a pick-list label. Unknown labels select nothing.
    pub fn select(&self, label: &str) -> &[Remark] {
        if label == ALL_REMARKS {
            return &self.all;
        }
        self.by_pass.get(label).map(Vec::as_slice).unwrap_or_default()
    }
}

pub fn query(remarks: &[Remark], range: SourceRange) -> Result<GroupedRemarks, QueryError> {
    if range.is_inverted() {
        return Err(QueryError::InvertedRange(range));
    }

    let mut grouped = GroupedRemarks::default();
    for remark in remarks
        .iter()
        .filter(|remark| range.contains(remark.debug_location.position()))
    {
        grouped
            .by_pass
            .entry(remark.pass.clone())
            .or_default()
            .push(remark.clone());
        grouped.all.push(remark.clone());
    }

    tracing::debug!(
        %range,
        matched = grouped.all.len(),
        passes = grouped.by_pass.len(),
        "range query"
    );
    Ok(grouped)
}
