//! Editor-facing diagnostics built from remarks.

use crate::model::Remark;
use crate::model::RemarkKind;
use crate::model::ZeroBasedLine;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

impl From<RemarkKind> for Severity {
    fn from(kind: RemarkKind) -> Self {
        match kind {
            RemarkKind::Passed => Self::Information,
            RemarkKind::Analysis => Self::Warning,
            RemarkKind::Missed => Self::Error,
        }
    }
}

/// A remark in editor coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemarkDiagnostic {
    pub line: ZeroBasedLine,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    pub detail: String,
    pub source: String,
}

impl RemarkDiagnostic {
    pub fn from_remark(remark: &Remark) -> Self {
        let location = &remark.debug_location;
        Self {
            line: location.line.to_zero_based(),
            column: location.column.saturating_sub(1),
            severity: remark.kind.into(),
            message: format!("{}: {}", remark.kind, remark.pass),
            detail: remark.message(),
            source: remark.name.clone(),
        }
    }
}

pub fn to_diagnostics(remarks: &[Remark]) -> Vec<RemarkDiagnostic> {
    remarks.iter().map(RemarkDiagnostic::from_remark).collect()
}
