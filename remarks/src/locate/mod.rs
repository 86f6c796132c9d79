//! Function and loop discovery.
//!
//! Callers use anchors to decide where to offer "show remarks" actions; the
//! anchor's range is then handed to [`crate::query::query`]. Nothing in the
//! remark pipeline depends on a locator.

mod ast_tool;
mod heuristic;

pub use ast_tool::AstToolLocator;
pub use heuristic::RegexLocator;

use crate::config::LocatorKind;
use crate::config::RemarksConfig;
use crate::error::Result;
use crate::model::CompileCommand;
use crate::model::SourceRange;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    Function,
    Loop,
}

/// Extent of a function or loop, in compiler coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anchor {
    pub kind: AnchorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub range: SourceRange,
}

#[async_trait]
pub trait AnchorLocator: Send + Sync {
    /// Anchors in `file`, ordered by start position. `source` is the file's
    /// current text; implementations that read the file themselves may
    /// ignore it.
    async fn locate(&self, file: &Path, source: &str) -> Result<Vec<Anchor>>;
}

/// The locator selected by `config.locator`. The AST-backed locator reuses
/// the flags of `command` when one is known.
pub fn locator_for(
    config: &RemarksConfig,
    command: Option<&CompileCommand>,
) -> Box<dyn AnchorLocator> {
    match config.locator {
        LocatorKind::Regex => Box::new(RegexLocator::new()),
        LocatorKind::AstTool => Box::new(AstToolLocator::new(
            config.ast_tool.clone(),
            command.cloned(),
        )),
    }
}

pub(crate) fn sort_anchors(anchors: &mut [Anchor]) {
    anchors.sort_by_key(|anchor| (anchor.range.start, anchor.range.end));
}
