//! Remark records and the source coordinates they are anchored to.
//!
//! The compiler reports one-based lines while editors address zero-based
//! lines. The two conventions are kept apart as [`OneBasedLine`] and
//! [`ZeroBasedLine`]; everything inside this crate speaks one-based lines and
//! converts only when handing data to an editor.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

/// Outcome category of a remark, taken from the YAML document tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemarkKind {
    Passed,
    Missed,
    Analysis,
}

impl RemarkKind {
    /// Parses the tag that follows `--- !`. Only the three known kinds are
    /// accepted; `Failure` and the `Analysis*` sub-tags are rejected.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Passed" => Some(Self::Passed),
            "Missed" => Some(Self::Missed),
            "Analysis" => Some(Self::Analysis),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Missed => "Missed",
            Self::Analysis => "Analysis",
        }
    }
}

impl fmt::Display for RemarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line number as the compiler reports it. `0` is a legal value and means
/// the compiler had no better line to offer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OneBasedLine(pub u32);

/// A line number in editor coordinates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ZeroBasedLine(pub u32);

impl OneBasedLine {
    /// Editor line for this compiler line. Line `0` clamps to the first line.
    pub fn to_zero_based(self) -> ZeroBasedLine {
        ZeroBasedLine(self.0.saturating_sub(1))
    }
}

impl ZeroBasedLine {
    pub fn to_one_based(self) -> OneBasedLine {
        OneBasedLine(self.0.saturating_add(1))
    }
}

impl fmt::Display for OneBasedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(file, line, column)` triple a remark is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugLocation {
    pub file: String,
    pub line: OneBasedLine,
    pub column: u32,
}

impl DebugLocation {
    pub fn position(&self) -> SourcePosition {
        SourcePosition {
            line: self.line,
            column: self.column,
        }
    }
}

impl fmt::Display for DebugLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Value of one `Args` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    String(String),
    Location(DebugLocation),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            Self::Location(_) => None,
        }
    }
}

/// One `(key, value)` pair from a remark's `Args` list. Keys repeat freely,
/// e.g. the caller and callee `DebugLoc` entries of an inlining remark.
///
/// The compiler may attach a definition site to a named argument
/// (`- Callee: foo` followed by `DebugLoc: {...}` in the same list item);
/// that site is kept in `location` so the item still yields one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemarkArg {
    pub key: String,
    pub value: ArgValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DebugLocation>,
}

impl RemarkArg {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: ArgValue::String(value.into()),
            location: None,
        }
    }

    pub fn location(key: impl Into<String>, location: DebugLocation) -> Self {
        Self {
            key: key.into(),
            value: ArgValue::Location(location),
            location: None,
        }
    }
}

/// One optimization event emitted by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remark {
    pub pass: String,
    pub kind: RemarkKind,
    pub name: String,
    pub function: String,
    pub debug_location: DebugLocation,
    pub args: Vec<RemarkArg>,
}

impl Remark {
    /// The human readable message assembled from the string arguments, the
    /// way the compiler prints it with `-Rpass`.
    pub fn message(&self) -> String {
        self.args
            .iter()
            .filter_map(|arg| arg.value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Position in compiler coordinates: one-based line, compiler column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: OneBasedLine,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line: OneBasedLine(line),
            column,
        }
    }
}

/// Closed range `[start, end]` in compiler coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceRange {
    pub fn new(start: SourcePosition, end: SourcePosition) -> Self {
        Self { start, end }
    }

    /// Every column of lines `start..=end`.
    pub fn lines(start: OneBasedLine, end: OneBasedLine) -> Self {
        Self {
            start: SourcePosition {
                line: start,
                column: 0,
            },
            end: SourcePosition {
                line: end,
                column: u32::MAX,
            },
        }
    }

    /// Converts an editor range (zero-based lines and columns) into compiler
    /// coordinates. A range starting at the first editor column also admits
    /// compiler column `0`, which the compiler uses for "no column".
    pub fn from_zero_based(
        start_line: ZeroBasedLine,
        start_column: u32,
        end_line: ZeroBasedLine,
        end_column: u32,
    ) -> Self {
        let start_column = match start_column {
            0 => 0,
            column => column.saturating_add(1),
        };
        Self {
            start: SourcePosition {
                line: start_line.to_one_based(),
                column: start_column,
            },
            end: SourcePosition {
                line: end_line.to_one_based(),
                column: end_column.saturating_add(1),
            },
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, position: SourcePosition) -> bool {
        self.start <= position && position <= self.end
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}]-[{},{}]",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

/// The compiler invocation that builds one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    /// Working directory the command must run in.
    pub directory: PathBuf,
    /// Absolute path of the translation unit.
    pub file: PathBuf,
    /// Full shell invocation, compiler binary included.
    pub command: String,
}

impl CompileCommand {
    pub fn new(
        directory: impl Into<PathBuf>,
        file: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            file: file.into(),
            command: command.into(),
        }
    }

    /// Splits the command with shell-word rules, falling back to plain
    /// whitespace splitting when the quoting is unbalanced.
    pub fn arguments(&self) -> Vec<String> {
        shlex::split(&self.command).unwrap_or_else(|| {
            self.command
                .split_whitespace()
                .map(ToString::to_string)
                .collect()
        })
    }

    /// The compiler executable, i.e. the first shell word.
    pub fn program(&self) -> Option<String> {
        self.arguments().into_iter().next()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file.file_name().and_then(|name| name.to_str())
    }

    pub fn is_for(&self, path: &Path) -> bool {
        self.file == path
    }
}
