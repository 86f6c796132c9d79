use super::Anchor;
use super::AnchorKind;
use super::AnchorLocator;
use super::sort_anchors;
use crate::error::RemarksError;
use crate::error::Result;
use crate::model::CompileCommand;
use crate::model::SourcePosition;
use crate::model::SourceRange;
use crate::stream::is_same_file;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const AST_DUMP_FLAGS: &[&str] = &["-fsyntax-only", "-Xclang", "-ast-dump=json"];

const FUNCTION_KINDS: &[&str] = &[
    "FunctionDecl",
    "CXXMethodDecl",
    "CXXConstructorDecl",
    "CXXDestructorDecl",
    "CXXConversionDecl",
    "LambdaExpr",
];

const LOOP_KINDS: &[&str] = &["ForStmt", "WhileStmt", "DoStmt", "CXXForRangeStmt"];

/// Function definitions and loops from the compiler's JSON AST dump.
/// The file is read from disk, so unsaved edits are not seen.
#[derive(Debug, Clone)]
pub struct AstToolLocator {
    tool: String,
    command: Option<CompileCommand>,
}

impl AstToolLocator {
    pub fn new(tool: impl Into<String>, command: Option<CompileCommand>) -> Self {
        Self {
            tool: tool.into(),
            command,
        }
    }

    /// Arguments after the tool name: the dump flags, the compile command's
    /// own flags without its output options, then the file.
    pub fn arguments(&self, file: &Path) -> Vec<String> {
        let mut args: Vec<String> = AST_DUMP_FLAGS.iter().map(ToString::to_string).collect();
        if let Some(command) = &self.command {
            let words = command.arguments();
            let mut words = words.into_iter().skip(1);
            while let Some(word) = words.next() {
                match word.as_str() {
                    "-c" => {}
                    "-o" => {
                        words.next();
                    }
                    _ if word.starts_with("-o")
                        || word.starts_with("-fsave-optimization-record")
                        || word.starts_with("-foptimization-record-file") => {}
                    _ if is_same_file(&word, &command.file) || Path::new(&word) == file => {}
                    _ => args.push(word),
                }
            }
        }
        args.push(file.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl AnchorLocator for AstToolLocator {
    async fn locate(&self, file: &Path, _source: &str) -> Result<Vec<Anchor>> {
        if which::which(&self.tool).is_err() {
            return Err(RemarksError::ToolchainMissing {
                program: self.tool.clone(),
            });
        }

        let args = self.arguments(file);
        debug!(tool = %self.tool, ?args, "dumping AST");
        let mut cmd = Command::new(&self.tool);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(command) = &self.command {
            cmd.current_dir(&command.directory);
        }
        let output = cmd
            .output()
            .await
            .map_err(|err| RemarksError::spawn(self.tool.clone(), err))?;

        if output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RemarksError::AstTool(if stderr.is_empty() {
                format!("{} exited with {}", self.tool, output.status)
            } else {
                stderr
            }));
        }

        let root: Value = serde_json::from_slice(&output.stdout)?;
        Ok(anchors_from_ast(&root, file))
    }
}

/// Walks a `-ast-dump=json` tree. Locations are delta-encoded: `file` and
/// `line` appear only when they change, so every location is read in dump
/// order even for nodes that are not kept.
pub fn anchors_from_ast(root: &Value, file: &Path) -> Vec<Anchor> {
    let mut walker = AstWalker {
        cursor: LocCursor::default(),
        file,
        anchors: Vec::new(),
    };
    walker.visit(root);
    let mut anchors = walker.anchors;
    sort_anchors(&mut anchors);
    anchors
}

#[derive(Debug, Default)]
struct LocCursor {
    file: Option<String>,
    line: u32,
}

#[derive(Debug)]
struct Point {
    file: String,
    position: SourcePosition,
}

impl LocCursor {
    fn read(&mut self, loc: &Value) -> Option<Point> {
        if let Some(spelling) = loc.get("spellingLoc") {
            self.read(spelling);
        }
        if let Some(expansion) = loc.get("expansionLoc") {
            return self.read(expansion);
        }

        if let Some(file) = loc.get("file").and_then(Value::as_str) {
            self.file = Some(file.to_string());
        }
        if let Some(line) = loc
            .get("line")
            .and_then(Value::as_u64)
            .and_then(|line| u32::try_from(line).ok())
        {
            self.line = line;
        }
        let column = loc
            .get("col")
            .and_then(Value::as_u64)
            .and_then(|col| u32::try_from(col).ok())?;
        Some(Point {
            file: self.file.clone()?,
            position: SourcePosition::new(self.line, column),
        })
    }
}

struct AstWalker<'a> {
    cursor: LocCursor,
    file: &'a Path,
    anchors: Vec<Anchor>,
}

impl AstWalker<'_> {
    fn visit(&mut self, node: &Value) {
        if let Some(loc) = node.get("loc") {
            self.cursor.read(loc);
        }
        let range = node.get("range");
        let begin = range
            .and_then(|range| range.get("begin"))
            .and_then(|loc| self.cursor.read(loc));
        let end = range
            .and_then(|range| range.get("end"))
            .and_then(|loc| self.cursor.read(loc));

        if let (Some(kind), Some(begin), Some(end)) = (classify(node), begin, end)
            && is_same_file(&begin.file, self.file)
            && is_same_file(&end.file, self.file)
        {
            self.anchors.push(Anchor {
                kind,
                name: node
                    .get("name")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                range: SourceRange::new(begin.position, end.position),
            });
        }

        if let Some(inner) = node.get("inner").and_then(Value::as_array) {
            for child in inner {
                self.visit(child);
            }
        }
    }
}

fn classify(node: &Value) -> Option<AnchorKind> {
    let kind = node.get("kind").and_then(Value::as_str)?;
    if node.get("isImplicit").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    if LOOP_KINDS.contains(&kind) {
        return Some(AnchorKind::Loop);
    }
    // Templates are containers; the `FunctionDecl` inside carries the body.
    if FUNCTION_KINDS.contains(&kind) && has_body(node) {
        return Some(AnchorKind::Function);
    }
    None
}

fn has_body(node: &Value) -> bool {
    node.get("inner")
        .and_then(Value::as_array)
        .is_some_and(|inner| {
            inner.iter().any(|child| {
                matches!(
                    child.get("kind").and_then(Value::as_str),
                    Some("CompoundStmt" | "CXXTryStmt")
                )
            })
        })
}
