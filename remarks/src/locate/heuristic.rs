use super::Anchor;
use super::AnchorKind;
use super::AnchorLocator;
use super::sort_anchors;
use crate::error::Result;
use crate::model::SourcePosition;
use crate::model::SourceRange;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static LOOP_PATTERN: Lazy<Regex> = Lazy::new(|| compile_regex(r"\b(?:for|while)\s*\(|\bdo\s*\{"));

static FUNCTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    compile_regex(r"(?m)^[ \t]*(?:[A-Za-z_][\w:<>,*&~ \t]*[\s*&])?([A-Za-z_~][\w:~]*)[ \t]*\(")
});

const NOT_FUNCTIONS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "catch", "do", "else", "case",
];

/// Qualifiers allowed between a parameter list and the function body.
const TRAILING_QUALIFIERS: &[&str] = &["const", "noexcept", "override", "final", "volatile"];

fn compile_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid locator pattern `{pattern}`: {err}"))
}

/// Regex and brace matching over the raw text. Comments and literals are
/// blanked first; everything else is best effort.
#[derive(Debug, Clone, Default)]
pub struct RegexLocator;

impl RegexLocator {
    pub fn new() -> Self {
        Self
    }

    pub fn locate_source(&self, source: &str) -> Vec<Anchor> {
        let code = mask_comments_and_literals(source);
        let lines = LineIndex::new(&code);
        let mut anchors = Vec::new();

        for found in LOOP_PATTERN.find_iter(&code) {
            let start = found.start();
            let end = if found.as_str().starts_with("do") {
                matching(code.as_bytes(), found.end() - 1, b'{', b'}')
            } else {
                let open = found.end() - 1;
                let Some(close) = matching(code.as_bytes(), open, b'(', b')') else {
                    continue;
                };
                match next_code_byte(code.as_bytes(), close + 1) {
                    // `} while (cond);` closes a `do` loop
                    Some((_, b';')) if code[..start].trim_end().ends_with('}') => continue,
                    Some((brace, b'{')) => matching(code.as_bytes(), brace, b'{', b'}'),
                    Some((body, _)) => code[body..].find(';').map(|semi| body + semi),
                    None => None,
                }
            };
            if let Some(end) = end {
                anchors.push(Anchor {
                    kind: AnchorKind::Loop,
                    name: None,
                    range: lines.range(start, end),
                });
            }
        }

        for caps in FUNCTION_PATTERN.captures_iter(&code) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if NOT_FUNCTIONS.contains(&name.as_str()) {
                continue;
            }
            let Some(close) = matching(code.as_bytes(), whole.end() - 1, b'(', b')') else {
                continue;
            };
            let Some(body) = body_start(&code, close + 1) else {
                continue;
            };
            let Some(end) = matching(code.as_bytes(), body, b'{', b'}') else {
                continue;
            };
            let start = whole.start() + (whole.as_str().len() - whole.as_str().trim_start().len());
            anchors.push(Anchor {
                kind: AnchorKind::Function,
                name: Some(name.as_str().to_string()),
                range: lines.range(start, end),
            });
        }

        sort_anchors(&mut anchors);
        anchors
    }
}

#[async_trait]
impl AnchorLocator for RegexLocator {
    async fn locate(&self, file: &Path, source: &str) -> Result<Vec<Anchor>> {
        let anchors = self.locate_source(source);
        tracing::debug!(file = %file.display(), anchors = anchors.len(), "located anchors");
        Ok(anchors)
    }
}

/// Offset of the `{` opening a function body that follows a parameter list
/// ending just before `from`.
fn body_start(code: &str, from: usize) -> Option<usize> {
    let mut rest = code[from..].trim_start();
    loop {
        if rest.starts_with('{') {
            return Some(code.len() - rest.len());
        }
        let qualifier = TRAILING_QUALIFIERS
            .iter()
            .find(|word| rest.starts_with(*word))?;
        rest = rest[qualifier.len()..].trim_start();
    }
}

fn next_code_byte(bytes: &[u8], from: usize) -> Option<(usize, u8)> {
    bytes
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, byte)| !byte.is_ascii_whitespace())
        .map(|(index, byte)| (index, *byte))
}

/// Index of the bracket closing the one at `open`.
fn matching(bytes: &[u8], open: usize, left: u8, right: u8) -> Option<usize> {
    if bytes.get(open) != Some(&left) {
        return None;
    }
    let mut depth = 0usize;
    for (index, byte) in bytes.iter().enumerate().skip(open) {
        if *byte == left {
            depth += 1;
        } else if *byte == right {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
        }
    }
    None
}

/// Replaces comments and string/char literals with spaces, keeping newlines
/// so byte offsets and line numbers are unchanged.
fn mask_comments_and_literals(source: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(u8),
    }

    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut state = State::Code;
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        let next = bytes.get(index + 1).copied();
        match state {
            State::Code => match (byte, next) {
                (b'/', Some(b'/')) => {
                    state = State::LineComment;
                    out[index] = b' ';
                    out[index + 1] = b' ';
                    index += 1;
                }
                (b'/', Some(b'*')) => {
                    state = State::BlockComment;
                    out[index] = b' ';
                    out[index + 1] = b' ';
                    index += 1;
                }
                (b'"' | b'\'', _) => state = State::Literal(byte),
                _ => {}
            },
            State::LineComment => {
                if byte == b'\n' {
                    state = State::Code;
                } else {
                    out[index] = b' ';
                }
            }
            State::BlockComment => {
                if byte == b'*' && next == Some(b'/') {
                    out[index] = b' ';
                    out[index + 1] = b' ';
                    index += 1;
                    state = State::Code;
                } else if byte != b'\n' {
                    out[index] = b' ';
                }
            }
            State::Literal(quote) => {
                if byte == b'\\' && next.is_some_and(|next| next != b'\n') {
                    out[index] = b' ';
                    out[index + 1] = b' ';
                    index += 1;
                } else if byte == quote || byte == b'\n' {
                    state = State::Code;
                } else {
                    out[index] = b' ';
                }
            }
        }
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        Self { starts }
    }

    fn position(&self, offset: usize) -> SourcePosition {
        let line = self.starts.partition_point(|start| *start <= offset);
        let line_start = self.starts[line.saturating_sub(1)];
        SourcePosition::new(
            u32::try_from(line).unwrap_or(u32::MAX),
            u32::try_from(offset - line_start + 1).unwrap_or(u32::MAX),
        )
    }

    fn range(&self, start: usize, end: usize) -> SourceRange {
        SourceRange::new(self.position(start), self.position(end))
    }
}
