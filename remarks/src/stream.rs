//! Incremental filtering of the compiler's remark stream.
//!
//! The optimization record for a whole translation unit contains remarks for
//! every header it pulls in. Documents are grouped line by line and only the
//! ones whose `DebugLoc` names the file under analysis reach the decoder.

use crate::decode::DOCUMENT_END;
use crate::decode::decode;
use crate::model::Remark;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::path::PathBuf;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

const DEBUG_LOC_PREFIX: &str = "DebugLoc:";

static FILE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"File:\s*(?:'((?:[^']|'')*)'|"([^"]*)"|([^,}]+))"#)
        .unwrap_or_else(|err| panic!("invalid File: pattern: {err}"))
});

/// Pulls the `File:` value out of a top-level `DebugLoc:` line.
pub fn extract_file(line: &str) -> Option<String> {
    let caps = FILE_PATTERN.captures(line)?;
    let file = if let Some(quoted) = caps.get(1) {
        quoted.as_str().replace("''", "'")
    } else if let Some(quoted) = caps.get(2) {
        quoted.as_str().to_string()
    } else {
        caps.get(3)?.as_str().trim().to_string()
    };
    (!file.is_empty()).then_some(file)
}

/// Compilers report either the path as given on the command line or just a
/// file name, so both the full path and the base name are accepted.
pub fn is_same_file(reported: &str, relevant: &Path) -> bool {
    let reported = Path::new(reported);
    if reported == relevant {
        return true;
    }
    matches!(
        (reported.file_name(), relevant.file_name()),
        (Some(left), Some(right)) if left == right
    )
}

/// Line-at-a-time state machine over the remark stream.
#[derive(Debug)]
pub struct RemarkStreamFilter {
    relevant_file: PathBuf,
    current: Vec<String>,
    is_relevant: bool,
    missing_debug_location: bool,
    remarks: Vec<Remark>,
}

impl RemarkStreamFilter {
    pub fn new(relevant_file: impl Into<PathBuf>) -> Self {
        Self {
            relevant_file: relevant_file.into(),
            current: Vec::new(),
            is_relevant: true,
            missing_debug_location: true,
            remarks: Vec::new(),
        }
    }

    pub fn relevant_file(&self) -> &Path {
        &self.relevant_file
    }

    /// Feeds one line. Returns the remark completed by this line, if any; it
    /// is also kept for [`RemarkStreamFilter::finish`].
    pub fn push_line(&mut self, line: &str) -> Option<&Remark> {
        self.current.push(line.to_string());

        if line.starts_with(DEBUG_LOC_PREFIX) {
            self.missing_debug_location = false;
            match extract_file(line) {
                Some(file) => {
                    if !is_same_file(&file, &self.relevant_file) {
                        trace!(%file, "skipping remark for another file");
                        self.is_relevant = false;
                    }
                }
                None => {
                    warn!(line, "DebugLoc without a File entry");
                    self.is_relevant = false;
                }
            }
        }

        if line == DOCUMENT_END {
            let lines = std::mem::take(&mut self.current);
            let keep = self.is_relevant && !self.missing_debug_location;
            self.is_relevant = true;
            self.missing_debug_location = true;
            if keep {
                match decode(&lines) {
                    Some(remark) => {
                        self.remarks.push(remark);
                        return self.remarks.last();
                    }
                    None => debug!(lines = lines.len(), "dropping incomplete remark"),
                }
            }
        }
        None
    }

    /// Number of remarks collected so far.
    pub fn len(&self) -> usize {
        self.remarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remarks.is_empty()
    }

    /// Ends the stream. An unterminated trailing document is discarded.
    pub fn finish(self) -> Vec<Remark> {
        if !self.current.is_empty() {
            debug!(
                lines = self.current.len(),
                "discarding unterminated trailing document"
            );
        }
        self.remarks
    }
}

/// Result of draining a remark stream.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub remarks: Vec<Remark>,
    pub cancelled: bool,
}

/// Drains `reader` through a [`RemarkStreamFilter`]. Cancellation is observed
/// between lines and resolves immediately with what was collected.
pub async fn filter_stream<R>(
    reader: R,
    relevant_file: &Path,
    cancel: &CancellationToken,
) -> FilterOutcome
where
    R: AsyncBufRead + Unpin,
{
    let mut filter = RemarkStreamFilter::new(relevant_file);
    let mut lines = reader.lines();
    let mut cancelled = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    filter.push_line(&line);
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "remark stream read failed");
                    break;
                }
            },
        }
    }

    FilterOutcome {
        remarks: filter.finish(),
        cancelled,
    }
}
