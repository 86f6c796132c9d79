//! Once-per-kind warnings.
//!
//! Recoverable conditions (no compile database, a toolchain that cannot be
//! found, ...) are worth telling the user about once, not on every request.
//! A [`NoticeLatch`] remembers which kinds were already shown and which ones
//! the user dismissed for the rest of the session.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    MissingDatabase,
    MalformedDatabase,
    InvalidRecordFile,
    InvalidRecordDirectory,
    InvalidRecordInvocation,
    NoMatchingCommand,
    ToolchainMissing,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingDatabase => "missing-database",
            Self::MalformedDatabase => "malformed-database",
            Self::InvalidRecordFile => "invalid-record-file",
            Self::InvalidRecordDirectory => "invalid-record-directory",
            Self::InvalidRecordInvocation => "invalid-record-invocation",
            Self::NoMatchingCommand => "no-matching-command",
            Self::ToolchainMissing => "toolchain-missing",
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Default)]
struct LatchState {
    shown: HashSet<NoticeKind>,
    dismissed: HashSet<NoticeKind>,
    pending: Vec<Notice>,
}

/// Shared, cloneable latch. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct NoticeLatch {
    state: Arc<Mutex<LatchState>>,
}

impl NoticeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a notice. Returns `true` when it is the first of its kind and
    /// the kind has not been dismissed; only then is it logged and queued.
    pub fn raise(&self, kind: NoticeKind, message: impl Into<String>) -> bool {
        let message = message.into();
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.dismissed.contains(&kind) || !state.shown.insert(kind) {
            return false;
        }
        warn!(kind = %kind, "{message}");
        state.pending.push(Notice { kind, message });
        true
    }

    /// "Don't show again" for the rest of the session.
    pub fn dismiss(&self, kind: NoticeKind) {
        if let Ok(mut state) = self.state.lock() {
            state.dismissed.insert(kind);
            state.pending.retain(|notice| notice.kind != kind);
        }
    }

    /// Lets a kind be shown again, e.g. after the database was regenerated.
    pub fn reset(&self, kind: NoticeKind) {
        if let Ok(mut state) = self.state.lock() {
            state.shown.remove(&kind);
        }
    }

    pub fn is_dismissed(&self, kind: NoticeKind) -> bool {
        self.state
            .lock()
            .map(|state| state.dismissed.contains(&kind))
            .unwrap_or(false)
    }

    /// Notices raised since the last call, oldest first.
    pub fn drain(&self) -> Vec<Notice> {
        self.state
            .lock()
            .map(|mut state| std::mem::take(&mut state.pending))
            .unwrap_or_default()
    }
}
