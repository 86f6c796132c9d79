//! One analysis at a time, plus the remarks of the last analyzed file.
//!
//! The session is owned by the caller. Each started analysis gets a
//! [`Ticket`]; only the holder of the current ticket may store results, so a
//! late finisher can never overwrite the cache of a newer run.

use crate::model::CompileCommand;
use crate::model::Remark;
use crate::model::SourceRange;
use crate::producer::ProduceOutcome;
use crate::producer::RemarkProducer;
use crate::query::GroupedRemarks;
use crate::query::QueryError;
use crate::query::query;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begin {
    /// Nothing was running; the caller now owns the session.
    Started(Ticket),
    /// The same file is already being analyzed. Its pending range was
    /// replaced and no second compiler is needed.
    RangeUpdated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("still collecting remarks for {}; cancel the running task first", .running.display())]
    Busy { running: PathBuf },

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug)]
struct InFlight {
    ticket: Ticket,
    file: PathBuf,
    range: SourceRange,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct CachedRemarks {
    file: PathBuf,
    remarks: Vec<Remark>,
}

#[derive(Debug, Default)]
struct SessionState {
    next_ticket: u64,
    in_flight: Option<InFlight>,
    cache: Option<CachedRemarks>,
}

#[derive(Debug, Default)]
pub struct AnalysisSession {
    state: Mutex<SessionState>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the session for `file`. Starting a different file than the one
    /// cached drops the cache.
    pub fn begin(&self, file: &Path, range: SourceRange) -> Result<Begin, SessionError> {
        let mut state = self.lock();
        if let Some(in_flight) = state.in_flight.as_mut() {
            if in_flight.file == file {
                debug!(%range, "updating pending range of running analysis");
                in_flight.range = range;
                return Ok(Begin::RangeUpdated);
            }
            return Err(SessionError::Busy {
                running: in_flight.file.clone(),
            });
        }

        if state
            .cache
            .as_ref()
            .is_some_and(|cache| cache.file != file)
        {
            state.cache = None;
        }

        state.next_ticket += 1;
        let ticket = Ticket(state.next_ticket);
        state.in_flight = Some(InFlight {
            ticket,
            file: file.to_path_buf(),
            range,
            cancel: CancellationToken::new(),
        });
        Ok(Begin::Started(ticket))
    }

    /// Token the running analysis should observe.
    pub fn cancel_token(&self, ticket: Ticket) -> Option<CancellationToken> {
        self.lock()
            .in_flight
            .as_ref()
            .filter(|in_flight| in_flight.ticket == ticket)
            .map(|in_flight| in_flight.cancel.clone())
    }

    pub fn running_file(&self) -> Option<PathBuf> {
        self.lock()
            .in_flight
            .as_ref()
            .map(|in_flight| in_flight.file.clone())
    }

    pub fn cached(&self, file: &Path) -> Option<Vec<Remark>> {
        self.lock()
            .cache
            .as_ref()
            .filter(|cache| cache.file == file)
            .map(|cache| cache.remarks.clone())
    }

    /// Stores `remarks` for the in-flight file. Returns `false`, storing
    /// nothing, when `ticket` is not the current one.
    pub fn complete(&self, ticket: Ticket, remarks: Vec<Remark>) -> bool {
        let mut state = self.lock();
        let Some(file) = state
            .in_flight
            .as_ref()
            .filter(|in_flight| in_flight.ticket == ticket)
            .map(|in_flight| in_flight.file.clone())
        else {
            return false;
        };
        state.cache = Some(CachedRemarks { file, remarks });
        true
    }

    /// Releases the session and returns the latest requested range.
    pub fn finish(&self, ticket: Ticket) -> Option<SourceRange> {
        let mut state = self.lock();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.ticket == ticket)
        {
            return state.in_flight.take().map(|in_flight| in_flight.range);
        }
        None
    }

    /// Trips the running analysis' cancellation token. Returns whether
    /// anything was running.
    pub fn cancel(&self) -> bool {
        match self.lock().in_flight.as_ref() {
            Some(in_flight) => {
                info!(file = %in_flight.file.display(), "cancelling remark collection");
                in_flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Saving the active file makes its remarks stale.
    pub fn invalidate_on_save(&self, saved: &Path, active: Option<&Path>) -> bool {
        if active != Some(saved) {
            return false;
        }
        let mut state = self.lock();
        if state.cache.as_ref().is_some_and(|cache| cache.file == saved) {
            debug!(file = %saved.display(), "dropping cached remarks");
            state.cache = None;
            return true;
        }
        false
    }
}

/// Releases the ticket if the analysis future is dropped half way.
struct FinishOnDrop<'a> {
    session: &'a AnalysisSession,
    ticket: Ticket,
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.session.finish(self.ticket);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Remarks(GroupedRemarks),
    /// Another request for the same file is running and will pick up the
    /// new range.
    RangeUpdated,
    Cancelled,
    /// The compiler failed after emitting some remarks. The grouping is
    /// incomplete and is not cached.
    Partial {
        remarks: GroupedRemarks,
        message: String,
    },
    Failed(String),
}

/// Remarks of `command.file` within `range`, from the cache or by running
/// the compiler. Only a completed run is cached.
pub async fn analyze_range<F>(
    session: &AnalysisSession,
    producer: &RemarkProducer,
    command: &CompileCommand,
    range: SourceRange,
    on_error: F,
) -> Result<AnalysisOutcome, SessionError>
where
    F: FnMut(&str),
{
    if range.is_inverted() {
        return Err(QueryError::InvertedRange(range).into());
    }

    if let Some(remarks) = session.cached(&command.file) {
        debug!(file = %command.file.display(), "answering from cache");
        return Ok(AnalysisOutcome::Remarks(query(&remarks, range)?));
    }

    let ticket = match session.begin(&command.file, range)? {
        Begin::Started(ticket) => ticket,
        Begin::RangeUpdated => return Ok(AnalysisOutcome::RangeUpdated),
    };
    let guard = FinishOnDrop { session, ticket };
    let cancel = session.cancel_token(ticket).unwrap_or_default();

    match producer.produce(command, &cancel, on_error).await {
        ProduceOutcome::Cancelled(_) => Ok(AnalysisOutcome::Cancelled),
        ProduceOutcome::Failed { message, partial } if partial.is_empty() => {
            Ok(AnalysisOutcome::Failed(message))
        }
        ProduceOutcome::Failed { message, partial } => {
            let range = session.finish(guard.ticket).unwrap_or(range);
            drop(guard);
            Ok(AnalysisOutcome::Partial {
                remarks: query(&partial, range)?,
                message,
            })
        }
        ProduceOutcome::Completed(remarks) => {
            session.complete(ticket, remarks.clone());
            let range = session.finish(guard.ticket).unwrap_or(range);
            drop(guard);
            Ok(AnalysisOutcome::Remarks(query(&remarks, range)?))
        }
    }
}
