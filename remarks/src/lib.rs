/*!
# Optimization remarks

Collects a C/C++ compiler's optimization remarks (the YAML records written by
`-fsave-optimization-record`) for one source file and answers range queries
over them.

## Pipeline

- **Resolve**: find the file's entry in `compile_commands.json`
- **Produce**: re-run that command with the record piped to stdout
- **Filter**: keep the YAML documents anchored in the file, decode them
- **Query**: group the remarks inside a source range by pass

## Example

```rust,no_run
use optinfo_remarks::{
    CompileCommandResolver, NoticeLatch, OneBasedLine, RemarksConfig, SourceRange,
    remarks_for_file, remarks_in_range,
};
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let root = Path::new("./my-project");
    let config = RemarksConfig::load_from_workspace(root)?;
    let resolver = CompileCommandResolver::new(&config, NoticeLatch::new());
    let Some(command) = resolver.resolve(&root.join("src/main.c"), root).found() else {
        return Ok(());
    };

    let outcome = remarks_for_file(&command, &config, &CancellationToken::new(), |line| {
        eprintln!("{line}");
    })
    .await;
    let grouped = remarks_in_range(
        outcome.remarks(),
        SourceRange::lines(OneBasedLine(10), OneBasedLine(20)),
    )?;
    for label in grouped.choices() {
        println!("{label}: {}", grouped.select(label).len());
    }
    Ok(())
}
```
*/

mod compile_db;
mod config;
mod decode;
mod diagnostic;
mod error;
mod locate;
mod model;
mod notice;
mod producer;
mod query;
mod session;
mod stream;

pub use compile_db::CLANGD_FILE_NAME;
pub use compile_db::CompilationDatabase;
pub use compile_db::CompileCommandResolver;
pub use compile_db::DATABASE_FILE_NAME;
pub use compile_db::Lookup;
pub use compile_db::NotFoundReason;
pub use config::CONFIG_FILE_NAME;
pub use config::LocatorKind;
pub use config::RemarksConfig;
pub use decode::decode;
pub use diagnostic::RemarkDiagnostic;
pub use diagnostic::Severity;
pub use diagnostic::to_diagnostics;
pub use error::RemarksError;
pub use error::Result;
pub use locate::Anchor;
pub use locate::AnchorKind;
pub use locate::AnchorLocator;
pub use locate::AstToolLocator;
pub use locate::RegexLocator;
pub use locate::locator_for;
pub use model::ArgValue;
pub use model::CompileCommand;
pub use model::DebugLocation;
pub use model::OneBasedLine;
pub use model::Remark;
pub use model::RemarkArg;
pub use model::RemarkKind;
pub use model::SourcePosition;
pub use model::SourceRange;
pub use model::ZeroBasedLine;
pub use notice::Notice;
pub use notice::NoticeKind;
pub use notice::NoticeLatch;
pub use producer::ProduceOutcome;
pub use producer::RemarkProducer;
pub use query::ALL_REMARKS;
pub use query::GroupedRemarks;
pub use query::NO_REMARKS;
pub use query::QueryError;
pub use query::query;
pub use session::AnalysisOutcome;
pub use session::AnalysisSession;
pub use session::Begin;
pub use session::SessionError;
pub use session::Ticket;
pub use session::analyze_range;
pub use stream::FilterOutcome;
pub use stream::RemarkStreamFilter;
pub use stream::filter_stream;

use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Runs `command` once and returns the remarks for `command.file`.
///
/// Uses a fresh notice latch; callers that want notices deduplicated across
/// calls should keep a [`RemarkProducer`] instead.
pub async fn remarks_for_file<F>(
    command: &CompileCommand,
    config: &RemarksConfig,
    cancel: &CancellationToken,
    on_error: F,
) -> ProduceOutcome
where
    F: FnMut(&str),
{
    RemarkProducer::new(config, NoticeLatch::new())
        .produce(command, cancel, on_error)
        .await
}

pub fn remarks_in_range(
    remarks: &[Remark],
    range: SourceRange,
) -> std::result::Result<GroupedRemarks, QueryError> {
    query(remarks, range)
}

pub fn is_supported_source(path: &Path, config: &RemarksConfig) -> bool {
    config.is_supported_source(path)
}
