#![cfg(unix)]

use super::support::CANNED_RECORD;
use super::support::fake_compiler;
use super::support::recording_compiler;
use super::support::write_source;
use optinfo_remarks::ALL_REMARKS;
use optinfo_remarks::AnalysisOutcome;
use optinfo_remarks::AnalysisSession;
use optinfo_remarks::CompileCommand;
use optinfo_remarks::CompileCommandResolver;
use optinfo_remarks::DATABASE_FILE_NAME;
use optinfo_remarks::NoticeLatch;
use optinfo_remarks::OneBasedLine;
use optinfo_remarks::RemarkKind;
use optinfo_remarks::RemarkProducer;
use optinfo_remarks::RemarksConfig;
use optinfo_remarks::Severity;
use optinfo_remarks::SourceRange;
use optinfo_remarks::analyze_range;
use optinfo_remarks::to_diagnostics;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn inlined_call_is_reported_for_its_line() {
    let temp = TempDir::new().expect("temp dir");
    let root = temp.path();
    let compiler = recording_compiler(root);
    let source = write_source(root);
    std::fs::write(
        root.join(DATABASE_FILE_NAME),
        json!([{
            "directory": root.to_string_lossy(),
            "file": "code.c",
            "arguments": [compiler.to_string_lossy(), "-O2", "-c", "code.c"],
        }])
        .to_string(),
    )
    .expect("write database");

    let config = RemarksConfig::load_from_workspace(root).expect("config");
    let notices = NoticeLatch::new();
    let command = CompileCommandResolver::new(&config, notices.clone())
        .resolve(&source, root)
        .found()
        .expect("compile command");
    let producer = RemarkProducer::new(&config, notices.clone());
    let session = AnalysisSession::new();

    let line_two = SourceRange::lines(OneBasedLine(2), OneBasedLine(2));
    let outcome = analyze_range(&session, &producer, &command, line_two, |line| {
        panic!("unexpected compiler error: {line}")
    })
    .await
    .expect("analysis");

    let grouped = match outcome {
        AnalysisOutcome::Remarks(grouped) => grouped,
        other => panic!("expected remarks, got {other:?}"),
    };
    assert_eq!(grouped.choices(), vec![ALL_REMARKS, "inline"]);
    let inline = grouped.select("inline");
    assert_eq!(inline.len(), 1);
    assert_eq!(inline[0].kind, RemarkKind::Passed);
    assert_eq!(inline[0].debug_location.line, OneBasedLine(2));

    let diagnostics = to_diagnostics(inline);
    assert_eq!(diagnostics[0].severity, Severity::Information);
    assert_eq!(diagnostics[0].message, "Passed: inline");

    // Second query is served from the session cache.
    let whole_file = SourceRange::lines(OneBasedLine(1), OneBasedLine(2));
    let cached = analyze_range(&session, &producer, &command, whole_file, |_| {})
        .await
        .expect("analysis");
    match cached {
        AnalysisOutcome::Remarks(grouped) => {
            assert_eq!(grouped.len(), 2);
            assert_eq!(grouped.choices(), vec![ALL_REMARKS, "inline", "prologepilog"]);
        }
        other => panic!("expected remarks, got {other:?}"),
    }
    assert!(notices.drain().is_empty());
}

#[tokio::test]
async fn timed_out_run_is_partial_and_never_cached() {
    let temp = TempDir::new().expect("temp dir");
    let root = temp.path();
    let record = root.join("record.yaml");
    std::fs::write(&record, CANNED_RECORD).expect("write record");
    let compiler = fake_compiler(
        root,
        "stalling-cc",
        &format!("cat '{}' > \"$out\"\nsleep 30", record.display()),
    );
    let source = write_source(root);
    let command = CompileCommand::new(root, &source, format!("{} -O2 -c code.c", compiler.display()));
    let config = RemarksConfig {
        timeout_secs: Some(1),
        ..RemarksConfig::default()
    };
    let producer = RemarkProducer::new(&config, NoticeLatch::new());
    let session = AnalysisSession::new();

    let mut errors = Vec::new();
    let line_two = SourceRange::lines(OneBasedLine(2), OneBasedLine(2));
    let first = analyze_range(&session, &producer, &command, line_two, |line| {
        errors.push(line.to_string())
    })
    .await
    .expect("analysis");
    match first {
        AnalysisOutcome::Partial { remarks, message } => {
            assert_eq!(remarks.select("inline").len(), 1);
            assert_eq!(message, "compiler did not finish within 1s");
        }
        other => panic!("expected partial remarks, got {other:?}"),
    }
    assert_eq!(errors, vec!["compiler did not finish within 1s".to_string()]);
    assert_eq!(session.cached(&command.file), None);

    // The next query compiles again and reports the failure again.
    let mut second_errors = Vec::new();
    let whole_file = SourceRange::lines(OneBasedLine(1), OneBasedLine(2));
    let second = analyze_range(&session, &producer, &command, whole_file, |line| {
        second_errors.push(line.to_string())
    })
    .await
    .expect("analysis");
    assert!(matches!(second, AnalysisOutcome::Partial { .. }));
    assert_eq!(second_errors.len(), 1);
    assert_eq!(session.running_file(), None);
}
