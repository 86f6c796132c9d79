#![cfg(unix)]

use super::support::fake_compiler;
use super::support::recording_compiler;
use super::support::write_source;
use optinfo_remarks::CompileCommand;
use optinfo_remarks::NoticeLatch;
use optinfo_remarks::ProduceOutcome;
use optinfo_remarks::RemarkKind;
use optinfo_remarks::RemarkProducer;
use optinfo_remarks::RemarksConfig;
use pretty_assertions::assert_eq;
use std::time::Duration;
use std::time::Instant;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn producer(config: &RemarksConfig) -> RemarkProducer {
    RemarkProducer::new(config, NoticeLatch::new())
}

#[tokio::test]
async fn collects_only_remarks_for_the_compiled_file() {
    let temp = TempDir::new().expect("temp dir");
    let compiler = recording_compiler(temp.path());
    let source = write_source(temp.path());
    let command = CompileCommand::new(
        temp.path(),
        &source,
        format!("{} -O2 -c code.c", compiler.display()),
    );

    let mut errors = Vec::new();
    let outcome = producer(&RemarksConfig::default())
        .produce(&command, &CancellationToken::new(), |line| {
            errors.push(line.to_string())
        })
        .await;

    let remarks = match outcome {
        ProduceOutcome::Completed(remarks) => remarks,
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(errors.is_empty());
    let summary: Vec<(RemarkKind, &str, u32)> = remarks
        .iter()
        .map(|r| (r.kind, r.pass.as_str(), r.debug_location.line.0))
        .collect();
    assert_eq!(
        summary,
        vec![
            (RemarkKind::Passed, "inline", 2),
            (RemarkKind::Analysis, "prologepilog", 1),
        ]
    );
    assert_eq!(remarks[0].message(), "add inlined into twice");
}

#[tokio::test]
async fn stderr_fails_the_run_but_keeps_partial_remarks() {
    let temp = TempDir::new().expect("temp dir");
    let record = temp.path().join("record.yaml");
    std::fs::write(&record, super::support::CANNED_RECORD).expect("write record");
    let compiler = fake_compiler(
        temp.path(),
        "noisy-cc",
        &format!(
            "cat '{}' > \"$out\"\necho 'code.c:9:1: error: expected ;' >&2\nexit 1",
            record.display()
        ),
    );
    let source = write_source(temp.path());
    let command = CompileCommand::new(temp.path(), &source, format!("{} -c code.c", compiler.display()));

    let mut errors = Vec::new();
    let outcome = producer(&RemarksConfig::default())
        .produce(&command, &CancellationToken::new(), |line| {
            errors.push(line.to_string())
        })
        .await;

    assert_eq!(errors, vec!["code.c:9:1: error: expected ;".to_string()]);
    match outcome {
        ProduceOutcome::Failed { message, partial } => {
            assert!(message.contains("expected ;"));
            assert_eq!(partial.len(), 2);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_non_zero_exit_is_a_failure() {
    let temp = TempDir::new().expect("temp dir");
    let compiler = fake_compiler(temp.path(), "quiet-cc", "exit 3");
    let source = write_source(temp.path());
    let command = CompileCommand::new(temp.path(), &source, compiler.display().to_string());

    let mut errors = Vec::new();
    let outcome = producer(&RemarksConfig::default())
        .produce(&command, &CancellationToken::new(), |line| {
            errors.push(line.to_string())
        })
        .await;

    match outcome {
        ProduceOutcome::Failed { message, partial } => {
            assert!(message.contains("exit"), "unexpected message: {message}");
            assert!(partial.is_empty());
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn relative_compiler_is_found_from_the_command_directory() {
    let temp = TempDir::new().expect("temp dir");
    recording_compiler(temp.path());
    let source = write_source(temp.path());
    let command = CompileCommand::new(temp.path(), &source, "./fake-cc -c code.c");

    let outcome = producer(&RemarksConfig::default())
        .produce(&command, &CancellationToken::new(), |_| {})
        .await;
    assert_eq!(outcome.remarks().len(), 2);
    assert!(!outcome.is_failed());
}

#[tokio::test]
async fn cancellation_stops_a_hanging_compiler() {
    let temp = TempDir::new().expect("temp dir");
    let compiler = fake_compiler(temp.path(), "slow-cc", "sleep 30");
    let source = write_source(temp.path());
    let command = CompileCommand::new(temp.path(), &source, compiler.display().to_string());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = producer(&RemarksConfig::default())
        .produce(&command, &cancel, |_| {})
        .await;
    assert!(matches!(outcome, ProduceOutcome::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn timeout_kills_the_compiler() {
    let temp = TempDir::new().expect("temp dir");
    let compiler = fake_compiler(temp.path(), "stuck-cc", "sleep 30");
    let source = write_source(temp.path());
    let command = CompileCommand::new(temp.path(), &source, compiler.display().to_string());
    let config = RemarksConfig {
        timeout_secs: Some(1),
        ..RemarksConfig::default()
    };

    let started = Instant::now();
    let outcome = producer(&config)
        .produce(&command, &CancellationToken::new(), |_| {})
        .await;
    match outcome {
        ProduceOutcome::Failed { message, .. } => assert!(message.contains("did not finish")),
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Waits until `pid` has exited, accepting a zombie that nobody reaped yet.
#[cfg(target_os = "linux")]
async fn wait_for_exit(pid: &str) -> bool {
    for _ in 0..50 {
        match std::fs::read_to_string(format!("/proc/{pid}/status")) {
            Err(_) => return true,
            Ok(status) if status.lines().any(|line| line.starts_with("State:\tZ")) => {
                return true;
            }
            Ok(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    false
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn cancellation_kills_background_children() {
    let temp = TempDir::new().expect("temp dir");
    let pid_file = temp.path().join("child.pid");
    let compiler = fake_compiler(
        temp.path(),
        "forking-cc",
        &format!("sleep 30 &\necho $! > '{}'\nwait", pid_file.display()),
    );
    let source = write_source(temp.path());
    let command = CompileCommand::new(temp.path(), &source, compiler.display().to_string());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watched = pid_file.clone();
    tokio::spawn(async move {
        while !std::fs::read_to_string(&watched).is_ok_and(|pid| pid.ends_with('\n')) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        trigger.cancel();
    });

    let outcome = producer(&RemarksConfig::default())
        .produce(&command, &cancel, |_| {})
        .await;
    assert!(matches!(outcome, ProduceOutcome::Cancelled(_)));

    let pid = std::fs::read_to_string(&pid_file).expect("child pid");
    let pid = pid.trim();
    assert!(!pid.is_empty());
    assert!(wait_for_exit(pid).await, "background child {pid} survived");
}
