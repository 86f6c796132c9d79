//! Re-running a compile command with optimization records enabled.
//!
//! The record is sent to standard output through a process substitution, so
//! the compiler never writes a file and remarks can be consumed while it is
//! still running.

use crate::config::RemarksConfig;
use crate::error::RemarksError;
use crate::error::Result;
use crate::model::CompileCommand;
use crate::model::Remark;
use crate::notice::NoticeKind;
use crate::notice::NoticeLatch;
use crate::stream::FilterOutcome;
use crate::stream::filter_stream;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// How a [`RemarkProducer::produce`] call ended. Every variant carries the
/// remarks collected up to that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceOutcome {
    Completed(Vec<Remark>),
    Cancelled(Vec<Remark>),
    Failed {
        message: String,
        partial: Vec<Remark>,
    },
}

impl ProduceOutcome {
    pub fn remarks(&self) -> &[Remark] {
        match self {
            Self::Completed(remarks) | Self::Cancelled(remarks) => remarks,
            Self::Failed { partial, .. } => partial,
        }
    }

    pub fn into_remarks(self) -> Vec<Remark> {
        match self {
            Self::Completed(remarks) | Self::Cancelled(remarks) => remarks,
            Self::Failed { partial, .. } => partial,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct RemarkProducer {
    shell: String,
    record_flags: Vec<String>,
    timeout: Option<Duration>,
    notices: NoticeLatch,
}

impl RemarkProducer {
    pub fn new(config: &RemarksConfig, notices: NoticeLatch) -> Self {
        Self {
            shell: config.shell.clone(),
            record_flags: config.record_flags.clone(),
            timeout: config.timeout(),
            notices,
        }
    }

    pub fn notices(&self) -> &NoticeLatch {
        &self.notices
    }

    /// The shell line that is run. Record flags are appended unquoted so the
    /// shell can expand the process substitution.
    pub fn invocation(&self, command: &CompileCommand) -> String {
        let mut line = command.command.trim_end().to_string();
        for flag in &self.record_flags {
            line.push(' ');
            line.push_str(flag);
        }
        line
    }

    /// Both the shell and the compiler must be resolvable before anything is
    /// spawned. A compiler given as a relative path is looked up from the
    /// command's directory.
    pub fn check_toolchain(&self, command: &CompileCommand) -> Result<()> {
        if which::which(&self.shell).is_err() {
            return Err(RemarksError::ToolchainMissing {
                program: self.shell.clone(),
            });
        }

        let program = command
            .program()
            .ok_or_else(|| RemarksError::EmptyCommand(command.file.clone()))?;
        let found = if program.contains('/') {
            command.directory.join(&program).is_file()
        } else {
            which::which(&program).is_ok()
        };
        if !found {
            return Err(RemarksError::ToolchainMissing { program });
        }
        Ok(())
    }

    /// Runs `command` and collects the remarks for `command.file`. Compiler
    /// diagnostics are passed to `on_error` line by line as they arrive.
    pub async fn produce<F>(
        &self,
        command: &CompileCommand,
        cancel: &CancellationToken,
        mut on_error: F,
    ) -> ProduceOutcome
    where
        F: FnMut(&str),
    {
        if let Err(err) = self.check_toolchain(command) {
            let message = err.to_string();
            if let RemarksError::ToolchainMissing { program } = &err {
                self.notices.raise(
                    NoticeKind::ToolchainMissing,
                    format!("`{program}` was not found; is the toolchain on PATH?"),
                );
            }
            on_error(&message);
            return ProduceOutcome::Failed {
                message,
                partial: Vec::new(),
            };
        }

        let invocation = self.invocation(command);
        info!(
            file = %command.file.display(),
            directory = %command.directory.display(),
            "collecting optimization remarks"
        );
        debug!(%invocation, "spawning compiler");

        let mut child = match self.spawn(&invocation, &command.directory) {
            Ok(child) => child,
            Err(err) => {
                let message = err.to_string();
                on_error(&message);
                return ProduceOutcome::Failed {
                    message,
                    partial: Vec::new(),
                };
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            kill_process_group(&mut child).await;
            let message = "compiler output pipes were not captured".to_string();
            on_error(&message);
            return ProduceOutcome::Failed {
                message,
                partial: Vec::new(),
            };
        };

        let stream_cancel = cancel.child_token();
        let collect = filter_stream(BufReader::new(stdout), &command.file, &stream_cancel);
        tokio::pin!(collect);
        let mut collected: Option<FilterOutcome> = None;
        let mut stderr = BufReader::new(stderr).lines();
        let mut stderr_open = true;
        let mut errors: Vec<String> = Vec::new();

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let interrupt = loop {
            if collected.is_some() && !stderr_open {
                break None;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(Interrupt::Cancelled),
                _ = &mut deadline => break Some(Interrupt::TimedOut),
                outcome = &mut collect, if collected.is_none() => collected = Some(outcome),
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        on_error(&line);
                        errors.push(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(err) => {
                        warn!(%err, "failed to read compiler stderr");
                        stderr_open = false;
                    }
                },
            }
        };

        let interrupt = match interrupt {
            Some(interrupt) => Some(interrupt),
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Some(Interrupt::Cancelled),
                    _ = &mut deadline => Some(Interrupt::TimedOut),
                    status = child.wait() => {
                        match status {
                            Ok(status) if !status.success() && errors.is_empty() => {
                                let message = format!("compiler exited with {status}");
                                on_error(&message);
                                errors.push(message);
                            }
                            Ok(_) => {}
                            Err(err) => {
                                let message = format!("failed to wait for compiler: {err}");
                                on_error(&message);
                                errors.push(message);
                            }
                        }
                        None
                    }
                }
            }
        };

        if interrupt.is_some() {
            kill_process_group(&mut child).await;
        }
        let remarks = match collected {
            Some(outcome) => outcome.remarks,
            None => {
                stream_cancel.cancel();
                collect.await.remarks
            }
        };

        match interrupt {
            Some(Interrupt::Cancelled) => {
                info!(collected = remarks.len(), "remark collection cancelled");
                ProduceOutcome::Cancelled(remarks)
            }
            Some(Interrupt::TimedOut) => {
                let message = format!(
                    "compiler did not finish within {}s",
                    timeout.map(|limit| limit.as_secs()).unwrap_or_default()
                );
                on_error(&message);
                ProduceOutcome::Failed {
                    message,
                    partial: remarks,
                }
            }
            None if errors.is_empty() => {
                info!(collected = remarks.len(), "remark collection finished");
                ProduceOutcome::Completed(remarks)
            }
            None => {
                warn!(
                    collected = remarks.len(),
                    errors = errors.len(),
                    "compiler reported errors"
                );
                ProduceOutcome::Failed {
                    message: errors.join("\n"),
                    partial: remarks,
                }
            }
        }
    }

    fn spawn(&self, invocation: &str, directory: &Path) -> Result<Child> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(invocation)
            .current_dir(directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
            .map_err(|err| RemarksError::spawn(self.shell.clone(), err))
    }
}

/// Kills the child's whole process group (the compiler and the `cat` behind
/// the process substitution) and reaps the child.
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: `pid` leads a process group created for this child.
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
    }
    if let Err(err) = child.start_kill() {
        debug!(%err, "child already exited");
    }
    if let Err(err) = child.wait().await {
        warn!(%err, "failed to reap compiler process");
    }
}
