//! Process-backed [`ToolRunner`] with enforced timeouts.
//!
//! On Unix each tool runs in its own process group so a timeout or
//! cancellation kills the tool together with every process it forked.

use super::{ToolError, ToolInvocation, ToolRunner};
use crate::stage::CancelFlag;
use std::{
    io::{self, BufRead, BufReader, Read},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Bytes of standard error kept for failure reports.
const STDERR_TAIL_BYTES: usize = 4096;
/// Longest uninterrupted wait before the cancel flag is checked again.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Runs tools as child processes.
///
/// Standard output is forwarded to the debug log line by line; standard
/// error is forwarded too and its tail is kept for error reports. When a
/// cancel flag is attached, a running tool is killed soon after the flag is
/// set.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner {
    cancel: Option<CancelFlag>,
}

impl ProcessRunner {
    /// A runner that only stops tools at their timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self { cancel: None }
    }

    /// Kill running tools once `cancel` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// How waiting for a tool ended.
#[derive(Debug)]
enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError> {
        info!("Running command: {}", invocation.command_line());
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(invocation.cwd.as_std_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate(&mut cmd);
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            tool: invocation.kind,
            program: invocation.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().map(|pipe| forward_lines(pipe, "stdout"));
        let stderr = child.stderr.take().map(capture_stderr);

        let waited = wait_for_exit(&mut child, invocation.timeout, self.cancel.as_ref());
        // A killed tool's orphans may still hold the pipes, so the reader
        // threads are only joined after a normal exit.
        match waited {
            Ok(Waited::Exited(status)) if status.success() => {
                join_forwarder(stdout);
                drop(stderr.map(join_capture));
                Ok(())
            }
            Ok(Waited::Exited(status)) => {
                join_forwarder(stdout);
                Err(ToolError::Exit {
                    tool: invocation.kind,
                    program: invocation.program.clone(),
                    status: status.code(),
                    stderr: stderr.map(join_capture).unwrap_or_default(),
                })
            }
            Ok(Waited::TimedOut) => Err(ToolError::Timeout {
                tool: invocation.kind,
                program: invocation.program.clone(),
                timeout: invocation.timeout,
            }),
            Ok(Waited::Cancelled) => Err(ToolError::Cancelled {
                tool: invocation.kind,
                program: invocation.program.clone(),
            }),
            Err(source) => Err(ToolError::Io {
                tool: invocation.kind,
                program: invocation.program.clone(),
                source,
            }),
        }
    }
}

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
const fn isolate(_cmd: &mut Command) {}

/// Wait for `child` until it exits, `timeout` elapses or `cancel` is set.
///
/// In the last two cases the tool and its descendants are killed and the
/// child is reaped before returning.
fn wait_for_exit(
    child: &mut Child,
    timeout: Duration,
    cancel: Option<&CancelFlag>,
) -> io::Result<Waited> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        let remaining =
            deadline.map_or(CANCEL_POLL, |at| at.saturating_duration_since(Instant::now()));
        if remaining.is_zero() {
            kill_tree(child)?;
            return Ok(Waited::TimedOut);
        }
        if let Some(status) = child.wait_timeout(remaining.min(CANCEL_POLL))? {
            return Ok(Waited::Exited(status));
        }
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            debug!(pid = child.id(), "killing tool after cancellation");
            kill_tree(child)?;
            return Ok(Waited::Cancelled);
        }
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    use rustix::{
        io::Errno,
        process::{Pid, Signal, kill_process_group},
    };
    if let Err(err) = kill_process_group(Pid::from_child(child), Signal::KILL)
        && err != Errno::SRCH
    {
        return Err(err.into());
    }
    reap(child);
    Ok(())
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    if let Err(err) = child.kill()
        && err.kind() != io::ErrorKind::InvalidInput
    {
        return Err(err);
    }
    reap(child);
    Ok(())
}

fn reap(child: &mut Child) {
    if let Err(err) = child.wait() {
        warn!("failed to reap killed tool: {err}");
    }
}

fn forward_lines<R: Read + Send + 'static>(pipe: R, stream: &'static str) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(pipe).lines().map_while(Result::ok) {
            debug!(target: "fabline::tool", stream, "{line}");
        }
    })
}

fn capture_stderr<R: Read + Send + 'static>(pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut tail = String::new();
        for line in BufReader::new(pipe).lines().map_while(Result::ok) {
            debug!(target: "fabline::tool", stream = "stderr", "{line}");
            tail.push_str(&line);
            tail.push('\n');
            if tail.len() > STDERR_TAIL_BYTES * 2 {
                tail = keep_tail(&tail);
            }
        }
        keep_tail(&tail)
    })
}

fn keep_tail(text: &str) -> String {
    let mut start = text.len().saturating_sub(STDERR_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text.get(start..).unwrap_or_default().to_owned()
}

fn join_forwarder(handle: Option<JoinHandle<()>>) {
    if let Some(thread) = handle
        && thread.join().is_err()
    {
        warn!("stdout forwarding thread panicked");
    }
}

fn join_capture(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_else(|_| {
        warn!("stderr capture thread panicked");
        String::new()
    })
}
