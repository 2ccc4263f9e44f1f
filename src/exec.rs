//! Subprocess execution: captured (wait with deadline) or detached.
//!
//! Captured runs close stdin, drain stdout/stderr on reader threads so the
//! child never blocks on a full pipe, and poll for exit until the deadline.
//! The child leads its own process group; on timeout the whole group is
//! killed, and the deadline also bounds waiting for the pipes to close.
//! Detached runs ignore every stream, move the child into its own process
//! group, and hand back a [`LaunchAcknowledged`] without waiting.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything needed to start one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// `Some` sets the variable, `None` removes it from the inherited env.
    pub env: BTreeMap<String, Option<String>>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Self::default()
        }
    }

    /// Shell-quoted rendering for logs and result envelopes. Never executed.
    pub fn display(&self) -> String {
        shell_words::join(std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)))
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            match value {
                Some(v) => cmd.env(key, v),
                None => cmd.env_remove(key),
            };
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// How to run the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Wait for exit, buffering output. `None` waits forever.
    Captured { timeout: Option<Duration> },
    /// Launch and return immediately.
    Detached,
}

/// Outcome of a captured run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Absent when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub command_text: String,
}

impl ExecutionResult {
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Outcome of a detached launch. Carries no output and no exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAcknowledged {
    pub pid: u32,
    pub command_text: String,
}

/// Result of [`execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Completed(ExecutionResult),
    Launched(LaunchAcknowledged),
}

/// Run `spec` in `mode`.
///
/// # Errors
///
/// - [`BridgeError::Execution`] when the process cannot be spawned.
/// - [`BridgeError::Supervision`] when its exit status cannot be polled.
/// - [`BridgeError::TimedOut`] when a captured run, or a descendant still
///   holding its output pipes, outlives the deadline; the process group is
///   killed first.
///
/// A non-zero exit is **not** an error here; inspect
/// [`ExecutionResult::succeeded`].
pub fn execute(spec: &CommandSpec, mode: ExecMode) -> BridgeResult<Execution> {
    match mode {
        ExecMode::Captured { timeout } => run_captured(spec, timeout).map(Execution::Completed),
        ExecMode::Detached => launch_detached(spec).map(Execution::Launched),
    }
}

fn spawn_error(spec: &CommandSpec, source: std::io::Error) -> BridgeError {
    warn!(program = spec.program, error = %source, "failed to spawn");
    BridgeError::Execution {
        command: spec.program.clone(),
        source,
    }
}

fn timed_out(spec: &CommandSpec, limit: Duration) -> BridgeError {
    BridgeError::TimedOut {
        what: spec.program.clone(),
        after: limit,
    }
}

fn run_captured(spec: &CommandSpec, timeout: Option<Duration>) -> BridgeResult<ExecutionResult> {
    let command_text = spec.display();
    debug!(command = command_text, "spawning captured");

    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own group, so a timeout can take down everything it started.
        cmd.process_group(0);
    }
    let mut child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;

    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let start = Instant::now();
    let deadline = timeout.map(|limit| start + limit);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                warn!(command = command_text, error = %e, "lost track of running process");
                kill_tree(&mut child);
                return Err(BridgeError::Supervision {
                    command: spec.program.clone(),
                    source: e,
                });
            }
        }
        if let (Some(limit), Some(deadline)) = (timeout, deadline) {
            if Instant::now() >= deadline {
                warn!(command = command_text, secs = limit.as_secs(), "deadline exceeded, killing");
                kill_tree(&mut child);
                return Err(timed_out(spec, limit));
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    // Descendants that inherited the pipes keep them open past our child's
    // exit; the deadline still bounds how long we wait for EOF.
    let (Some(stdout), Some(stderr)) = (
        collect(stdout_reader, deadline),
        collect(stderr_reader, deadline),
    ) else {
        let limit = timeout.unwrap_or_default();
        warn!(command = command_text, secs = limit.as_secs(), "output still open at deadline, killing");
        kill_group(child.id());
        return Err(timed_out(spec, limit));
    };
    let exit_code = status.code();
    info!(command = spec.program, ?exit_code, "process exited");

    Ok(ExecutionResult {
        exit_code,
        stdout,
        stderr,
        command_text,
    })
}

fn launch_detached(spec: &CommandSpec) -> BridgeResult<LaunchAcknowledged> {
    let command_text = spec.display();
    debug!(command = command_text, "spawning detached");

    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so terminal signals aimed at us do not reach it.
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;
    let pid = child.id();
    info!(pid, command = spec.program, "launched in background");

    // Reap on exit so long-lived servers do not accumulate zombies.
    let program = spec.program.clone();
    let reaper = thread::Builder::new()
        .name(format!("reap-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => debug!(pid, program, code = ?status.code(), "background process exited"),
            Err(e) => warn!(pid, program, error = %e, "failed to reap background process"),
        });
    if let Err(e) = reaper {
        warn!(pid, error = %e, "could not start reaper thread");
    }

    Ok(LaunchAcknowledged { pid, command_text })
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<Receiver<Vec<u8>>> {
    stream.map(|mut s| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            // A read error just truncates what we report.
            let _ = s.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
        rx
    })
}

/// Output of one reader, or `None` if the stream is still open at `deadline`.
fn collect(reader: Option<Receiver<Vec<u8>>>, deadline: Option<Instant>) -> Option<String> {
    let Some(rx) = reader else {
        return Some(String::new());
    };
    let bytes = match deadline {
        Some(deadline) => match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => Vec::new(),
        },
        None => rx.recv().unwrap_or_default(),
    };
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Kill the child's whole process group, then reap the child.
fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(pgid, error = %e, "could not signal process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Last `max_chars` characters of `text`, prefixed with a marker when cut.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_owned();
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map_or(text.len(), |(i, _)| i);
    format!("[... {skip} chars truncated]\n{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", vec!["-c".to_owned(), script.to_owned()])
    }

    #[cfg(unix)]
    #[test]
    fn captured_exit_zero_succeeds() {
        let outcome = execute(&sh("echo hello; echo oops >&2"), ExecMode::Captured { timeout: None })
            .expect("run");
        let Execution::Completed(result) = outcome else {
            panic!("expected completed result");
        };
        assert!(result.succeeded());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
        assert!(result.command_text.starts_with("sh -c"));
    }

    #[cfg(unix)]
    #[test]
    fn captured_exit_seven_fails() {
        let outcome = execute(&sh("exit 7"), ExecMode::Captured { timeout: None }).expect("run");
        let Execution::Completed(result) = outcome else {
            panic!("expected completed result");
        };
        assert!(!result.succeeded());
        assert_eq!(result.exit_code, Some(7));
    }

    #[test]
    fn spawn_failure_is_execution_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-aider-mcp", Vec::new());
        let err = execute(&spec, ExecMode::Captured { timeout: None }).expect_err("should fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::Execution);

        let err = execute(&spec, ExecMode::Detached).expect_err("should fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::Execution);
    }

    #[cfg(unix)]
    #[test]
    fn hung_process_times_out() {
        let started = Instant::now();
        let err = execute(
            &sh("sleep 30"),
            ExecMode::Captured {
                timeout: Some(Duration::from_millis(200)),
            },
        )
        .expect_err("should time out");
        assert_eq!(err.kind(), crate::error::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn lingering_grandchild_cannot_outlive_the_deadline() {
        let started = Instant::now();
        let err = execute(
            &sh("sleep 6 & echo hi"),
            ExecMode::Captured {
                timeout: Some(Duration::from_secs(1)),
            },
        )
        .expect_err("grandchild holds stdout past the deadline");
        assert_eq!(err.kind(), crate::error::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn silent_grandchild_does_not_delay_the_result() {
        let started = Instant::now();
        let outcome = execute(
            &sh("sleep 6 >/dev/null 2>&1 & echo hi"),
            ExecMode::Captured {
                timeout: Some(Duration::from_secs(5)),
            },
        )
        .expect("run");
        let Execution::Completed(result) = outcome else {
            panic!("expected completed result");
        };
        assert_eq!(result.stdout.trim(), "hi");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn large_output_does_not_deadlock() {
        let outcome = execute(
            &sh("head -c 300000 /dev/zero | tr '\\0' 'x'"),
            ExecMode::Captured {
                timeout: Some(Duration::from_secs(20)),
            },
        )
        .expect("run");
        let Execution::Completed(result) = outcome else {
            panic!("expected completed result");
        };
        assert_eq!(result.stdout.len(), 300_000);
    }

    #[cfg(unix)]
    #[test]
    fn detached_returns_without_waiting() {
        let started = Instant::now();
        let outcome = execute(&sh("sleep 2"), ExecMode::Detached).expect("launch");
        let Execution::Launched(ack) = outcome else {
            panic!("expected launch acknowledgement");
        };
        assert!(ack.pid > 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn env_overrides_apply_and_removals_unset() {
        let mut spec = sh("printf '%s|%s' \"$AIDER_MCP_SET\" \"${AIDER_MCP_GONE-unset}\"");
        spec.env.insert("AIDER_MCP_SET".to_owned(), Some("yes".to_owned()));
        spec.env.insert("AIDER_MCP_GONE".to_owned(), None);
        let Execution::Completed(result) =
            execute(&spec, ExecMode::Captured { timeout: None }).expect("run")
        else {
            panic!("expected completed result");
        };
        assert_eq!(result.stdout, "yes|unset");
    }

    #[test]
    fn display_quotes_arguments() {
        let spec = CommandSpec::new("aider", vec!["--message".to_owned(), "fix it now".to_owned()]);
        assert_eq!(spec.display(), "aider --message 'fix it now'");
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("short", 10), "short");
        let t = tail("abcdefghij", 3);
        assert!(t.ends_with("\nhij"));
        assert!(t.contains("7 chars truncated"));
    }
}
