//! Timeout-bounded subprocess execution.
//!
//! Every external JVM tool (compiler, test runner, coverage report, mutation
//! engine) goes through [`run_with_timeout`]. A call never fails: spawn errors
//! and expired timeouts are reported in the returned [`CommandResult`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Where the child's stdout and stderr go.
#[derive(Debug, Clone)]
pub enum OutputMode {
    /// Collect both streams into [`CommandResult::output`].
    Capture,
    /// Redirect both streams into a file (truncated first).
    File(PathBuf),
    Discard,
}

/// How a subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited { code: Option<i32>, success: bool },
    TimedOut,
    SpawnFailed(String),
}

impl std::fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited {
                code: Some(code), ..
            } => write!(f, "exited with code {}", code),
            Self::Exited { code: None, .. } => write!(f, "terminated by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::SpawnFailed(e) => write!(f, "failed to spawn: {}", e),
        }
    }
}

/// Result of running an external command.
#[derive(Debug)]
pub struct CommandResult {
    pub outcome: ProcessOutcome,
    /// Combined stdout and stderr when captured, empty otherwise.
    pub output: String,
    /// How long the command took to run in milliseconds.
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ProcessOutcome::Exited { success: true, .. })
    }

    pub fn timed_out(&self) -> bool {
        self.outcome == ProcessOutcome::TimedOut
    }
}

/// Render a command line for logging.
pub fn describe(command: &Command) -> String {
    let std = command.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().into_owned()];
    parts.extend(std.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `command`, waiting at most `timeout`.
///
/// The child runs in its own process group. When the timeout expires the
/// whole group receives SIGTERM, then SIGKILL once `grace` has passed.
pub async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    grace: Duration,
    output: OutputMode,
) -> CommandResult {
    let start = Instant::now();
    tracing::debug!("Running: {}", describe(&command));

    command.stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    match &output {
        OutputMode::Capture => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        OutputMode::File(path) => match open_log(path) {
            Ok((stdout, stderr)) => {
                command.stdout(stdout).stderr(stderr);
            }
            Err(e) => {
                return CommandResult {
                    outcome: ProcessOutcome::SpawnFailed(format!(
                        "cannot open {}: {}",
                        path.display(),
                        e
                    )),
                    output: String::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        },
        OutputMode::Discard => {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            return CommandResult {
                outcome: ProcessOutcome::SpawnFailed(e.to_string()),
                output: String::new(),
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }
    };

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let outcome = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => ProcessOutcome::Exited {
            code: status.code(),
            success: status.success(),
        },
        Ok(Err(e)) => ProcessOutcome::SpawnFailed(format!("wait failed: {}", e)),
        Err(_) => {
            tracing::warn!(
                "Command timed out after {} seconds: {}",
                timeout.as_secs(),
                describe(&command)
            );
            terminate(&mut child, grace).await;
            ProcessOutcome::TimedOut
        }
    };

    let mut combined = collect(stdout, grace).await;
    combined.push_str(&collect(stderr, grace).await);

    CommandResult {
        outcome,
        output: combined,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn open_log(path: &Path) -> std::io::Result<(std::fs::File, std::fs::File)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let clone = file.try_clone()?;
    Ok((file, clone))
}

fn drain<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        // A read error just truncates the captured output
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>, grace: Duration) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    // Orphaned grandchildren may keep the pipe open; don't wait on them forever
    match tokio::time::timeout(grace.max(Duration::from_millis(100)), handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

/// SIGTERM the process group, wait `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            tracing::debug!("SIGTERM to process group {} failed: {}", pid, e);
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            tracing::debug!("SIGKILL to process group {} failed: {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::debug!("Failed to kill child process: {}", e);
    }
}
