//! Subprocess execution with a whole-process-group safety contract.
//!
//! Every command run on behalf of an agent goes through [`run_command`],
//! which guarantees:
//!
//! - The child gets a sanitized environment (see
//!   [`env::safe_env`](super::env::safe_env)), never the parent's.
//! - The child is spawned as the leader of a fresh process group, so a
//!   timeout or cancellation kills the whole tree, including backgrounded
//!   descendants, not just the immediate child.
//! - stdout and stderr are captured separately with a per-stream size cap.
//! - The child is always reaped; no zombie survives the call.
//!
//! Two spawn modes share this contract. Argv mode tokenizes the command
//! with POSIX shell rules (no expansion, no globbing) and executes the
//! program directly, so shell operators do not work. Shell mode hands the
//! string to `sh -c` and is only exposed through the alarmingly named
//! `shell_UNSAFE` skill.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use super::env::safe_env;

/// Default timeout when the caller does not pass one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Hard ceiling on the caller-supplied timeout.
pub const MAX_TIMEOUT_SECS: u64 = 300;
/// Per-stream capture cap (1 MiB); beyond it the output is truncated.
const MAX_STREAM_BYTES: usize = 1024 * 1024;
/// Grace period between SIGTERM and SIGKILL on the process group.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// How the command string becomes a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Tokenize with POSIX shell rules and exec directly. Pipes,
    /// redirection, chaining, substitution and globbing do NOT work.
    Argv,
    /// Hand the string to `sh -c`. Full shell semantics, full risk.
    Shell,
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Render stdout and stderr into the single text block skills hand to
    /// the model: stdout first, stderr after a delimiter, exit code noted
    /// when non-zero.
    pub fn render(&self) -> String {
        let mut text = String::new();
        if !self.stdout.is_empty() {
            text.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("--- stderr ---\n");
            text.push_str(&self.stderr);
        }
        if self.exit_code != 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("(exit code {})", self.exit_code));
        }
        if text.is_empty() {
            text.push_str("(no output)");
        }
        text
    }
}

/// Failure modes of [`run_command`].
#[derive(Debug)]
pub enum ExecError {
    /// The command string failed POSIX tokenization (argv mode only).
    BadSyntax(String),
    /// Nothing left after tokenization.
    EmptyCommand,
    /// The process group was killed after exceeding the timeout.
    Timeout(u64),
    /// The turn was cancelled while the command ran; the group was killed.
    Cancelled,
    /// Spawning or reading the child failed.
    Io(std::io::Error),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::BadSyntax(msg) => write!(f, "Invalid command syntax: {}", msg),
            ExecError::EmptyCommand => write!(f, "Empty command after parsing"),
            ExecError::Timeout(secs) => write!(f, "Command timed out after {}s", secs),
            ExecError::Cancelled => write!(f, "Command cancelled"),
            ExecError::Io(e) => write!(f, "Command failed to start: {}", e),
        }
    }
}

impl std::error::Error for ExecError {}

/// Read a stream to EOF, keeping at most `max_bytes` and marking truncation.
async fn read_capped<R: AsyncReadExt + Unpin>(mut reader: R, max_bytes: usize) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 8192];
    let mut total = 0usize;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if buf.len() < max_bytes {
                    let take = n.min(max_bytes - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
            }
            Err(_) => break,
        }
    }
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if total > max_bytes {
        text.push_str(&format!("\n[output truncated, {} bytes total]", total));
    }
    text
}

/// Signal a child's process group: SIGTERM, a short grace, then SIGKILL.
///
/// The child was spawned as a group leader, so its pid doubles as the pgid
/// and every descendant (including backgrounded ones) is covered. The
/// direct child itself is additionally killed and reaped through
/// `kill_on_drop` when its future is dropped.
async fn kill_process_group(pgid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        let pgid = Pid::from_raw(pgid);
        if killpg(pgid, Signal::SIGTERM).is_err() {
            warn!("process group {} already gone before SIGTERM", pgid);
            return;
        }
        tokio::time::sleep(KILL_GRACE).await;
        let _ = killpg(pgid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Execute a command with the sanitized-environment, group-kill contract.
///
/// `cancel`, when supplied, aborts the command the same way a timeout does:
/// the whole process group is signalled, briefly given a chance to exit,
/// force-killed, and reaped.
pub async fn run_command(
    mode: SpawnMode,
    command: &str,
    cwd: Option<&Path>,
    timeout_secs: u64,
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput, ExecError> {
    let timeout_secs = timeout_secs.clamp(1, MAX_TIMEOUT_SECS);

    let mut cmd = match mode {
        SpawnMode::Argv => {
            let args = shell_words::split(command)
                .map_err(|e| ExecError::BadSyntax(e.to_string()))?;
            let (program, rest) = args.split_first().ok_or(ExecError::EmptyCommand)?;
            let mut cmd = Command::new(program);
            cmd.args(rest);
            cmd
        }
        SpawnMode::Shell => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    };

    let cwd_owned: Option<PathBuf> = cwd.map(Path::to_path_buf);
    cmd.env_clear()
        .envs(safe_env(cwd_owned.as_deref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cwd_owned {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        // New process group so timeout/cancel can kill the whole tree.
        cmd.process_group(0);
    }

    debug!("spawning {:?}-mode command: {}", mode, command);
    let mut child: Child = cmd.spawn().map_err(ExecError::Io)?;
    let stdout_pipe = child.stdout.take().expect("stdout was piped");
    let stderr_pipe = child.stderr.take().expect("stderr was piped");
    let pgid: Option<i32> = child.id().map(|pid| pid as i32);

    // Owns the child; dropping this future (timeout or cancel) triggers
    // kill_on_drop for the direct child while we signal the group by pgid.
    let collect = async move {
        // Read both streams concurrently to avoid pipe-buffer deadlocks.
        let (stdout, stderr) = tokio::join!(
            read_capped(stdout_pipe, MAX_STREAM_BYTES),
            read_capped(stderr_pipe, MAX_STREAM_BYTES),
        );
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            // Never resolves; timeout is the only limit.
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = timeout(Duration::from_secs(timeout_secs), collect) => match result {
            Ok((stdout, stderr, status)) => {
                let status = status.map_err(ExecError::Io)?;
                Ok(CommandOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Err(_) => {
                kill_process_group(pgid).await;
                Err(ExecError::Timeout(timeout_secs))
            }
        },
        _ = cancelled => {
            kill_process_group(pgid).await;
            Err(ExecError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_argv_mode_runs_simple_command() {
        let out = run_command(SpawnMode::Argv, "echo hello", None, 10, None)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_argv_mode_does_not_interpret_shell_operators() {
        // The pipe is passed through as a literal argument, not a pipeline.
        let out = run_command(SpawnMode::Argv, "echo a | tr a b", None, 10, None)
            .await
            .unwrap();
        assert!(out.stdout.contains('|'));
    }

    #[tokio::test]
    async fn test_shell_mode_interprets_operators() {
        let out = run_command(SpawnMode::Shell, "echo a | tr a b", None, 10, None)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "b");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_raised() {
        let out = run_command(SpawnMode::Shell, "exit 3", None, 10, None)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.render().contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_timeout_message_names_seconds() {
        let err = run_command(SpawnMode::Shell, "sleep 30", None, 1, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_cancel_kills_command() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let err = run_command(SpawnMode::Shell, "sleep 30", None, 60, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn test_bad_syntax_reported() {
        let err = run_command(SpawnMode::Argv, "echo 'unterminated", None, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::BadSyntax(_)));
    }

    #[test]
    fn test_render_separates_streams() {
        let out = CommandOutput {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            exit_code: 0,
        };
        let text = out.render();
        let stdout_at = text.find("out").unwrap();
        let stderr_at = text.find("--- stderr ---").unwrap();
        assert!(stdout_at < stderr_at);
    }
}
