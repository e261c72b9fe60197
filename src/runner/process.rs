//! Process runner implementation
//!
//! Executes analysis workers directly as child processes. Each worker gets its
//! own process group so a timeout or cancellation takes down anything it forked.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CommandSpec, RunError, RunLimits, RunOutcome, RunStatus, Runner};

/// Runner that spawns workers as local processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a program to completion with no stdin
    pub async fn execute(
        &self,
        cmd: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        debug!(
            "Running worker: {} with args: {:?}",
            cmd.program, cmd.args
        );

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &cmd.work_dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: cmd.program.clone(),
            source,
        })?;
        let mut group = ProcessGroupGuard::new(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("worker stderr was not captured"))?;

        let finished = tokio::select! {
            res = collect_output(&mut child, stdout, stderr) => Finish::Completed(res),
            _ = tokio::time::sleep(timeout) => Finish::Interrupted(RunStatus::TimedOut),
            _ = cancel.cancelled() => Finish::Interrupted(RunStatus::Cancelled),
        };

        match finished {
            Finish::Completed(res) => {
                let (stdout, stderr, exit) = res?;
                group.disarm();

                Ok(RunOutcome {
                    status: exit_to_status(exit),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
            Finish::Interrupted(status) => {
                warn!(
                    program = %cmd.program,
                    %status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Killing worker process group"
                );
                group.kill();
                // Reap the leader so it does not linger as a zombie
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap killed worker: {}", e);
                }

                Ok(RunOutcome {
                    status,
                    stdout: String::new(),
                    stderr: String::new(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        self.execute(cmd, limits.timeout, cancel).await
    }
}

enum Finish {
    Completed(io::Result<(Vec<u8>, Vec<u8>, ExitStatus)>),
    Interrupted(RunStatus),
}

/// Drain both pipes and wait for exit concurrently, so a chatty worker
/// never blocks on a full pipe.
async fn collect_output(
    child: &mut Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
) -> io::Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    tokio::try_join!(read_all(stdout), read_all(stderr), child.wait())
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn exit_to_status(exit: ExitStatus) -> RunStatus {
    match (exit.code(), exit.signal()) {
        (Some(code), _) => RunStatus::Exited(code),
        (None, Some(sig)) => RunStatus::Signaled(sig),
        (None, None) => RunStatus::Exited(-1),
    }
}

/// Kills the worker's process group on drop unless disarmed.
///
/// Covers the case where the request future is dropped mid-run (client
/// disconnect): `kill_on_drop` only reaches the leader, this reaches its children.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.map(|pid| Pid::from_raw(pid as i32)),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill worker process group {}: {}", pgid, e),
            }
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", script])
    }

    async fn run(script: &str, timeout: Duration) -> RunOutcome {
        ProcessRunner::new()
            .execute(&sh(script), timeout, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let outcome = run(r#"printf '{"ok": 1}'"#, Duration::from_secs(10)).await;
        assert_eq!(outcome.status, RunStatus::Exited(0));
        assert_eq!(outcome.stdout, r#"{"ok": 1}"#);
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr() {
        let outcome = run("echo progress; echo boom >&2; exit 3", Duration::from_secs(10)).await;
        assert_eq!(outcome.status, RunStatus::Exited(3));
        assert_eq!(outcome.stdout, "progress\n");
        assert_eq!(outcome.stderr, "boom\n");
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_stdin_is_closed() {
        // cat would hang forever if stdin were inherited or left open
        let outcome = run("cat", Duration::from_secs(10)).await;
        assert_eq!(outcome.status, RunStatus::Exited(0));
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams() {
        let outcome = run(
            "head -c 1000000 /dev/zero; head -c 700000 /dev/zero >&2",
            Duration::from_secs(30),
        )
        .await;
        assert_eq!(outcome.status, RunStatus::Exited(0));
        assert_eq!(outcome.stdout.len(), 1_000_000);
        assert_eq!(outcome.stderr.len(), 700_000);
    }

    #[tokio::test]
    async fn test_signal_death_is_reported() {
        let outcome = run("kill -9 $$", Duration::from_secs(10)).await;
        assert_eq!(outcome.status, RunStatus::Signaled(9));
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let start = Instant::now();
        let outcome = run("sleep 30", Duration::from_millis(200)).await;
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_covers_orphaned_children() {
        // The shell exits at once, but the backgrounded sleep keeps stdout open
        let start = Instant::now();
        let outcome = run("sleep 30 & exit 0", Duration::from_millis(300)).await;
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_worker() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = ProcessRunner::new()
            .execute(&sh("sleep 30"), Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = ProcessRunner::new()
            .execute(
                &CommandSpec::new("/nonexistent/worker-binary"),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }
}
