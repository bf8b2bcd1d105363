//! Process runner implementation
//!
//! Spawns the solution in its own process group, feeds its stdin, and waits
//! for it under a wall-clock deadline while a `ResourceMonitor` watches it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::monitor::{kill_process_group, ResourceMonitor, DEFAULT_POLL_INTERVAL};
use super::{CommandSpec, RawResult, RunLimits, RunOutcome, Runner};
use crate::domain::verdict::resolve_return_code;

/// How long to keep draining pipes after a timeout kill
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Stdout reported in place of real output when the deadline expires
pub const TIMEOUT_STDOUT: &str = "TL";

/// Runner that executes the solution directly, supervised by a resource monitor
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
}

impl ProcessRunner {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Run the solution once and collect its output, exit status and peaks
    pub async fn execute(
        &self,
        cmd: &CommandSpec,
        input_lines: &[String],
        limits: &RunLimits,
    ) -> Result<RunOutcome> {
        debug!("Running solution: {:?} with limits {:?}", cmd.to_vec(), limits);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn solution: {:?}", cmd.to_vec()))?;
        let pid = child
            .id()
            .context("Solution process has no pid right after spawn")?;

        let monitor = ResourceMonitor::new(pid, limits.ram_limit_bytes, limits.cpu_limit_secs)
            .with_poll_interval(self.poll_interval);
        let monitor_handle = tokio::task::spawn_blocking(move || monitor.run());

        let input = input_lines.join("\n").into_bytes();
        let stdin = child.stdin.take();
        let stdin_task = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(&input).await {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        warn!("Failed to write solution stdin: {}", e);
                    }
                }
            }
        });

        let mut output_task = tokio::spawn(collect_output(child.stdout.take(), child.stderr.take()));

        let finished = timeout(limits.wall_limit(), async {
            let status = child.wait().await?;
            let output = (&mut output_task).await??;
            Ok::<_, anyhow::Error>((status, output))
        })
        .await;

        let (status, (stdout, stderr), timed_out) = match finished {
            Ok(result) => {
                let (status, output) = result.context("Failed to wait for solution")?;
                (status, output, false)
            }
            Err(_) => {
                warn!(
                    "Solution exceeded wall time limit of {}s, killing process group {}",
                    limits.wall_limit_secs, pid
                );
                kill_process_group(pid);
                let status = child
                    .wait()
                    .await
                    .context("Failed to wait for killed solution")?;
                drain_output(&mut output_task, pid).await;
                let stdout = TIMEOUT_STDOUT.as_bytes().to_vec();
                let stderr = format!("Timeout ({}s)", limits.wall_limit_secs).into_bytes();
                (status, (stdout, stderr), true)
            }
        };
        let wall_time = started.elapsed();
        stdin_task.abort();

        let usage = monitor_handle
            .await
            .context("Resource monitor task failed")?;

        let return_code = resolve_return_code(exit_code(status), timed_out, usage.violation);

        info!(
            "Solution finished: return_code={}, timed_out={}, violation={:?}, wall={:.3}s",
            return_code,
            timed_out,
            usage.violation,
            wall_time.as_secs_f64()
        );

        Ok(RunOutcome {
            raw: RawResult {
                stdout,
                stderr,
                return_code,
                timed_out,
            },
            usage,
            wall_time,
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        input_lines: &[String],
        limits: &RunLimits,
    ) -> Result<RunOutcome> {
        self.execute(cmd, input_lines, limits).await
    }
}

/// Exit code, or the negated signal number when the process was killed
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

/// Give pipe readers a bounded grace period after a kill, then stop them so a
/// descendant that left the group cannot keep them alive.
async fn drain_output<T>(task: &mut JoinHandle<T>, pgid: u32) {
    if timeout(DRAIN_TIMEOUT, &mut *task).await.is_err() {
        debug!("Gave up draining output of process group {}", pgid);
    }
    task.abort();
}

async fn collect_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    tokio::try_join!(read_pipe(stdout), read_pipe(stderr))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
