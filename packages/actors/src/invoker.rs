//! Runs the external conversion program as a child process.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use queue_core::{ConversionError, JobKind};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::converter::{
    ConversionFuture, ConversionOutput, ConversionRequest, ConversionResult, Converter,
};

/// Bytes of stdout/stderr kept per stream; earlier output is discarded.
const DEFAULT_TAIL_BYTES: usize = 64 * 1024;

/// A program and its leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Split a whitespace-separated command line such as `python worker.py`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Invoked as `<single> <input> <output>`.
    pub single: CommandSpec,
    /// Invoked as `<batch> <output> <input>...`.
    pub batch: CommandSpec,
    pub timeout: Duration,
    pub tail_bytes: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            single: CommandSpec::new("python").arg("worker.py"),
            batch: CommandSpec::new("python").arg("batch_worker.py"),
            timeout: Duration::from_secs(600),
            tail_bytes: DEFAULT_TAIL_BYTES,
        }
    }
}

/// [`Converter`] backed by the external conversion program.
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    config: Arc<InvokerConfig>,
}

impl ProcessConverter {
    pub fn new(config: InvokerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    fn command_for(&self, request: &ConversionRequest) -> Command {
        let spec = match request.kind {
            JobKind::Single => &self.config.single,
            JobKind::Batch => &self.config.batch,
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        match request.kind {
            JobKind::Single => {
                for input in &request.inputs {
                    cmd.arg(input);
                }
                cmd.arg(&request.output);
            }
            JobKind::Batch => {
                cmd.arg(&request.output);
                cmd.args(&request.inputs);
            }
        }
        cmd
    }

    /// Run one conversion to completion, failure or timeout.
    pub async fn run(&self, request: ConversionRequest) -> ConversionResult {
        remove_stale_output(&request.output).await?;

        let mut cmd = self.command_for(&request);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the converter starts can be killed with it.
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::info!(
            job_id = %request.job_id,
            kind = %request.kind,
            inputs = request.inputs.len(),
            "Launching converter {}",
            cmd.as_std().get_program().to_string_lossy()
        );

        let start = Instant::now();
        // One budget for the wait and for draining the pipes.
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let mut child = cmd.spawn()?;
        let group = ProcessGroup::of(&child);

        // Both pipes are drained concurrently with the wait, otherwise a
        // chatty converter blocks on a full pipe and never exits.
        let tail = self.config.tail_bytes;
        let mut stdout_task = drain(child.stdout.take(), tail);
        let mut stderr_task = drain(child.stderr.take(), tail);

        let waited = tokio::time::timeout_at(deadline, child.wait()).await;

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                group.kill();
                stdout_task.abort();
                stderr_task.abort();
                return Err(ConversionError::Launch(e));
            }
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %request.job_id, "Failed to kill converter: {}", e);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(ConversionError::Timeout {
                    elapsed: start.elapsed(),
                });
            }
        };

        // Background processes left behind would keep the pipes open.
        group.kill();

        let drained = tokio::time::timeout_at(deadline, async {
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (stdout, stderr)
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok(output) => output,
            Err(_) => {
                tracing::warn!(
                    job_id = %request.job_id,
                    "Converter output still open at the deadline, discarding it"
                );
                stdout_task.abort();
                stderr_task.abort();
                (Vec::new(), Vec::new())
            }
        };
        let diagnostics = diagnostics(&stderr, &stdout);
        let elapsed = start.elapsed();

        if !status.success() {
            return Err(ConversionError::Failure {
                exit_code: status.code(),
                diagnostics,
            });
        }

        match tokio::fs::metadata(&request.output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(ConversionError::MissingOutput(request.output)),
        }

        tracing::debug!(
            job_id = %request.job_id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Converter finished"
        );

        Ok(ConversionOutput {
            count: request.inputs.len(),
            output: request.output,
            diagnostics,
            elapsed,
        })
    }
}

impl Converter for ProcessConverter {
    fn convert(&self, request: ConversionRequest) -> ConversionFuture {
        let this = self.clone();
        Box::pin(async move { this.run(request).await })
    }
}

/// Process group led by a spawned converter.
#[derive(Debug, Clone, Copy)]
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self(child.id())
    }

    /// SIGKILL every process still in the group. A group that is already
    /// gone is ignored.
    fn kill(self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0.and_then(|id| libc::pid_t::try_from(id).ok()) {
            // SAFETY: killpg takes plain integers and only sends a signal.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = self.0;
    }
}

/// A leftover artifact from an earlier attempt must not pass as this run's output.
async fn remove_stale_output(output: &Path) -> Result<(), ConversionError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(output).await {
        Ok(()) => {
            tracing::debug!("Removed stale output {}", output.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConversionError::Launch(e)),
    }
}

/// Read a stream to its end, keeping only the last `keep` bytes.
fn drain<R>(handle: Option<R>, keep: usize) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let Some(mut reader) = handle else {
            return tail;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > keep {
                        let excess = tail.len() - keep;
                        tail.drain(..excess);
                    }
                }
            }
        }
        tail
    })
}

fn diagnostics(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    String::from_utf8_lossy(stdout).trim().to_string()
}
