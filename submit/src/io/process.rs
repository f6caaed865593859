//! Running child processes with timeouts and bounded, line-buffered output.
//!
//! Everything the pipeline launches (git, gh, the theme validator) goes through
//! [`ProcessRunner`], so tests can swap in a scripted fake.

use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished (or killed) child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the child was killed by a signal or on timeout.
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Last non-empty stderr line, trimmed.
    pub fn last_stderr_line(&self) -> Option<&str> {
        last_non_empty(&self.stderr)
    }

    /// Last non-empty stdout line, trimmed.
    pub fn last_stdout_line(&self) -> Option<&str> {
        last_non_empty(&self.stdout)
    }
}

fn last_non_empty(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Narrow capability for launching external programs.
pub trait ProcessRunner: Send + Sync {
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError>;
}

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// How long to keep draining pipes after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

type StreamResult = io::Result<(Vec<u8>, usize)>;

/// Runs real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    output_limit_bytes: usize,
}

impl SystemRunner {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl ProcessRunner for SystemRunner {
    /// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
    ///
    /// Output is read concurrently while the child runs. Bytes beyond the output limit are
    /// discarded while still draining the pipe.
    ///
    /// On Unix the child leads its own process group and a timeout kills the whole
    /// group, so helpers it spawned (e.g. `git-remote-https`) die with it. Pipes a
    /// surviving descendant still holds open are abandoned after a short grace.
    #[instrument(skip_all, fields(program = %spec.program, timeout_secs = spec.timeout.as_secs()))]
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let io_err = |source: io::Error| ProcessError::Io {
            program: spec.program.clone(),
            source,
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let started = Instant::now();
        debug!(command = %spec, workdir = %spec.workdir.display(), "spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(ProcessError::Spawn {
                    program: spec.program.clone(),
                    source: e,
                });
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_err(io::Error::other("stdout was not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_err(io::Error::other("stderr was not piped")))?;

        let limit = self.output_limit_bytes;
        let stdout_rx = spawn_reader(stdout, limit);
        let stderr_rx = spawn_reader(stderr, limit);

        let mut timed_out = false;
        let status = match child.wait_timeout(spec.timeout).map_err(io_err)? {
            Some(status) => status,
            None => {
                warn!(
                    timeout_secs = spec.timeout.as_secs(),
                    "command timed out, killing"
                );
                timed_out = true;
                kill_tree(&mut child).map_err(io_err)?;
                child.wait().map_err(io_err)?
            }
        };

        let drain = if timed_out {
            DRAIN_GRACE
        } else {
            spec.timeout
                .saturating_sub(started.elapsed())
                .saturating_add(DRAIN_GRACE)
        };
        let now = Instant::now();
        let drain_until = now.checked_add(drain).unwrap_or(now + DRAIN_GRACE);
        let (stdout, stdout_truncated) = collect_output(&stdout_rx, drain_until).map_err(io_err)?;
        let (stderr, stderr_truncated) = collect_output(&stderr_rx, drain_until).map_err(io_err)?;

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let exit_code = if timed_out { None } else { status.code() };
        debug!(exit_code = ?exit_code, timed_out, "command finished");
        Ok(ProcessOutput {
            exit_code,
            stdout: split_lines(&stdout),
            stderr: split_lines(&stderr),
            timed_out,
        })
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).map_err(io::Error::other)?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(errno) => {
            debug!(%errno, "killpg failed, killing child only");
            child.kill()
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the pipe was abandoned.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn collect_output(rx: &Receiver<StreamResult>, until: Instant) -> StreamResult {
    match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still open after the child exited, abandoning it");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::other("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}
