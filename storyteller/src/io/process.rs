//! Run a child process with a timeout, bounded output, and piped stdin.

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Failure to run the child at all (as opposed to a non-zero exit).
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{0} reader thread panicked")]
    ReaderPanicked(&'static str),
}

impl ProcessError {
    fn io(action: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| ProcessError::Io { action, source }
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last `max_chars` characters of stderr, for error messages.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim();
        let skip = text.chars().count().saturating_sub(max_chars);
        text.chars().skip(skip).collect()
    }
}

/// Run `cmd`, feed it `stdin`, and capture stdout/stderr until exit or timeout.
///
/// Stdin is written and both output pipes are drained on their own threads so
/// a large prompt or a chatty child cannot deadlock the call. Output beyond
/// `output_limit_bytes` per stream is read and discarded. On timeout the child
/// is killed and `timed_out` is set.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput, ProcessError> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(program = %program, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(source) => {
            error!(program = %program, err = %source, "failed to spawn command");
            return Err(ProcessError::Spawn { program, source });
        }
    };

    let stdin_handle = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(thread::spawn(move || {
            // Children may exit without reading their input.
            if let Err(err) = pipe.write_all(&input)
                && err.kind() != io::ErrorKind::BrokenPipe
            {
                warn!(err = %err, "failed to write child stdin");
            }
        })),
        _ => None,
    };

    let stdout = child.stdout.take().ok_or_else(|| not_piped("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| not_piped("stderr"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child
        .wait_timeout(timeout)
        .map_err(ProcessError::io("wait for command"))?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().map_err(ProcessError::io("kill command"))?;
            child
                .wait()
                .map_err(ProcessError::io("wait command after kill"))?
        }
    };

    if let Some(handle) = stdin_handle
        && handle.join().is_err()
    {
        return Err(ProcessError::ReaderPanicked("stdin"));
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle, "stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn not_piped(stream: &'static str) -> ProcessError {
    ProcessError::Io {
        action: "take output pipe",
        source: io::Error::other(format!("{stream} was not piped")),
    }
}

fn join_output(
    handle: thread::JoinHandle<io::Result<(Vec<u8>, usize)>>,
    stream: &'static str,
) -> Result<(Vec<u8>, usize), ProcessError> {
    match handle.join() {
        Ok(result) => result.map_err(ProcessError::io("read output")),
        Err(_) => Err(ProcessError::ReaderPanicked(stream)),
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
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
