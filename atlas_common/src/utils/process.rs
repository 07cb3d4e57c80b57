//! Run external programs while streaming their output line by line.
//!
//! Every run is guarded by a wall-clock timeout and can be stopped early through a
//! [`CancellationToken`], in both cases the child process gets killed before returning.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::setter;

/// Default limit for a single run, large enough for multi-gigabyte transfers.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// How long to keep collecting output after the child exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Things that happen while a child process is running.
#[derive(Debug, Clone, Copy)]
pub enum ProcessEvent<'a> {
    /// One line of output, without the trailing `\n` or `\r`.
    Line(OutputStream, &'a str),
    /// Periodic wake-up, only emitted when [`ProcessRunner::tick`] was set.
    Tick,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code of the process, `-1` if it was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("'{program}' could not be started: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{program}' did not finish within {} seconds", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("'{program}' was canceled")]
    Canceled { program: String },
    #[error("failed while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Executes external programs, see [`run`](ProcessRunner::run).
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    tick: Option<Duration>,
    cancel: CancellationToken,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl ProcessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            timeout: DEFAULT_PROCESS_TIMEOUT,
            tick: None,
            cancel,
        }
    }

    setter!(timeout(self.timeout, Duration));
    setter!(tick(self.tick, Option<Duration>));

    /// Request the running (and any future) process of this runner to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `program` with `args`, optionally inside of `working_dir`.
    ///
    /// `on_event` receives each output line as soon as it arrives, both `\n` and `\r`
    /// terminate a line so that progress bars redrawing in place are split as well.
    /// The full output is also collected into the returned [`ProcessOutput`].
    ///
    /// A non-zero exit code is NOT an error, check [`ProcessOutput::success`] for that.
    ///
    /// # Error
    /// - [`ProcessError::ToolUnavailable`] if the program cannot be found or started.
    /// - [`ProcessError::TimedOut`] if it ran longer than the configured timeout.
    /// - [`ProcessError::Canceled`] if [`cancel`](ProcessRunner::cancel) was called.
    pub async fn run<P, I, S, F>(
        &self,
        program: P,
        args: I,
        working_dir: Option<&Path>,
        mut on_event: F,
    ) -> Result<ProcessOutput, ProcessError>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
        F: FnMut(ProcessEvent<'_>),
    {
        let program_name = program.as_ref().to_string_lossy().to_string();
        if self.is_canceled() {
            return Err(ProcessError::Canceled {
                program: program_name,
            });
        }

        let mut cmd = Command::new(program.as_ref());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        debug!("running '{program_name}' with timeout {:?}", self.timeout);

        let mut child = cmd.spawn().map_err(|source| match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ProcessError::ToolUnavailable {
                    program: program_name.clone(),
                    source,
                }
            }
            _ => ProcessError::Io {
                program: program_name.clone(),
                source,
            },
        })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut output = ProcessOutput::default();
        let mut ticker = self.tick.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut streams_open = true;

        let status = loop {
            tokio::select! {
                maybe_line = line_rx.recv(), if streams_open => match maybe_line {
                    Some((stream, line)) => {
                        output.push_line(stream, &line);
                        on_event(ProcessEvent::Line(stream, &line));
                    }
                    None => streams_open = false,
                },
                status = child.wait() => {
                    break status.map_err(|source| ProcessError::Io {
                        program: program_name.clone(),
                        source,
                    })?;
                }
                _ = next_tick(&mut ticker) => on_event(ProcessEvent::Tick),
                _ = &mut deadline => {
                    warn!("'{program_name}' timed out, killing it");
                    kill(&mut child).await;
                    return Err(ProcessError::TimedOut {
                        program: program_name,
                        timeout: self.timeout,
                    });
                }
                _ = self.cancel.cancelled() => {
                    debug!("cancel requested, killing '{program_name}'");
                    kill(&mut child).await;
                    return Err(ProcessError::Canceled { program: program_name });
                }
            }
        };

        // the child is gone, but its last lines may still be in flight
        if streams_open {
            let drain = async {
                while let Some((stream, line)) = line_rx.recv().await {
                    output.push_line(stream, &line);
                    on_event(ProcessEvent::Line(stream, &line));
                }
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                debug!("output of '{program_name}' is still open after exit, ignoring the rest");
            }
        }

        output.exit_code = status.code().unwrap_or(-1);
        debug!("'{program_name}' exited with code {}", output.exit_code);
        Ok(output)
    }
}

impl ProcessOutput {
    fn push_line(&mut self, stream: OutputStream, line: &str) {
        let buf = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        buf.push_str(line);
        buf.push('\n');
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("unable to kill child process: {e}");
    }
    _ = child.wait().await;
}

async fn forward_lines<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: OutputStream,
    sender: UnboundedSender<(OutputStream, String)>,
) {
    let mut buf = [0_u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    let mut flush = |pending: &mut Vec<u8>| -> bool {
        if pending.is_empty() {
            return true;
        }
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        sender.send((stream, line)).is_ok()
    };

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..read] {
            if byte == b'\n' || byte == b'\r' {
                if !flush(&mut pending) {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }
    flush(&mut pending);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn collects_both_streams() {
        let mut lines = vec![];
        let output = ProcessRunner::default()
            .run(
                "sh",
                ["-c", "echo out; echo err 1>&2; printf '10%%\\r20%%'"],
                None,
                |event| {
                    if let ProcessEvent::Line(stream, line) = event {
                        lines.push((stream, line.to_string()));
                    }
                },
            )
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "out\n10%\n20%\n");
        assert_eq!(output.stderr, "err\n");
        assert!(lines.contains(&(OutputStream::Stderr, "err".to_string())));
        assert!(lines.contains(&(OutputStream::Stdout, "20%".to_string())));
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let output = ProcessRunner::default()
            .run("sh", ["-c", "exit 3"], None, |_| {})
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let err = ProcessRunner::default()
            .run("atlas-no-such-program-here", ["--version"], None, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let start = StdInstant::now();
        let err = ProcessRunner::default()
            .timeout(Duration::from_millis(200))
            .run("sleep", ["30"], None, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancel_returns_promptly() {
        let runner = ProcessRunner::default();
        let canceler = runner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceler.cancel();
        });

        let start = StdInstant::now();
        let err = runner.run("sleep", ["30"], None, |_| {}).await.unwrap_err();
        assert!(matches!(err, ProcessError::Canceled { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(runner.is_canceled());
    }

    #[tokio::test]
    async fn ticks_while_running() {
        let mut ticks = 0;
        ProcessRunner::default()
            .tick(Some(Duration::from_millis(50)))
            .run("sleep", ["1"], None, |event| {
                if matches!(event, ProcessEvent::Tick) {
                    ticks += 1;
                }
            })
            .await
            .unwrap();
        assert!(ticks >= 5);
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = ProcessRunner::default()
            .run("pwd", std::iter::empty::<&str>(), Some(dir.path()), |_| {})
            .await
            .unwrap();
        let reported = std::path::PathBuf::from(output.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
