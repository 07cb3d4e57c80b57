//! Fetch the product archive with an ordered chain of external transfer tools.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use atlas_common::utils::{self, OutputStream, ProcessError, ProcessEvent, ProcessRunner};
use regex::Regex;
use url::Url;

use super::error::{InstallError, TransferFailure};
use super::events::EventEmitter;

/// How often the destination file is measured for tools without a parseable progress.
const GROWTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Turns one line of a tool's output into a `0..=100` percentage, if it carries one.
pub(crate) trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<u8>;
}

/// Parser for output containing `NN%` markers, the last marker on a line wins.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PercentMarkers;

impl ProgressParser for PercentMarkers {
    fn parse(&self, line: &str) -> Option<u8> {
        static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?:^|\D)(\d{1,3})%").unwrap_or_else(|_| unreachable!("the pattern is valid"))
        });
        PERCENT
            .captures_iter(line)
            .filter_map(|cap| cap[1].parse::<u8>().ok())
            .filter(|pct| *pct <= 100)
            .last()
    }
}

pub(crate) enum ProgressSource {
    Parsed(Box<dyn ProgressParser>),
    /// The tool prints nothing usable, watch the size of the destination file instead.
    FileGrowth,
}

/// An external program able to save a URL into a local file.
pub(crate) trait TransferTool: Send + Sync {
    fn program(&self) -> &OsStr;
    fn args(&self, url: &Url, dest: &Path) -> Vec<OsString>;
    fn progress_source(&self) -> ProgressSource;
}

pub(crate) struct Wget {
    pub(crate) program: OsString,
    pub(crate) retries: u32,
    pub(crate) attempt_timeout: Duration,
}

impl TransferTool for Wget {
    fn program(&self) -> &OsStr {
        &self.program
    }

    fn args(&self, url: &Url, dest: &Path) -> Vec<OsString> {
        vec![
            "--no-check-certificate".into(),
            "--no-netrc".into(),
            "--progress=dot:giga".into(),
            format!("--tries={}", self.retries).into(),
            format!("--timeout={}", self.attempt_timeout.as_secs()).into(),
            "-O".into(),
            dest.as_os_str().to_os_string(),
            url.as_str().into(),
        ]
    }

    fn progress_source(&self) -> ProgressSource {
        ProgressSource::Parsed(Box::new(PercentMarkers))
    }
}

pub(crate) struct Curl {
    pub(crate) program: OsString,
}

impl TransferTool for Curl {
    fn program(&self) -> &OsStr {
        &self.program
    }

    fn args(&self, url: &Url, dest: &Path) -> Vec<OsString> {
        vec![
            "-L".into(),
            "--fail".into(),
            "--progress-bar".into(),
            "--location-trusted".into(),
            "--output".into(),
            dest.as_os_str().to_os_string(),
            url.as_str().into(),
        ]
    }

    fn progress_source(&self) -> ProgressSource {
        ProgressSource::FileGrowth
    }
}

/// Direct download address of `resource_id`.
///
/// A fresh random token is appended each time so that no cache along the way
/// can hand back a stale answer or an interstitial page.
pub(crate) fn download_url(base: &Url, resource_id: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("id", resource_id)
        .append_pair("export", "download")
        .append_pair("confirm", "t")
        .append_pair("uuid", &uuid::Uuid::new_v4().to_string());
    url
}

/// Outcome of [`DownloadAcquirer::acquire`].
#[derive(Debug, Clone, Default)]
pub struct TransferResult {
    pub success: bool,
    pub path: PathBuf,
    pub bytes: u64,
    /// The tool that produced the file, or the last one attempted.
    pub tool: Option<String>,
    pub error: Option<String>,
    pub cause: Option<TransferFailure>,
    pub canceled: bool,
}

impl TransferResult {
    pub(crate) fn into_result(self) -> Result<Self, InstallError> {
        if self.canceled {
            Err(InstallError::Canceled)
        } else if !self.success {
            Err(InstallError::TransferFailed {
                cause: self.cause.unwrap_or(TransferFailure::Connectivity),
                detail: self.error.unwrap_or_default(),
            })
        } else {
            Ok(self)
        }
    }
}

pub(crate) struct DownloadAcquirer<'a> {
    pub(crate) tools: Vec<Box<dyn TransferTool>>,
    pub(crate) base_url: &'a Url,
    /// Carries the cancellation token and the per-tool timeout.
    pub(crate) runner: ProcessRunner,
    pub(crate) emitter: &'a EventEmitter,
    /// Share of the overall progress covered by the transfer.
    pub(crate) range: (u8, u8),
}

impl DownloadAcquirer<'_> {
    fn scale(&self, percent: u8) -> u8 {
        let (start, end) = self.range;
        let span = u32::from(end.saturating_sub(start));
        start + (u32::from(percent.min(100)) * span / 100) as u8
    }

    /// Try each tool in order until one leaves a non-empty file at `dest`.
    pub(crate) async fn acquire(&self, resource_id: &str, dest: &Path) -> TransferResult {
        let mut result = TransferResult {
            path: dest.to_path_buf(),
            ..Default::default()
        };
        let label = t!("label_downloading").to_string();
        let mut any_ran = false;
        let mut last_was_empty = false;

        for tool in &self.tools {
            let name = tool.program().to_string_lossy().to_string();
            result.tool = Some(name.clone());
            if self.runner.is_canceled() {
                result.canceled = true;
                return result;
            }

            let url = download_url(self.base_url, resource_id);
            self.emitter.log(t!("log_trying_tool", tool = &name));
            debug!("downloading '{url}' into '{}'", dest.display());

            let source = tool.progress_source();
            let runner = match source {
                ProgressSource::FileGrowth => self.runner.clone().tick(Some(GROWTH_POLL_INTERVAL)),
                ProgressSource::Parsed(_) => self.runner.clone().tick(None),
            };
            let (start, end) = self.range;
            let mut synthetic = start;
            let mut last_size = 0_u64;
            let mut last_reported = None;

            let outcome = runner
                .run(tool.program(), tool.args(&url, dest), None, |event| match (&source, event) {
                    (ProgressSource::Parsed(parser), ProcessEvent::Line(_, line)) => {
                        if let Some(pct) = parser.parse(line) {
                            if last_reported != Some(pct) {
                                last_reported = Some(pct);
                                self.emitter.progress(self.scale(pct), label.as_str());
                            }
                        }
                    }
                    (ProgressSource::FileGrowth, ProcessEvent::Tick) => {
                        let size = utils::file_size(dest);
                        if size > last_size {
                            last_size = size;
                            synthetic = (synthetic + 1).min(end.saturating_sub(1));
                            self.emitter.progress(synthetic, label.as_str());
                            self.emitter.log(t!("log_downloaded_kb", size = size / 1024));
                        }
                    }
                    (_, ProcessEvent::Line(OutputStream::Stderr, line)) => {
                        trace!("[{name}] {line}");
                    }
                    _ => (),
                })
                .await;

            match outcome {
                Err(ProcessError::Canceled { .. }) => {
                    self.emitter.log(t!("log_download_canceled"));
                    result.canceled = true;
                    return result;
                }
                Err(ProcessError::ToolUnavailable { .. }) => {
                    self.emitter.log(t!("log_tool_unavailable", tool = &name));
                    result.error = Some(t!("log_tool_unavailable", tool = &name).to_string());
                }
                Err(e) => {
                    any_ran = true;
                    last_was_empty = false;
                    let reason = e.to_string();
                    self.emitter.log(t!("log_tool_failed", tool = &name, reason = &reason));
                    result.error = Some(reason);
                }
                Ok(output) if !output.success() => {
                    any_ran = true;
                    last_was_empty = false;
                    let reason = last_line(&output.stderr)
                        .map(|l| format!("exit code {}: {l}", output.exit_code))
                        .unwrap_or_else(|| format!("exit code {}", output.exit_code));
                    self.emitter.log(t!("log_tool_failed", tool = &name, reason = &reason));
                    result.error = Some(reason);
                }
                Ok(_) => {
                    any_ran = true;
                    let bytes = utils::file_size(dest);
                    if bytes == 0 {
                        last_was_empty = true;
                        self.emitter.log(t!("log_empty_download", tool = &name));
                        result.error = Some(t!("log_empty_download", tool = &name).to_string());
                        continue;
                    }
                    self.emitter.progress(end, label.as_str());
                    self.emitter.log(t!(
                        "log_download_complete",
                        tool = &name,
                        size = format!("{:.1}", bytes as f64 / (1024.0 * 1024.0))
                    ));
                    result.success = true;
                    result.bytes = bytes;
                    result.error = None;
                    return result;
                }
            }
        }

        result.cause = Some(if !any_ran {
            TransferFailure::MissingTool
        } else if last_was_empty {
            TransferFailure::EmptyResult
        } else {
            TransferFailure::Connectivity
        });
        result
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
