use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use atlas_common::utils::{self, OutputStream, ProcessError, ProcessEvent, ProcessRunner};

use super::error::{ExtractionFailure, InstallError};
use super::events::EventEmitter;

/// Synthetic progress is bumped by one on every tick while the archive tool runs.
const EXTRACT_TICK: Duration = Duration::from_millis(500);

/// Unpacks an archive with an external tool.
///
/// The archive tool reports no percentage, so progress grows by one unit per tick
/// from `start` up to `ceiling`, leaving room for the steps after extraction.
pub(crate) struct ArchiveExtractor<'a> {
    pub(crate) program: &'a OsStr,
    pub(crate) timeout: Duration,
    pub(crate) emitter: &'a EventEmitter,
    pub(crate) start: u8,
    pub(crate) ceiling: u8,
}

impl ArchiveExtractor<'_> {
    /// Extract `archive` into `target`, returning the number of entries the archive produced.
    ///
    /// An existing installation in `target` does not count, the archive must either add a
    /// visible entry or list at least one member it wrote.
    /// Once started this can not be canceled, the runner only has a timeout.
    pub(crate) async fn extract(&self, archive: &Path, target: &Path) -> Result<usize, InstallError> {
        utils::ensure_dir(target)?;
        let archive = utils::to_normalized_absolute_path(archive, None)?;
        let before = visible_entries(target)?;
        let label = t!("label_extracting").to_string();
        let mut synthetic = self.start;
        let mut listed = 0_usize;

        let runner = ProcessRunner::default()
            .timeout(self.timeout)
            .tick(Some(EXTRACT_TICK));
        let args = [OsStr::new("-xvf"), archive.as_os_str()];
        let outcome = runner
            .run(self.program, args, Some(target), |event| match event {
                ProcessEvent::Tick => {
                    synthetic = (synthetic + 1).min(self.ceiling);
                    self.emitter.progress(synthetic, label.as_str());
                }
                // bsdtar lists members on stderr as `x <name>`
                ProcessEvent::Line(OutputStream::Stderr, line) if line.starts_with("x ") => {
                    listed += 1;
                    trace!("{line}");
                }
                ProcessEvent::Line(OutputStream::Stderr, line) => {
                    self.emitter.log(format!("[{}] {line}", self.program.to_string_lossy()));
                }
                ProcessEvent::Line(OutputStream::Stdout, line) => {
                    if !line.trim().is_empty() {
                        listed += 1;
                    }
                    trace!("{line}");
                }
            })
            .await;

        let output = match outcome {
            Ok(output) => output,
            Err(ProcessError::ToolUnavailable { program, .. }) => {
                return Err(InstallError::ToolUnavailable { tool: program })
            }
            Err(ProcessError::TimedOut { .. }) => {
                return Err(InstallError::ExtractionFailed(ExtractionFailure::TimedOut))
            }
            Err(e) => return Err(anyhow::Error::new(e).into()),
        };
        if !output.success() {
            return Err(InstallError::ExtractionFailed(ExtractionFailure::ToolExit {
                code: output.exit_code,
                stderr: output.stderr,
            }));
        }

        let added = visible_entries(target)?.difference(&before).count();
        let entries = added.max(listed);
        if entries == 0 {
            return Err(InstallError::ExtractionFailed(ExtractionFailure::Empty));
        }
        self.emitter.progress(self.ceiling, label.as_str());
        self.emitter.log(t!("log_extracted", count = entries));
        Ok(entries)
    }
}

/// Top level entries of `dir`, hidden ones such as a previous install manifest excluded.
fn visible_entries(dir: &Path) -> Result<HashSet<PathBuf>> {
    let entries = utils::walk_dir(dir, false)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| !name.to_string_lossy().starts_with('.'))
        })
        .collect();
    Ok(entries)
}
