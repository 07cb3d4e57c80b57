use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Reason attached to a failed run, see [`InstallState::Failed`](super::pipeline::InstallState::Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ToolUnavailable,
    TransferFailed,
    ChecksumMismatch,
    ExtractionFailed,
    InsufficientSpace,
    Busy,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ToolUnavailable => "ToolUnavailable",
            Self::TransferFailed => "TransferFailed",
            Self::ChecksumMismatch => "ChecksumMismatch",
            Self::ExtractionFailed => "ExtractionFailed",
            Self::InsufficientSpace => "InsufficientSpace",
            Self::Busy => "Busy",
            Self::Other => "Other",
        };
        f.write_str(s)
    }
}

/// Why the whole transfer tool chain gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    /// At least one tool ran but could not fetch the resource.
    Connectivity,
    /// None of the transfer tools could be started.
    MissingTool,
    /// The last tool reported success but left an empty file behind.
    EmptyResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The archive tool exited with a non-zero code.
    ToolExit { code: i32, stderr: String },
    /// The archive tool succeeded but nothing was unpacked.
    Empty,
    TimedOut,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToolExit { code, stderr } if stderr.trim().is_empty() => {
                write!(f, "archive tool exited with code {code}")
            }
            Self::ToolExit { code, stderr } => {
                write!(f, "archive tool exited with code {code}: {}", stderr.trim())
            }
            Self::Empty => f.write_str("archive tool produced no files"),
            Self::TimedOut => f.write_str("archive tool timed out"),
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("required tool '{tool}' is not available")]
    ToolUnavailable { tool: String },
    #[error("download failed ({cause:?}): {detail}")]
    TransferFailed {
        cause: TransferFailure,
        detail: String,
    },
    #[error("checksum mismatch, expected '{expected}' but got '{actual}'")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("extraction failed: {0}")]
    ExtractionFailed(ExtractionFailure),
    #[error("insufficient disk space, {available} bytes available but {required} bytes required")]
    InsufficientSpace { available: u64, required: u64 },
    #[error("installation canceled")]
    Canceled,
    #[error("another installation into '{}' is already running", .0.display())]
    Busy(PathBuf),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InstallError {
    /// The failure reason of this error, `None` for a cancellation, which is not a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        let kind = match self {
            Self::ToolUnavailable { .. } => FailureKind::ToolUnavailable,
            Self::TransferFailed { .. } => FailureKind::TransferFailed,
            Self::ChecksumMismatch { .. } => FailureKind::ChecksumMismatch,
            Self::ExtractionFailed(_) => FailureKind::ExtractionFailed,
            Self::InsufficientSpace { .. } => FailureKind::InsufficientSpace,
            Self::Busy(_) => FailureKind::Busy,
            Self::Other(_) => FailureKind::Other,
            Self::Canceled => return None,
        };
        Some(kind)
    }

    /// One localized sentence describing what went wrong and what the user can do about it.
    pub fn user_message(&self) -> String {
        match self {
            Self::ToolUnavailable { tool } => t!("error_missing_tool", tool = tool).to_string(),
            Self::TransferFailed { cause, detail } => match cause {
                TransferFailure::Connectivity => {
                    t!("error_transfer_connectivity", detail = detail).to_string()
                }
                TransferFailure::MissingTool => t!("error_transfer_missing_tool").to_string(),
                TransferFailure::EmptyResult => t!("error_transfer_empty", detail = detail).to_string(),
            },
            Self::ChecksumMismatch { expected, actual } => {
                t!("error_checksum", expected = expected, actual = actual).to_string()
            }
            Self::ExtractionFailed(reason) => {
                t!("error_extraction", reason = reason.to_string()).to_string()
            }
            Self::InsufficientSpace {
                available,
                required,
            } => t!(
                "error_insufficient_space",
                available = to_gib(*available),
                required = to_gib(*required)
            )
            .to_string(),
            Self::Canceled => t!("install_canceled").to_string(),
            Self::Busy(dir) => t!("error_busy", dir = dir.display()).to_string(),
            Self::Other(e) => t!("error_other", detail = format!("{e:#}")).to_string(),
        }
    }
}

fn to_gib(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}
