//! Typed notifications sent from a running installation to whoever started it.
//!
//! The pipeline never talks to a user interface directly. Everything a caller can render
//! (a progress bar, a log view, the final dialog) arrives through an [`InstallEvent`] channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::pipeline::InstallState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Overall progress, `0..=100`.
    pub percent: u8,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            timestamp: Local::now(),
            text: text.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// The terminal result of a run.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub state: InstallState,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum InstallEvent {
    Stage(InstallState),
    Progress(ProgressEvent),
    Log(LogLine),
    /// Always the last event of a run, sent exactly once.
    Finished(InstallOutcome),
}

/// Sending half of the event channel.
///
/// Progress is kept non-decreasing: a report lower than the last one is raised to it.
/// After [`finish`](EventEmitter::finish) every further call is ignored.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: Option<UnboundedSender<InstallEvent>>,
    percent: Arc<AtomicU8>,
    finished: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn channel() -> (Self, UnboundedReceiver<InstallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(Some(tx)), rx)
    }

    /// An emitter nobody listens to, events only end up in the log.
    pub fn detached() -> Self {
        Self::with_sender(None)
    }

    fn with_sender(sender: Option<UnboundedSender<InstallEvent>>) -> Self {
        Self {
            sender,
            percent: Arc::new(AtomicU8::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    fn send(&self, event: InstallEvent) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = &self.sender {
            // the receiver may be gone, that only means nobody is watching anymore
            _ = tx.send(event);
        }
    }

    pub fn current_percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    pub fn progress<S: Into<String>>(&self, percent: u8, label: S) {
        let requested = percent.min(100);
        let previous = self.percent.fetch_max(requested, Ordering::SeqCst);
        self.send(InstallEvent::Progress(ProgressEvent {
            percent: previous.max(requested),
            label: label.into(),
        }));
    }

    pub fn log<S: Into<String>>(&self, text: S) {
        let line = LogLine::new(text);
        trace!("{}", line.text);
        self.send(InstallEvent::Log(line));
    }

    pub fn stage(&self, state: InstallState, percent: u8) {
        debug!("entering stage {state}");
        self.send(InstallEvent::Stage(state));
        self.progress(percent, state.label());
    }

    /// Send the terminal outcome, only the first call has any effect.
    pub fn finish(&self, outcome: InstallOutcome) {
        if let Some(tx) = &self.sender {
            if !self.finished.swap(true, Ordering::SeqCst) {
                _ = tx.send(InstallEvent::Finished(outcome));
            }
        } else {
            self.finished.store(true, Ordering::SeqCst);
        }
    }
}
