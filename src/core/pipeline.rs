//! The installation state machine.
//!
//! ```text
//! Idle -> PreflightChecking -> Downloading -> Verifying -> Extracting
//!      -> WritingManifest -> RegisteringShortcuts -> Completed
//! ```
//!
//! Any step may end in `Failed`, only a download may end in `Canceled`.
//! Everything runs sequentially on one task, callers observe it through [`InstallEvent`]s.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context};
use atlas_common::utils::{self, ProcessRunner};
use atlas_common::{build_config, setter};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::download::{Curl, DownloadAcquirer, TransferTool, Wget};
use super::error::{FailureKind, InstallError, TransferFailure};
use super::events::{EventEmitter, InstallEvent, InstallOutcome};
use super::extract::ArchiveExtractor;
use super::manifest::InstallManifest;
use super::preflight::{DiskSpaceChecker, Preflight, SystemDiskSpace};
use super::shortcut::{system_registrar, ShortcutOptions, ShortcutRegistrar};
use super::temp_archive::TempArchive;
use super::verify::verify_sha256;

const DOWNLOAD_START: u8 = 5;
const DOWNLOAD_END: u8 = 50;
const EXTRACT_START: u8 = 60;
const EXTRACT_CEILING: u8 = 95;
const MANIFEST_PERCENT: u8 = 96;
const SHORTCUTS_PERCENT: u8 = 98;
const SYNC_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallState {
    Idle,
    PreflightChecking,
    Downloading,
    Verifying,
    Extracting,
    WritingManifest,
    RegisteringShortcuts,
    Completed,
    Failed(FailureKind),
    Canceled,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({kind})"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl InstallState {
    /// Localized, human readable phase name.
    pub fn label(&self) -> String {
        match self {
            Self::Idle => t!("label_idle"),
            Self::PreflightChecking => t!("label_preflight"),
            Self::Downloading => t!("label_downloading"),
            Self::Verifying => t!("label_verifying"),
            Self::Extracting => t!("label_extracting"),
            Self::WritingManifest => t!("label_manifest"),
            Self::RegisteringShortcuts => t!("label_shortcuts"),
            Self::Completed => t!("label_completed"),
            Self::Failed(_) => t!("label_failed"),
            Self::Canceled => t!("label_canceled"),
        }
        .to_string()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Canceled)
    }

    /// Whether [`InstallHandle::cancel`] still takes effect once this state was entered.
    pub fn is_cancelable(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::PreflightChecking | Self::Downloading | Self::Verifying
        )
    }
}

/// What to install and where, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub install_dir: PathBuf,
    pub resource_id: String,
    pub create_desktop_shortcut: bool,
    pub create_menu_entry: bool,
    /// Hex encoded SHA-256 digest the archive must match, if known.
    pub expected_sha256: Option<String>,
}

impl InstallRequest {
    pub fn new<P: Into<PathBuf>>(install_dir: P) -> Self {
        Self {
            install_dir: install_dir.into(),
            resource_id: build_config().download.resource_id.clone(),
            create_desktop_shortcut: true,
            create_menu_entry: true,
            expected_sha256: None,
        }
    }

    setter!(resource_id(self.resource_id, id: impl Into<String>) { id.into() });
    setter!(desktop_shortcut(self.create_desktop_shortcut, bool));
    setter!(menu_entry(self.create_menu_entry, bool));
    setter!(expected_sha256(self.expected_sha256, Option<String>));

    pub fn shortcut_options(&self) -> ShortcutOptions {
        ShortcutOptions {
            desktop: self.create_desktop_shortcut,
            menu: self.create_menu_entry,
        }
    }
}

/// Programs the pipeline invokes, either bare names looked up in `PATH` or full paths.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    pub primary_transfer: OsString,
    pub fallback_transfer: OsString,
    pub archiver: OsString,
    /// Flushes file system buffers once everything is written, skipped when `None`.
    pub sync: Option<OsString>,
}

impl Default for ExternalTools {
    fn default() -> Self {
        Self {
            primary_transfer: "wget".into(),
            fallback_transfer: "curl".into(),
            archiver: "tar".into(),
            sync: cfg!(unix).then(|| "sync".into()),
        }
    }
}

static ACTIVE_RUNS: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(Default::default);

/// Marks an install directory as busy for as long as it lives.
///
/// Runs in this process are tracked in [`ACTIVE_RUNS`], other processes are kept out by an
/// exclusive lock on `.<dir name>.install.lock` next to the install directory.
struct RunGuard {
    install_dir: PathBuf,
    lock_path: PathBuf,
    _lock: File,
}

impl RunGuard {
    fn acquire(install_dir: &Path) -> Result<Self, InstallError> {
        let mut active = ACTIVE_RUNS.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(install_dir.to_path_buf()) {
            return Err(InstallError::Busy(install_dir.to_path_buf()));
        }
        match lock_install_dir(install_dir) {
            Ok((lock_path, lock)) => Ok(Self {
                install_dir: install_dir.to_path_buf(),
                lock_path,
                _lock: lock,
            }),
            Err(e) => {
                active.remove(install_dir);
                Err(e)
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        // removed while still locked, the lock itself goes with the file handle
        if let Err(e) = fs::remove_file(&self.lock_path) {
            debug!("unable to remove '{}': {e}", self.lock_path.display());
        }
        ACTIVE_RUNS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.install_dir);
    }
}

fn lock_path_of(install_dir: &Path) -> PathBuf {
    let name = install_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    install_dir
        .parent()
        .unwrap_or(install_dir)
        .join(format!(".{name}.install.lock"))
}

fn lock_install_dir(install_dir: &Path) -> Result<(PathBuf, File), InstallError> {
    let lock_path = lock_path_of(install_dir);
    utils::ensure_parent_dir(&lock_path)?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("unable to open lock file '{}'", lock_path.display()))?;
    match file.try_lock() {
        Ok(()) => Ok((lock_path, file)),
        Err(TryLockError::WouldBlock) => Err(InstallError::Busy(install_dir.to_path_buf())),
        Err(TryLockError::Error(e)) => Err(anyhow::Error::new(e)
            .context(format!("unable to lock '{}'", lock_path.display()))
            .into()),
    }
}

/// A pipeline started with [`InstallPipeline::spawn`].
pub struct InstallHandle {
    pub events: UnboundedReceiver<InstallEvent>,
    cancel: CancellationToken,
    task: JoinHandle<InstallOutcome>,
}

impl InstallHandle {
    /// Stop the download, has no effect once extraction started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drop the run right away, killing whatever external tool it is waiting for.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn wait(self) -> anyhow::Result<InstallOutcome> {
        self.task
            .await
            .map_err(|e| anyhow!("installation task ended unexpectedly: {e}"))
    }
}

pub struct InstallPipeline {
    request: InstallRequest,
    tools: ExternalTools,
    disk: Arc<dyn DiskSpaceChecker>,
    shortcuts: Arc<dyn ShortcutRegistrar>,
    temp_root: Option<PathBuf>,
    base_url: Url,
    retries: u32,
    attempt_timeout: Duration,
    transfer_timeout: Duration,
    extract_timeout: Duration,
    min_free_space: u64,
    cancel: CancellationToken,
    emitter: EventEmitter,
}

impl InstallPipeline {
    pub fn new(request: InstallRequest) -> Self {
        let config = build_config();
        Self {
            request,
            tools: ExternalTools::default(),
            disk: Arc::new(SystemDiskSpace),
            shortcuts: system_registrar(),
            temp_root: None,
            base_url: config.download.base_url.clone(),
            retries: config.download.retries,
            attempt_timeout: config.download.attempt_timeout(),
            transfer_timeout: config.download.transfer_timeout(),
            extract_timeout: config.install.extract_timeout(),
            min_free_space: config.install.min_free_space(),
            cancel: CancellationToken::new(),
            emitter: EventEmitter::detached(),
        }
    }

    setter!(tools(self.tools, ExternalTools));
    setter!(disk_checker(self.disk, checker: impl DiskSpaceChecker + 'static) { Arc::new(checker) });
    setter!(shortcut_registrar(self.shortcuts, Arc<dyn ShortcutRegistrar>));
    setter!(temp_root(self.temp_root, Option<PathBuf>));
    setter!(base_url(self.base_url, Url));
    setter!(min_free_space(self.min_free_space, u64));
    setter!(transfer_timeout(self.transfer_timeout, Duration));
    setter!(extract_timeout(self.extract_timeout, Duration));

    /// Receive the events of this pipeline, replacing any earlier subscription.
    pub fn subscribe(&mut self) -> UnboundedReceiver<InstallEvent> {
        let (emitter, rx) = EventEmitter::channel();
        self.emitter = emitter;
        rx
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a background task, the caller keeps going and listens on [`InstallHandle::events`].
    pub fn spawn(mut self) -> InstallHandle {
        let events = self.subscribe();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        InstallHandle {
            events,
            cancel,
            task,
        }
    }

    /// Run to completion, the returned outcome is also sent as the last event.
    pub async fn run(self) -> InstallOutcome {
        let emitter = self.emitter.clone();
        let result = self.execute().await;

        let outcome = match result {
            Ok(dir) => InstallOutcome {
                state: InstallState::Completed,
                success: true,
                message: t!("install_complete", dir = dir.display()).to_string(),
            },
            Err(e) => {
                let state = e
                    .failure_kind()
                    .map(InstallState::Failed)
                    .unwrap_or(InstallState::Canceled);
                debug!("installation ended as {state}: {e:#}");
                emitter.stage(state, emitter.current_percent());
                let message = e.user_message();
                emitter.log(message.as_str());
                InstallOutcome {
                    state,
                    success: false,
                    message,
                }
            }
        };
        emitter.finish(outcome.clone());
        outcome
    }

    fn transfer_tools(&self) -> Vec<Box<dyn TransferTool>> {
        vec![
            Box::new(Wget {
                program: self.tools.primary_transfer.clone(),
                retries: self.retries,
                attempt_timeout: self.attempt_timeout,
            }),
            Box::new(Curl {
                program: self.tools.fallback_transfer.clone(),
            }),
        ]
    }

    fn check_canceled(&self) -> Result<(), InstallError> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Canceled);
        }
        Ok(())
    }

    async fn execute(&self) -> Result<PathBuf, InstallError> {
        let emitter = &self.emitter;
        let install_dir = utils::to_normalized_absolute_path(&self.request.install_dir, None)?;
        if utils::is_root_dir(&install_dir) {
            return Err(anyhow!("{}", t!("notify_root_dir")).into());
        }
        let _guard = RunGuard::acquire(&install_dir)?;

        emitter.stage(InstallState::PreflightChecking, 0);
        emitter.log(t!("log_install_dir", dir = install_dir.display()));
        Preflight {
            disk: self.disk.as_ref(),
            min_free_space: self.min_free_space,
            archiver: &self.tools.archiver,
        }
        .run(&install_dir, emitter)?;

        emitter.stage(InstallState::Downloading, DOWNLOAD_START);
        let archive = TempArchive::create(self.temp_root.as_deref())?;
        let acquirer = DownloadAcquirer {
            tools: self.transfer_tools(),
            base_url: &self.base_url,
            runner: ProcessRunner::new(self.cancel.clone()).timeout(self.transfer_timeout),
            emitter,
            range: (DOWNLOAD_START, DOWNLOAD_END),
        };
        let transfer = acquirer
            .acquire(&self.request.resource_id, archive.path())
            .await
            .into_result()
            .inspect_err(|_| {
                if let Err(e) = archive.remove() {
                    warn!("{e:#}");
                }
            })?;
        debug!(
            "'{}' fetched with {}, {} bytes",
            transfer.path.display(),
            transfer.tool.as_deref().unwrap_or("unknown tool"),
            transfer.bytes
        );
        self.check_canceled()?;

        emitter.stage(InstallState::Verifying, DOWNLOAD_END);
        if utils::file_size(archive.path()) == 0 {
            return Err(InstallError::TransferFailed {
                cause: TransferFailure::EmptyResult,
                detail: archive.path().display().to_string(),
            });
        }
        if let Some(expected) = &self.request.expected_sha256 {
            emitter.log(t!("log_verifying_checksum"));
            verify_sha256(archive.path(), expected).await?;
            emitter.log(t!("log_checksum_ok"));
        }
        self.check_canceled()?;

        emitter.stage(InstallState::Extracting, EXTRACT_START);
        ArchiveExtractor {
            program: &self.tools.archiver,
            timeout: self.extract_timeout,
            emitter,
            start: EXTRACT_START,
            ceiling: EXTRACT_CEILING,
        }
        .extract(archive.path(), &install_dir)
        .await?;
        match archive.remove() {
            Ok(()) => emitter.log(t!("log_temp_removed")),
            Err(e) => warn!("{e:#}"),
        }
        self.mark_executable(&install_dir);

        emitter.stage(InstallState::WritingManifest, MANIFEST_PERCENT);
        let manifest = InstallManifest::new(&install_dir, transfer.bytes)
            .and_then(|m| m.write_to_dir(&install_dir));
        match manifest {
            Ok(path) => emitter.log(t!("log_manifest_written", path = path.display())),
            Err(e) => {
                warn!("{e:#}");
                emitter.log(t!("log_manifest_failed", reason = format!("{e:#}")));
            }
        }

        emitter.stage(InstallState::RegisteringShortcuts, SHORTCUTS_PERCENT);
        self.register_shortcuts(&install_dir).await;

        self.sync_disks().await;
        emitter.stage(InstallState::Completed, 100);
        Ok(install_dir)
    }

    fn mark_executable(&self, install_dir: &Path) {
        let exe = install_dir.join(build_config().executable_name());
        if !exe.is_file() {
            debug!("'{}' not found after extraction", exe.display());
            return;
        }
        match utils::set_exec_permission(&exe) {
            Ok(()) => self.emitter.log(t!("log_exec_permission", path = exe.display())),
            Err(e) => warn!("{e:#}"),
        }
    }

    /// Best-effort, failures only end up in the log.
    async fn register_shortcuts(&self, install_dir: &Path) {
        let options = self.request.shortcut_options();
        if options.is_empty() {
            self.emitter.log(t!("log_shortcuts_skipped"));
            return;
        }
        let registrar = Arc::clone(&self.shortcuts);
        let dir = install_dir.to_path_buf();
        let registered = tokio::task::spawn_blocking(move || registrar.register(&dir, options)).await;
        match registered {
            Ok(Ok(paths)) => {
                for path in paths {
                    self.emitter.log(t!("log_shortcut_created", path = path.display()));
                }
            }
            Ok(Err(e)) => {
                warn!("{e:#}");
                self.emitter.log(t!("log_shortcut_failed", reason = format!("{e:#}")));
            }
            Err(e) => warn!("shortcut registration task failed: {e}"),
        }
    }

    /// Flush written data so the space freed by the archive shows up right away.
    async fn sync_disks(&self) {
        let Some(program) = &self.tools.sync else {
            return;
        };
        let result = ProcessRunner::default()
            .timeout(SYNC_TIMEOUT)
            .run(program, std::iter::empty::<&str>(), None, |_| {})
            .await;
        match result {
            Ok(out) if out.success() => self.emitter.log(t!("log_synced")),
            Ok(out) => debug!("sync exited with code {}", out.exit_code),
            Err(e) => debug!("unable to sync disks: {e}"),
        }
    }
}
