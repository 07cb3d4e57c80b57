#![deny(unused_must_use)]

#[macro_use]
extern crate rust_i18n;
#[macro_use]
extern crate log;

pub mod cli;
mod core;

// Exports
pub use core::error::{ExtractionFailure, FailureKind, InstallError, TransferFailure};
pub use core::events::{EventEmitter, InstallEvent, InstallOutcome, LogLine, ProgressEvent};
pub use core::manifest::{check_for_updates, InstallManifest, UpdateStatus};
pub use core::pipeline::{
    ExternalTools, InstallHandle, InstallPipeline, InstallRequest, InstallState,
};
pub use core::preflight::{DiskSpaceChecker, SystemDiskSpace};
pub use core::shortcut::{
    system_registrar, FreedesktopShortcuts, ShortcutEntry, ShortcutOptions, ShortcutRegistrar,
};
pub use core::{default_install_dir, use_current_locale, AppInfo};

i18n!("locales", fallback = "en-US");
