//! Checks performed before anything is downloaded or written.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use atlas_common::utils;

use super::error::InstallError;
use super::events::EventEmitter;

/// Query the free space available to the current user on the volume holding a path.
pub trait DiskSpaceChecker: Send + Sync {
    fn available_space(&self, path: &Path) -> Result<u64>;
}

/// [`DiskSpaceChecker`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiskSpace;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        impl DiskSpaceChecker for SystemDiskSpace {
            #[allow(clippy::unnecessary_cast)]
            fn available_space(&self, path: &Path) -> Result<u64> {
                use std::ffi::CString;
                use std::os::unix::ffi::OsStrExt;

                let c_path = CString::new(path.as_os_str().as_bytes())?;
                let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
                // SAFETY: `c_path` is a valid nul-terminated string and `stat` is a valid out pointer.
                let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
                if ret != 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
            }
        }
    } else if #[cfg(windows)] {
        impl DiskSpaceChecker for SystemDiskSpace {
            fn available_space(&self, path: &Path) -> Result<u64> {
                use std::os::windows::ffi::OsStrExt;
                use winapi::shared::ntdef::ULARGE_INTEGER;
                use winapi::um::fileapi::GetDiskFreeSpaceExW;

                let wide: Vec<u16> = path
                    .as_os_str()
                    .encode_wide()
                    .chain(std::iter::once(0))
                    .collect();
                let mut free: ULARGE_INTEGER = unsafe { std::mem::zeroed() };
                // SAFETY: `wide` is nul-terminated, the unused out pointers may be null.
                let ok = unsafe {
                    GetDiskFreeSpaceExW(
                        wide.as_ptr(),
                        &mut free,
                        std::ptr::null_mut(),
                        std::ptr::null_mut(),
                    )
                };
                if ok == 0 {
                    return Err(std::io::Error::last_os_error().into());
                }
                Ok(unsafe { *free.QuadPart() })
            }
        }
    } else {
        impl DiskSpaceChecker for SystemDiskSpace {
            fn available_space(&self, _path: &Path) -> Result<u64> {
                anyhow::bail!("free space cannot be queried on this platform")
            }
        }
    }
}

pub(crate) struct Preflight<'a> {
    pub(crate) disk: &'a dyn DiskSpaceChecker,
    pub(crate) min_free_space: u64,
    pub(crate) archiver: &'a OsStr,
}

impl Preflight<'_> {
    /// Verify there is enough free space for `install_dir` and that the archive tool exists.
    ///
    /// The install directory may not exist yet, its closest existing ancestor is measured instead.
    /// When the free space cannot be determined at all, this only warns.
    pub(crate) fn run(&self, install_dir: &Path, emitter: &EventEmitter) -> Result<PathBuf, InstallError> {
        let measured = utils::existing_ancestor(install_dir).unwrap_or(install_dir);
        match self.disk.available_space(measured) {
            Ok(available) if available < self.min_free_space => {
                return Err(InstallError::InsufficientSpace {
                    available,
                    required: self.min_free_space,
                });
            }
            Ok(available) => emitter.log(t!(
                "log_free_space",
                available = format!("{:.1}", available as f64 / (1024.0 * 1024.0 * 1024.0))
            )),
            Err(e) => {
                debug!("free space query failed: {e:#}");
                emitter.log(t!("free_space_unknown", path = measured.display()));
            }
        }

        let resolved = which::which(self.archiver).map_err(|e| {
            debug!("unable to resolve '{}': {e}", self.archiver.to_string_lossy());
            InstallError::ToolUnavailable {
                tool: self.archiver.to_string_lossy().to_string(),
            }
        })?;
        emitter.log(t!("log_tool_found", path = resolved.display()));
        Ok(resolved)
    }
}
