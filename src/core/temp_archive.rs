use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atlas_common::utils;

/// The downloaded archive, deleted at the latest when this value is dropped.
#[derive(Debug)]
pub(crate) struct TempArchive {
    path: PathBuf,
}

impl TempArchive {
    /// Reserve a new `atlas_XXXXXX.tar` file under `root`, or the system temp directory.
    pub(crate) fn create(root: Option<&Path>) -> Result<Self> {
        let suffix = format!(".{}", atlas_common::build_config().install.archive_format);
        let file = utils::make_temp_file("atlas_", &suffix, root)?;
        let path = file
            .into_temp_path()
            .keep()
            .context("unable to keep temporary archive path")?;
        debug!("reserved temporary archive '{}'", path.display());
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the archive, calling this more than once is fine.
    pub(crate) fn remove(&self) -> Result<()> {
        utils::remove(&self.path)
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("{e:#}");
        }
    }
}
