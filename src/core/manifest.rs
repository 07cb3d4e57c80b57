//! The version marker written into the install directory after a successful installation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atlas_common::{build_config, utils};
use chrono::{Local, SecondsFormat};
use semver::Version;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    pub version: String,
    pub installed: bool,
    pub install_path: String,
    /// ISO-8601 timestamp of the installation.
    pub install_date: String,
    pub file_type: String,
    /// Size of the downloaded archive in bytes.
    pub download_size: String,
}

impl InstallManifest {
    pub fn new(install_dir: &Path, download_size: u64) -> Result<Self> {
        let config = build_config();
        Ok(Self {
            version: config.product.version.clone(),
            installed: true,
            install_path: utils::stringify_path(install_dir)?,
            install_date: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            file_type: config.install.archive_format.clone(),
            download_size: download_size.to_string(),
        })
    }

    pub fn path_in(install_dir: &Path) -> PathBuf {
        install_dir.join(&build_config().install.manifest_name)
    }

    /// Write (or overwrite) the manifest file inside of `install_dir`.
    pub fn write_to_dir(&self, install_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(install_dir);
        let content = serde_json::to_string_pretty(self)?;
        utils::write_file(&path, &content, false)
            .with_context(|| format!("unable to write install manifest '{}'", path.display()))?;
        Ok(path)
    }

    /// Read the manifest of an existing installation, `None` if there is no manifest.
    pub fn load_from_dir(install_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(install_dir);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = utils::read_to_string("install manifest", &path)?;
        let manifest = serde_json::from_str(&raw)
            .with_context(|| format!("malformed install manifest '{}'", path.display()))?;
        Ok(Some(manifest))
    }

    pub fn is_installed(install_dir: &Path) -> bool {
        matches!(Self::load_from_dir(install_dir), Ok(Some(m)) if m.installed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    NotInstalled,
    UpToDate { installed: String },
    UpdateAvailable { installed: String, latest: String },
}

/// Compare the installation in `install_dir` with the version this installer ships.
///
/// Versions that are not valid semver are compared as plain strings.
pub fn check_for_updates(install_dir: &Path) -> Result<UpdateStatus> {
    let latest = &build_config().product.version;
    let Some(manifest) = InstallManifest::load_from_dir(install_dir)? else {
        return Ok(UpdateStatus::NotInstalled);
    };
    if !manifest.installed {
        return Ok(UpdateStatus::NotInstalled);
    }

    let outdated = match (Version::parse(&manifest.version), Version::parse(latest)) {
        (Ok(installed), Ok(latest)) => installed < latest,
        _ => manifest.version != *latest,
    };
    Ok(if outdated {
        UpdateStatus::UpdateAvailable {
            installed: manifest.version,
            latest: latest.clone(),
        }
    } else {
        UpdateStatus::UpToDate {
            installed: manifest.version,
        }
    })
}
