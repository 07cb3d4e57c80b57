//! Product constants that are baked into the binary from `configuration.toml`.

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use super::TomlParser;

const BUILD_CONFIG_RAW: &str = include_str!("../../configuration.toml");
static BUILD_CONFIG: OnceLock<BuildConfig> = OnceLock::new();

#[derive(Debug, Deserialize)]
pub struct BuildConfig {
    pub product: ProductConfig,
    pub download: DownloadConfig,
    pub install: InstallConfig,
    pub shortcut: ShortcutConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProductConfig {
    /// Display name, used for shortcut names and messages.
    pub name: String,
    /// Lowercase name without spaces, used for launcher file names.
    pub identifier: String,
    pub version: String,
    /// Name of the main binary inside the archive, without extension.
    pub executable: String,
    pub icon: String,
    /// Name of the folder created under the home directory by default.
    pub folder_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadConfig {
    /// Identifier of the archive object on the storage host.
    pub resource_id: String,
    pub base_url: Url,
    /// Retry count handed to the primary transfer tool.
    pub retries: u32,
    attempt_timeout_secs: u64,
    transfer_timeout_secs: u64,
}

impl DownloadConfig {
    /// Network timeout of a single attempt inside the primary transfer tool.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Wall-clock limit for one transfer tool process.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallConfig {
    min_free_space_gb: u64,
    extract_timeout_secs: u64,
    pub manifest_name: String,
    pub archive_format: String,
}

impl InstallConfig {
    pub fn min_free_space(&self) -> u64 {
        self.min_free_space_gb * 1024 * 1024 * 1024
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct ShortcutConfig {
    pub comment: String,
    pub categories: Vec<String>,
}

impl TomlParser for BuildConfig {
    const FILENAME: &'static str = "configuration.toml";
}

impl BuildConfig {
    pub(crate) fn load() -> &'static Self {
        BUILD_CONFIG.get_or_init(|| {
            Self::from_str(BUILD_CONFIG_RAW)
                .expect("the baked-in configuration should always be valid")
        })
    }

    /// Name of the main executable with the platform specific extension.
    pub fn executable_name(&self) -> String {
        format!(
            "{}{}",
            self.product.executable,
            std::env::consts::EXE_SUFFIX
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baked_in_config_is_valid() {
        let config = BuildConfig::from_str(BUILD_CONFIG_RAW).unwrap();
        assert_eq!(config.product.name, "Atlas Interactivo");
        assert_eq!(config.install.manifest_name, ".atlas_version.json");
        assert_eq!(config.install.min_free_space(), 15 * 1024 * 1024 * 1024);
        assert_eq!(config.download.transfer_timeout(), Duration::from_secs(3600));
        assert_eq!(config.download.base_url.host_str(), Some("drive.google.com"));
    }

    #[test]
    fn executable_has_platform_suffix() {
        let name = BuildConfig::load().executable_name();
        #[cfg(windows)]
        assert_eq!(name, "Atlas_Interactivo.exe");
        #[cfg(not(windows))]
        assert_eq!(name, "Atlas_Interactivo");
    }
}
