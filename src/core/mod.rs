pub(crate) mod download;
pub mod error;
pub mod events;
pub(crate) mod extract;
pub mod manifest;
pub mod pipeline;
pub mod preflight;
pub mod shortcut;
pub(crate) mod temp_archive;
pub(crate) mod verify;

use std::path::PathBuf;
use std::sync::OnceLock;

use atlas_common::build_config;

/// Default installation directory, `~/Atlas_Interactivo` unless the home
/// directory cannot be determined, in which case the current directory is used.
pub fn default_install_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(&build_config().product.folder_name)
}

/// Application name and version shown by the command line interface.
#[derive(Debug)]
pub struct AppInfo {
    name: String,
    version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        let product = &build_config().product;
        Self {
            name: product.name.clone(),
            version: product.version.clone(),
        }
    }
}

impl AppInfo {
    pub fn get() -> &'static Self {
        static APP_INFO: OnceLock<AppInfo> = OnceLock::new();
        APP_INFO.get_or_init(Self::default)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Pick the interface language from the system locale.
///
/// Any Spanish variant (`es`, `es-MX`, ...) selects `es`, everything else falls back to `en-US`.
pub fn use_current_locale() {
    let locale = match sys_locale::get_locale() {
        Some(loc) if loc.to_lowercase().starts_with("es") => "es",
        _ => "en-US",
    };
    rust_i18n::set_locale(locale);
}
