//! Launcher entries pointing at the installed product.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use atlas_common::{build_config, utils};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutEntry {
    pub name: String,
    pub comment: String,
    /// Absolute path to the installed executable.
    pub exec: PathBuf,
    pub icon: PathBuf,
    pub terminal: bool,
    pub categories: Vec<String>,
    pub startup_notify: bool,
}

impl ShortcutEntry {
    pub fn for_installation(install_dir: &Path) -> Self {
        let config = build_config();
        Self {
            name: config.product.name.clone(),
            comment: config.shortcut.comment.clone(),
            exec: install_dir.join(config.executable_name()),
            icon: install_dir.join(&config.product.icon),
            terminal: false,
            categories: config.shortcut.categories.clone(),
            startup_notify: true,
        }
    }

    /// Render as a freedesktop `.desktop` file.
    pub fn to_desktop_entry(&self) -> String {
        let exec = self.exec.display().to_string();
        let exec = if exec.contains(char::is_whitespace) {
            format!("\"{exec}\"")
        } else {
            exec
        };
        let mut categories = self.categories.join(";");
        if !categories.is_empty() {
            categories.push(';');
        }
        format!(
            "[Desktop Entry]\n\
            Version=1.0\n\
            Type=Application\n\
            Name={}\n\
            Comment={}\n\
            Exec={exec}\n\
            Icon={}\n\
            Terminal={}\n\
            Categories={categories}\n\
            StartupNotify={}",
            self.name,
            self.comment,
            self.icon.display(),
            self.terminal,
            self.startup_notify,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortcutOptions {
    pub desktop: bool,
    pub menu: bool,
}

impl Default for ShortcutOptions {
    fn default() -> Self {
        Self {
            desktop: true,
            menu: true,
        }
    }
}

impl ShortcutOptions {
    pub fn none() -> Self {
        Self {
            desktop: false,
            menu: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.desktop && !self.menu
    }
}

/// Registers launchers for an installation, returning the paths it created.
pub trait ShortcutRegistrar: Send + Sync {
    fn register(&self, install_dir: &Path, options: ShortcutOptions) -> Result<Vec<PathBuf>>;
}

/// `.desktop` files for freedesktop compliant desktops.
#[derive(Debug, Clone)]
pub struct FreedesktopShortcuts {
    applications_dir: PathBuf,
    desktop_dir: PathBuf,
}

impl FreedesktopShortcuts {
    pub fn new(applications_dir: PathBuf, desktop_dir: PathBuf) -> Self {
        Self {
            applications_dir,
            desktop_dir,
        }
    }

    /// Use `$XDG_DATA_HOME/applications` and the user's desktop folder.
    pub fn for_current_user() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_dir = dirs::data_dir().unwrap_or_else(|| home.join(".local").join("share"));
        let desktop_dir = dirs::desktop_dir().unwrap_or_else(|| home.join("Desktop"));
        Self::new(data_dir.join("applications"), desktop_dir)
    }

    fn write_entry(path: &Path, entry: &ShortcutEntry) -> Result<()> {
        utils::ensure_parent_dir(path)?;
        utils::write_file(path, &entry.to_desktop_entry(), false)?;
        utils::set_exec_permission(path)
    }
}

impl ShortcutRegistrar for FreedesktopShortcuts {
    fn register(&self, install_dir: &Path, options: ShortcutOptions) -> Result<Vec<PathBuf>> {
        let config = build_config();
        let entry = ShortcutEntry::for_installation(install_dir);
        let mut created = vec![];

        if options.menu {
            let path = self
                .applications_dir
                .join(format!("{}.desktop", config.product.identifier));
            Self::write_entry(&path, &entry)
                .with_context(|| format!("unable to create menu entry '{}'", path.display()))?;
            created.push(path);
        }
        if options.desktop {
            let path = self
                .desktop_dir
                .join(format!("{}.desktop", config.product.executable));
            Self::write_entry(&path, &entry)
                .with_context(|| format!("unable to create desktop entry '{}'", path.display()))?;
            created.push(path);
        }
        Ok(created)
    }
}

/// `.lnk` shortcuts created through `powershell`.
#[cfg(windows)]
#[derive(Debug, Clone, Default)]
pub struct WindowsShortcuts;

#[cfg(windows)]
impl WindowsShortcuts {
    fn create_lnk(link: &Path, entry: &ShortcutEntry, working_dir: &Path) -> Result<()> {
        fn quote(p: &str) -> String {
            format!("'{}'", p.replace('\'', "''"))
        }
        utils::ensure_parent_dir(link)?;
        let script = format!(
            "$s = (New-Object -ComObject WScript.Shell).CreateShortcut({}); \
            $s.TargetPath = {}; $s.WorkingDirectory = {}; $s.IconLocation = {}; \
            $s.Description = {}; $s.Save()",
            quote(&utils::stringify_path(link)?),
            quote(&utils::stringify_path(&entry.exec)?),
            quote(&utils::stringify_path(working_dir)?),
            quote(&utils::stringify_path(&entry.exec)?),
            quote(&entry.comment),
        );
        let output = std::process::Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()
            .context("unable to run powershell")?;
        if !output.status.success() {
            anyhow::bail!(
                "powershell failed to create '{}': {}",
                link.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(windows)]
impl ShortcutRegistrar for WindowsShortcuts {
    fn register(&self, install_dir: &Path, options: ShortcutOptions) -> Result<Vec<PathBuf>> {
        let entry = ShortcutEntry::for_installation(install_dir);
        let file_name = format!("{}.lnk", entry.name);
        let mut created = vec![];

        if options.menu {
            let programs = dirs::data_dir()
                .context("unable to locate the roaming application data folder")?
                .join(r"Microsoft\Windows\Start Menu\Programs");
            let link = programs.join(&file_name);
            Self::create_lnk(&link, &entry, install_dir)?;
            created.push(link);
        }
        if options.desktop {
            let link = dirs::desktop_dir()
                .context("unable to locate the desktop folder")?
                .join(&file_name);
            Self::create_lnk(&link, &entry, install_dir)?;
            created.push(link);
        }
        Ok(created)
    }
}

/// Placeholder for platforms without launcher support.
#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
#[derive(Debug, Clone, Default)]
pub struct Unsupported;

#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
impl ShortcutRegistrar for Unsupported {
    fn register(&self, _install_dir: &Path, options: ShortcutOptions) -> Result<Vec<PathBuf>> {
        if options.is_empty() {
            return Ok(vec![]);
        }
        anyhow::bail!("shortcut creation is not supported on this platform")
    }
}

/// The registrar matching the current platform.
pub fn system_registrar() -> Arc<dyn ShortcutRegistrar> {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            Arc::new(WindowsShortcuts)
        } else if #[cfg(all(unix, not(target_os = "macos")))] {
            Arc::new(FreedesktopShortcuts::for_current_user())
        } else {
            Arc::new(Unsupported)
        }
    }
}
