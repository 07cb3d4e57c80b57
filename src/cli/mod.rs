//! Command line surface of the installer.

mod check_updates;
mod install;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use atlas_common::utils;
use clap::{Parser, ValueHint};
use colored::Colorize;

use crate::{default_install_dir, AppInfo};

/// Install Atlas Interactivo.
///
/// Downloads the product archive, unpacks it into the install directory and
/// creates launcher entries for it.
#[derive(Parser, Debug)]
#[command(name = "atlas-installer", disable_version_flag = true)]
pub struct Installer {
    /// Print version information and exit.
    #[arg(short = 'v', long = "version")]
    show_version: bool,
    /// Install into this directory instead of `~/Atlas_Interactivo`.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::DirPath)]
    install_dir: Option<PathBuf>,
    /// Do not create the desktop shortcut nor the application menu entry.
    #[arg(long)]
    skip_desktop: bool,
    /// Report whether the existing installation is up to date, then exit.
    #[arg(long)]
    check_updates: bool,
    /// Expected SHA-256 digest of the downloaded archive, in hex.
    #[arg(long, value_name = "HEX")]
    sha256: Option<String>,
    /// Enable verbose output.
    #[arg(long, conflicts_with = "quiet")]
    verbose: bool,
    /// Suppress non-critical messages.
    #[arg(short, long)]
    quiet: bool,
}

/// How a command line invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Only information was printed, nothing was installed.
    Informational,
    Installed,
    /// The installation ended as failed or canceled.
    NotInstalled,
}

impl ExecStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Informational | Self::Installed => ExitCode::SUCCESS,
            Self::NotInstalled => ExitCode::FAILURE,
        }
    }
}

impl Installer {
    /// The absolute install directory requested on the command line, or the default one.
    pub fn install_dir(&self) -> Result<PathBuf> {
        match &self.install_dir {
            Some(dir) => utils::to_normalized_absolute_path(dir, None),
            None => Ok(default_install_dir()),
        }
    }

    pub async fn execute(&self) -> Result<ExecStatus> {
        if self.show_version {
            let app = AppInfo::get();
            println!("{} {}", app.name().bold(), app.version());
            return Ok(ExecStatus::Informational);
        }

        if let Err(e) = utils::Logger::new()
            .verbose(self.verbose)
            .quiet(self.quiet)
            .setup()
        {
            eprintln!("{}: {e:#}", t!("logger_setup_failed"));
        }

        if self.check_updates {
            return Ok(check_updates::execute(self));
        }
        install::execute(self).await
    }
}

pub fn parse_installer_cli() -> Installer {
    Installer::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_parsed() {
        let cli = Installer::try_parse_from([
            "atlas-installer",
            "--install-dir",
            "/opt/atlas",
            "--skip-desktop",
            "--sha256",
            "abcd",
        ])
        .unwrap();
        assert_eq!(cli.install_dir().unwrap(), PathBuf::from("/opt/atlas"));
        assert!(cli.skip_desktop);
        assert_eq!(cli.sha256.as_deref(), Some("abcd"));
        assert!(!cli.check_updates);
    }

    #[test]
    fn short_version_flag() {
        let cli = Installer::try_parse_from(["atlas-installer", "-v"]).unwrap();
        assert!(cli.show_version);
    }

    #[test]
    fn default_dir_when_not_given() {
        let cli = Installer::try_parse_from(["atlas-installer"]).unwrap();
        assert_eq!(cli.install_dir().unwrap(), default_install_dir());
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Installer::try_parse_from(["atlas-installer", "--verbose", "-q"]).is_err());
    }

    #[test]
    fn help_is_an_informational_exit() {
        let err = Installer::try_parse_from(["atlas-installer", "-h"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }
}
