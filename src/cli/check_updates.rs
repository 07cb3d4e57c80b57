use crate::{check_for_updates, UpdateStatus};

use super::{ExecStatus, Installer};

/// Compare the installed version with the one this installer ships.
///
/// Always informational, an unreadable manifest is reported but does not fail the program.
pub(super) fn execute(installer: &Installer) -> ExecStatus {
    let status = installer
        .install_dir()
        .and_then(|dir| check_for_updates(&dir).map(|status| (dir, status)));

    match status {
        Ok((dir, UpdateStatus::NotInstalled)) => {
            info!("{}", t!("update_not_installed", dir = dir.display()));
        }
        Ok((_, UpdateStatus::UpToDate { installed })) => {
            info!("{}", t!("update_up_to_date", version = installed));
        }
        Ok((_, UpdateStatus::UpdateAvailable { installed, latest })) => {
            info!(
                "{}",
                t!("update_available", installed = installed, latest = latest)
            );
        }
        Err(e) => warn!("{}: {e:#}", t!("update_check_failed")),
    }
    ExecStatus::Informational
}
