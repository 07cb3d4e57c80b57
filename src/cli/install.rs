//! Run the installation pipeline and render its events on the console.

use anyhow::{bail, Result};
use atlas_common::utils::{self, CliProgress};

use crate::{InstallEvent, InstallPipeline, InstallRequest, InstallState};

use super::{ExecStatus, Installer};

pub(super) async fn execute(installer: &Installer) -> Result<ExecStatus> {
    let install_dir = installer.install_dir()?;
    if utils::is_root_dir(&install_dir) {
        bail!(t!("notify_root_dir"));
    }

    let request = InstallRequest::new(&install_dir)
        .desktop_shortcut(!installer.skip_desktop)
        .menu_entry(!installer.skip_desktop)
        .expected_sha256(installer.sha256.clone());
    info!("{}", t!("installing_to", dir = install_dir.display()));

    let mut handle = InstallPipeline::new(request).spawn();
    let cancel = handle.cancel_token();
    let progress = CliProgress::new(installer.quiet);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut listening = true;
    let mut interrupted = false;
    let mut stage = InstallState::Idle;
    let mut outcome = None;

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(InstallEvent::Progress(p)) => progress.set(p.percent, &p.label),
                Some(InstallEvent::Log(line)) => {
                    if !installer.quiet {
                        progress.suspend(|| println!("{line}"));
                    }
                }
                Some(InstallEvent::Stage(state)) => {
                    debug!("stage: {state}");
                    stage = state;
                }
                Some(InstallEvent::Finished(o)) => outcome = Some(o),
                None => break,
            },
            signal = &mut ctrl_c, if listening => {
                if let Err(e) = signal {
                    debug!("unable to listen for Ctrl-C: {e}");
                    listening = false;
                    continue;
                }
                if interrupted {
                    handle.abort();
                    progress.abandon(&InstallState::Canceled.label());
                    warn!("{}", t!("interrupt_exit"));
                    return Ok(ExecStatus::NotInstalled);
                }
                interrupted = true;
                let notice = if stage.is_cancelable() {
                    cancel.cancel();
                    t!("cancel_requested")
                } else {
                    t!("cancel_unavailable", stage = stage.label())
                };
                progress.suspend(|| warn!("{notice}"));
                ctrl_c.set(tokio::signal::ctrl_c());
            }
        }
    }

    let outcome = match outcome {
        Some(o) => o,
        None => handle.wait().await?,
    };
    if outcome.success {
        progress.finish(&outcome.state.label());
        info!("{}", outcome.message);
        Ok(ExecStatus::Installed)
    } else {
        progress.abandon(&outcome.state.label());
        error!("{}", outcome.message);
        Ok(ExecStatus::NotInstalled)
    }
}
