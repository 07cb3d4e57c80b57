use std::process::ExitCode;

use atlas_installer::cli;

#[tokio::main]
async fn main() -> ExitCode {
    atlas_installer::use_current_locale();

    let installer = cli::parse_installer_cli();
    match installer.execute().await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            if atlas_common::utils::logger_is_set() {
                log::error!("{e:?}");
            } else {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
