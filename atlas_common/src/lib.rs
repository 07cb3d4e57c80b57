#[macro_use]
extern crate log;

pub mod types;
pub mod utils;

use types::BuildConfig;

/// Loads build configurations, such as the product name and the remote archive location.
pub fn build_config() -> &'static BuildConfig {
    BuildConfig::load()
}
