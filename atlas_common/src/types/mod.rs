mod build_config;

pub use build_config::*;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Types that are stored as `toml` documents.
pub trait TomlParser: DeserializeOwned + Sized {
    /// Name of the file this type is usually read from.
    const FILENAME: &'static str;

    fn from_str(from: &str) -> Result<Self> {
        toml::from_str(from).with_context(|| format!("failed to parse '{}'", Self::FILENAME))
    }
}
