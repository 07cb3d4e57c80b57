use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use super::error::InstallError;

/// Hex encoded SHA-256 digest of a file.
pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("unable to open '{}' for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 1024 * 1024];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare the digest of `archive` against `expected`, case insensitive.
///
/// Hashing a multi-gigabyte archive takes a while, so it runs on the blocking pool.
pub(crate) async fn verify_sha256(archive: &Path, expected: &str) -> Result<(), InstallError> {
    let path: PathBuf = archive.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .context("hashing task panicked")??;

    let expected = expected.trim().to_lowercase();
    if actual != expected {
        return Err(InstallError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
