use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

/// Wrapper to [`std::fs::read_to_string`] but with additional error context.
pub fn read_to_string<P: AsRef<Path>>(name: &str, path: P) -> Result<String> {
    fs::read_to_string(path.as_ref()).with_context(|| {
        format!(
            "failed to read {name} file at given location: '{}'",
            path.as_ref().display()
        )
    })
}

pub fn stringify_path<P: AsRef<Path>>(path: P) -> Result<String> {
    path.as_ref()
        .to_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            anyhow!(
                "failed to stringify path '{}'",
                path.as_ref().to_string_lossy().to_string()
            )
        })
}

pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    if !path.as_ref().is_dir() {
        fs::create_dir_all(path.as_ref()).with_context(|| {
            format!(
                "unable to create specified directory '{}'",
                path.as_ref().display()
            )
        })?;
    }
    Ok(())
}

pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    if let Some(p) = path.as_ref().parent() {
        ensure_dir(p)?;
    }
    Ok(())
}

/// Convert the given path to absolute path without `.` or `..` components.
///
/// - If the `path` is already an absolute path, this will just go through each component
///   and attempt to "remove" `.` and `..` components.
/// - If the `root` is not specified, this will assume that `path` is related to current directory.
///
/// # Error
/// If the `root` is not given, and the current directory cannot be determined, an error will be returned.
pub fn to_normalized_absolute_path<P: AsRef<Path>>(
    path: P,
    root: Option<&Path>,
) -> Result<PathBuf> {
    let abs_pathbuf = if path.as_ref().is_absolute() {
        path.as_ref().to_path_buf()
    } else {
        root.map(|p| Ok(p.to_path_buf()))
            .unwrap_or_else(|| env::current_dir().context("current directory cannot be determined"))
            .map(|mut cd| {
                cd.push(path);
                cd
            })?
    };
    // Remove any `.` and `..` from origin path
    let mut normalized_path = PathBuf::new();
    for path_component in abs_pathbuf.components() {
        match path_component {
            Component::CurDir => (),
            Component::ParentDir => {
                normalized_path.pop();
            }
            _ => normalized_path.push(path_component),
        }
    }

    Ok(normalized_path)
}

/// Returns `true` if the given path is the root of a filesystem, such as `/` or `C:\`.
pub fn is_root_dir<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    path.has_root() && path.parent().is_none()
}

/// Find the closest ancestor of `path` (or `path` itself) that exists on disk.
pub fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

pub fn write_file<P: AsRef<Path>>(path: P, content: &str, append: bool) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    if append {
        options.append(true);
    } else {
        options.truncate(true).write(true);
    }
    let mut file = options
        .create(true)
        .open(path.as_ref())
        .with_context(|| format!("unable to open '{}' for writing", path.as_ref().display()))?;
    writeln!(file, "{content}")?;
    file.sync_data()?;
    Ok(())
}

/// Set file permissions (executable)
/// rwxr-xr-x: 0o755
#[cfg(not(windows))]
pub fn set_exec_permission<P: AsRef<Path>>(path: P) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path.as_ref(), fs::Permissions::from_mode(0o755)).with_context(|| {
        format!(
            "unable to set executable permission on '{}'",
            path.as_ref().display()
        )
    })?;
    Ok(())
}

#[cfg(windows)]
pub fn set_exec_permission<P: AsRef<Path>>(_path: P) -> Result<()> {
    Ok(())
}

/// Attempts to read a directory path, then return a list of paths
/// that are inside the given directory, may or may not including sub folders.
pub fn walk_dir(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    fn collect_paths_(dir: &Path, paths: &mut Vec<PathBuf>, recursive: bool) -> Result<()> {
        for dir_entry in dir.read_dir()?.flatten() {
            paths.push(dir_entry.path());
            if recursive && matches!(dir_entry.file_type(), Ok(ty) if ty.is_dir()) {
                collect_paths_(&dir_entry.path(), paths, true)?;
            }
        }
        Ok(())
    }
    let mut paths = vec![];
    collect_paths_(dir, &mut paths, recursive)
        .with_context(|| format!("unable to read directory '{}'", dir.display()))?;
    Ok(paths)
}

/// Size of a file in bytes, `0` if it does not exist or cannot be read.
pub fn file_size<P: AsRef<Path>>(path: P) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or_default()
}

/// Delete a file or directory (recursively) from disk.
///
/// Removing a path that does not exist is not an error.
pub fn remove<P: AsRef<Path>>(src: P) -> Result<()> {
    if !src.as_ref().exists() {
        return Ok(());
    } else if src.as_ref().is_dir() {
        fs::remove_dir_all(&src)
            .with_context(|| format!("unable to remove directory '{}'", src.as_ref().display()))?;
    } else {
        fs::remove_file(&src)
            .with_context(|| format!("unable to remove file '{}'", src.as_ref().display()))?;
    }
    Ok(())
}

/// Get the parent directory of current executable.
///
/// # Error
/// This will fail if the path to current executable cannot be determined under some rare condition.
pub fn parent_dir_of_cur_exe() -> Result<PathBuf> {
    let exe_path = env::current_exe().context("unable to locate current executable")?;
    let maybe_install_dir = exe_path
        .parent()
        .unwrap_or_else(|| unreachable!("executable should always have a parent directory"))
        .to_path_buf();
    Ok(maybe_install_dir)
}

/// Create temporary file with or without specific directory as root.
///
/// The file is deleted when the returned handle is dropped, unless it gets persisted.
pub fn make_temp_file(prefix: &str, suffix: &str, root: Option<&Path>) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(suffix);

    if let Some(r) = root {
        debug!("creating temporary file under '{}'", r.display());
        builder
            .tempfile_in(r)
            .with_context(|| format!("unable to create temporary file under {}", r.display()))
    } else {
        builder
            .tempfile()
            .context("unable to create temporary file")
    }
}
