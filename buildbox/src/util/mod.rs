pub mod poll;

use std::path::{Path, PathBuf};

use buildbox_shared::errors::{BuildboxError, BuildboxResult};
use walkdir::WalkDir;

/// Find a required binary on PATH.
///
/// # Returns
/// * `Ok(PathBuf)` - Absolute path to the binary
/// * `Err(NotFound)` - Binary is not installed
pub fn which_required(binary_name: &str) -> BuildboxResult<PathBuf> {
    which::which(binary_name).map_err(|e| {
        BuildboxError::NotFound(format!(
            "Missing required command '{}': {}",
            binary_name, e
        ))
    })
}

/// Copy a file or directory tree on the local filesystem.
///
/// Files are copied to `destination` (or into it, when it is an existing
/// directory). Directories are merged into `destination`, creating it and
/// overwriting files that already exist there. Symlinks are recreated, not
/// followed.
///
/// # Errors
/// `NotFound` if `source` is neither a regular file nor a directory.
pub fn copy_path(source: &Path, destination: &Path) -> BuildboxResult<()> {
    if source.is_file() {
        let target = if destination.is_dir() {
            let name = source.file_name().ok_or_else(|| {
                BuildboxError::Storage(format!("Invalid source path: {}", source.display()))
            })?;
            destination.join(name)
        } else {
            destination.to_path_buf()
        };
        copy_file(source, &target)
    } else if source.is_dir() {
        copy_tree(source, destination)
    } else {
        Err(BuildboxError::NotFound(format!(
            "Source {} not found.",
            source.display()
        )))
    }
}

fn copy_file(source: &Path, target: &Path) -> BuildboxResult<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            BuildboxError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    std::fs::copy(source, target).map_err(|e| {
        BuildboxError::Storage(format!(
            "Failed to copy {} to {}: {}",
            source.display(),
            target.display(),
            e
        ))
    })?;
    Ok(())
}

fn copy_tree(source: &Path, destination: &Path) -> BuildboxResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            BuildboxError::Storage(format!("Failed to walk {}: {}", source.display(), e))
        })?;

        let relative = entry.path().strip_prefix(source).map_err(|e| {
            BuildboxError::Internal(format!("walkdir escaped {}: {}", source.display(), e))
        })?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| {
                BuildboxError::Storage(format!(
                    "Failed to create directory {}: {}",
                    target.display(),
                    e
                ))
            })?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> BuildboxResult<()> {
    let link = std::fs::read_link(source).map_err(|e| {
        BuildboxError::Storage(format!("Failed to read link {}: {}", source.display(), e))
    })?;
    if target.symlink_metadata().is_ok() {
        let _ = std::fs::remove_file(target);
    }
    std::os::unix::fs::symlink(&link, target).map_err(|e| {
        BuildboxError::Storage(format!(
            "Failed to create symlink {}: {}",
            target.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> BuildboxResult<()> {
    copy_file(source, target)
}
