//! Creation of task log folders and files with configured permissions.
//!
//! Log files may be written both by the worker user and by an impersonated
//! task user, so new folders and files get the configured modes exactly
//! rather than whatever the umask leaves.

use crate::error::LogFileError;
use crate::settings::LogFileSettings;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Create `directory` and every missing ancestor, outermost first.
///
/// Folders that already exist are left as they are; folders created here
/// get `mode`.
pub fn prepare_log_folder(directory: &Path, mode: u32) -> Result<(), LogFileError> {
    let mut missing: Vec<&Path> = directory.ancestors().filter(|p| !p.as_os_str().is_empty()).collect();
    missing.reverse();

    for dir in missing {
        match create_dir(dir, mode) {
            Ok(()) => set_mode(dir, mode).map_err(|source| LogFileError::Folder {
                path: dir.to_path_buf(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(source) => {
                return Err(LogFileError::Folder {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
    }
    Ok(())
}

/// Make sure the task log file at `base_log_folder/relative_path` exists.
///
/// Missing parent folders are created with the folder mode and a new file
/// gets the file mode. Failing to apply the file mode is logged and
/// otherwise ignored.
///
/// **Errors**
/// - [`LogFileError::Folder`] if a parent folder cannot be created.
/// - [`LogFileError::File`] if the file cannot be created.
pub fn init_log_file(relative_path: impl AsRef<Path>, settings: &LogFileSettings) -> Result<PathBuf, LogFileError> {
    let full_path = settings.base_log_folder.join(relative_path);
    if let Some(parent) = full_path.parent() {
        prepare_log_folder(parent, settings.folder_permissions)?;
    }

    match create_file(&full_path, settings.file_permissions) {
        Ok(()) => {
            if let Err(err) = set_mode(&full_path, settings.file_permissions) {
                tracing::warn!(
                    path = %full_path.display(),
                    error = %err,
                    "failed to set permissions on the log file"
                );
            }
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(source) => {
            return Err(LogFileError::File {
                path: full_path,
                source,
            })
        }
    }
    Ok(full_path)
}

#[cfg(unix)]
fn create_dir(dir: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    DirBuilder::new().mode(mode).create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &Path, _mode: u32) -> io::Result<()> {
    DirBuilder::new().create(dir)
}

#[cfg(unix)]
fn create_file(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new().write(true).create_new(true).mode(mode).open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_file(path: &Path, _mode: u32) -> io::Result<()> {
    OpenOptions::new().write(true).create_new(true).open(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
