//! Working directory shared with Terraform and Ansible.
//!
//! Generated files (`main.tf.json`, `hosts.yml`, `main.yml`) are written
//! here and the external tools run against it. The directory also carries
//! the advisory lock that keeps lifecycle operations from overlapping.

use std::io::{self, Write as _};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// File name of the advisory lock held during deploy and destroy.
pub const LOCK_FILE_NAME: &str = ".skiff.lock";

/// Errors raised while touching the working directory.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkspaceError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when another lifecycle operation holds the lock.
    #[error(
        "another skiff operation is in progress ({holder}); wait for it to finish or remove {path} if it crashed"
    )]
    Locked {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Contents of the lock file describing the holder.
        holder: String,
    },
}

/// Handle on the working directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    /// Creates a handle rooted at `root`. Nothing is touched until a file is
    /// written.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the workspace.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of `file_name` inside the workspace.
    #[must_use]
    pub fn path_of(&self, file_name: &str) -> Utf8PathBuf {
        self.root.join(file_name)
    }

    fn open_dir(&self) -> Result<Dir, WorkspaceError> {
        Dir::open_ambient_dir(&self.root, ambient_authority()).map_err(|err| WorkspaceError::Io {
            path: self.root.clone(),
            message: err.to_string(),
        })
    }

    /// Writes `contents` to `file_name`, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] when the directory cannot be opened or
    /// the file cannot be written.
    pub fn write(&self, file_name: &str, contents: &str) -> Result<Utf8PathBuf, WorkspaceError> {
        let path = self.path_of(file_name);
        self.open_dir()?
            .write(file_name, contents)
            .map_err(|err| WorkspaceError::Io {
                path: path.clone(),
                message: err.to_string(),
            })?;
        Ok(path)
    }

    /// Reads `file_name` as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] when the file cannot be read.
    pub fn read(&self, file_name: &str) -> Result<String, WorkspaceError> {
        self.open_dir()?
            .read_to_string(file_name)
            .map_err(|err| WorkspaceError::Io {
                path: self.path_of(file_name),
                message: err.to_string(),
            })
    }

    /// Takes the advisory lock, failing if another operation holds it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Locked`] when the lock file already exists,
    /// or [`WorkspaceError::Io`] when it cannot be created.
    pub fn lock(&self) -> Result<OperationLock, WorkspaceError> {
        let dir = self.open_dir()?;
        let path = self.path_of(LOCK_FILE_NAME);
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let mut file = match dir.open_with(LOCK_FILE_NAME, &options) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = dir
                    .read_to_string(LOCK_FILE_NAME)
                    .map(|text| text.trim().to_owned())
                    .unwrap_or_else(|_| String::from("unknown holder"));
                return Err(WorkspaceError::Locked { path, holder });
            }
            Err(err) => {
                return Err(WorkspaceError::Io {
                    path,
                    message: err.to_string(),
                });
            }
        };

        writeln!(file, "{}", lock_holder()).map_err(|err| WorkspaceError::Io {
            path: path.clone(),
            message: err.to_string(),
        })?;
        tracing::debug!(%path, "acquired operation lock");
        Ok(OperationLock { dir, path })
    }
}

fn lock_holder() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| String::from("unknown"));
    let since = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    format!("pid {} on {host} since unix time {since}", std::process::id())
}

/// Guard that removes the lock file on drop.
#[derive(Debug)]
pub struct OperationLock {
    dir: Dir,
    path: Utf8PathBuf,
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        if self.dir.remove_file(LOCK_FILE_NAME).is_ok() {
            tracing::debug!(path = %self.path, "released operation lock");
        }
    }
}
