//! Staged Configuration Artifacts
//!
//! The tunnel engine reads its configuration from a file. Each connect
//! attempt writes the text into a fresh private directory:
//!
//! ```text
//! <staging root>/wgkit-XXXXXX/wg0.conf
//! ```
//!
//! The random directory keeps paths unique across attempts, while the file
//! name stays equal to the interface name (`wg-quick` derives the interface
//! from it). The file is created `0600` on unix since it holds a private key.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A configuration file on disk, removed on `remove()` or drop
#[derive(Debug)]
pub struct StagedArtifact {
    dir: Option<TempDir>,
    dir_path: PathBuf,
    path: PathBuf,
}

impl StagedArtifact {
    /// Write `contents` to `<root>/wgkit-XXXXXX/<interface>.conf`
    pub fn stage(root: &Path, interface: &str, contents: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("wgkit-").tempdir_in(root)?;
        let path = dir.path().join(format!("{}.conf", interface));

        let mut file = create_private(&path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;

        info!("Config staged at: {}", path.display());

        Ok(Self {
            dir_path: dir.path().to_path_buf(),
            dir: Some(dir),
            path,
        })
    }

    /// Path of the configuration file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that holds the file; removing it removes everything staged
    pub fn dir(&self) -> &Path {
        &self.dir_path
    }

    /// Delete the file and its directory
    pub fn remove(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                let result = dir.close();
                if result.is_ok() {
                    info!("Cleaned up config: {}", self.path.display());
                }
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            debug!("Removing staged config on drop: {}", self.path.display());
            // A panic hook may already have removed it
            let _ = dir.close();
        }
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
