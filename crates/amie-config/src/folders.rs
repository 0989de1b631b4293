//! The filesystem layout of the delivery pipeline.
//!
//! ```text
//! inbound:   in_folder --rename--> received_folder
//! outbound:  out_folder --rename--> wait_folder | done_folder | out_failed_folder
//! ```
//!
//! A file's directory is its delivery state; nothing else is persisted.

use crate::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Paths of the six pipeline folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folders {
    pub in_folder: PathBuf,
    pub received_folder: PathBuf,
    pub out_folder: PathBuf,
    pub out_failed_folder: PathBuf,
    pub wait_folder: PathBuf,
    pub done_folder: PathBuf,
}

impl Folders {
    /// Lay all six folders out under one base directory.
    pub fn under(base: &Path) -> Self {
        Self {
            in_folder: base.join("in"),
            received_folder: base.join("received"),
            out_folder: base.join("out"),
            out_failed_folder: base.join("out_failed"),
            wait_folder: base.join("wait"),
            done_folder: base.join("done"),
        }
    }

    /// Every folder with its configuration key.
    pub fn named(&self) -> [(&'static str, &Path); 6] {
        [
            ("in_folder", &self.in_folder),
            ("received_folder", &self.received_folder),
            ("out_folder", &self.out_folder),
            ("out_failed_folder", &self.out_failed_folder),
            ("wait_folder", &self.wait_folder),
            ("done_folder", &self.done_folder),
        ]
    }

    /// Check every folder is a directory, creating missing ones when
    /// `create` is set. Returns the folders that were created.
    pub fn ensure(&self, create: bool) -> ConfigResult<Vec<PathBuf>> {
        let mut created = Vec::new();
        for (name, path) in self.named() {
            if path.is_dir() {
                continue;
            }
            if path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "amie.{name} ({}) is not a directory",
                    path.display()
                )));
            }
            if !create {
                return Err(ConfigError::Invalid(format!(
                    "amie.{name} ({}) does not exist",
                    path.display()
                )));
            }
            std::fs::create_dir_all(path)?;
            created.push(path.to_path_buf());
        }
        Ok(created)
    }
}
