//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Backup and restore of device-local state files."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::VaultError;

/// One tracked state file copied out of the managed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub location: PathBuf,
}

/// Files captured by a single [`StateVault::backup`] call.
///
/// Only files that existed at backup time appear here, so a restore never
/// creates a file that was absent before.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupSet {
    entries: Vec<BackupEntry>,
}

impl BackupSet {
    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, location: impl Into<PathBuf>) {
        self.entries.push(BackupEntry {
            name: name.into(),
            location: location.into(),
        });
    }
}

/// Preserves untracked device-local files across a destructive source sync.
pub trait StateVault {
    /// Copy each existing named file out of the managed directory. Missing
    /// files are skipped.
    fn backup(&self, names: &[String]) -> Result<BackupSet, VaultError>;

    /// Copy every backed-up file back, overwriting what the sync left behind.
    /// Returns the names restored.
    fn restore(&self, set: &BackupSet) -> Result<Vec<String>, VaultError>;
}

/// [`StateVault`] keeping one generation of backups in a directory outside the
/// managed tree. A previous run's copies are overwritten.
#[derive(Debug, Clone)]
pub struct FsStateVault {
    managed_dir: PathBuf,
    backup_dir: PathBuf,
}

impl FsStateVault {
    pub fn new(managed_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            managed_dir: managed_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn location(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!("{name}.bak"))
    }
}

impl StateVault for FsStateVault {
    fn backup(&self, names: &[String]) -> Result<BackupSet, VaultError> {
        fs::create_dir_all(&self.backup_dir).map_err(|source| VaultError::BackupDir {
            path: self.backup_dir.clone(),
            source,
        })?;

        let mut set = BackupSet::default();
        for name in names {
            let source_path = self.managed_dir.join(name);
            if !source_path.is_file() {
                if source_path.exists() {
                    warn!(path = %source_path.display(), "tracked state path is not a regular file, skipping");
                } else {
                    debug!(file = %name, "tracked state file absent, nothing to back up");
                }
                continue;
            }
            let location = self.location(name);
            fs::copy(&source_path, &location).map_err(|source| VaultError::Backup {
                name: name.clone(),
                source,
            })?;
            debug!(file = %name, backup = %location.display(), "state file backed up");
            set.push(name.clone(), location);
        }
        Ok(set)
    }

    fn restore(&self, set: &BackupSet) -> Result<Vec<String>, VaultError> {
        let mut restored = Vec::new();
        let mut first_error = None;
        // Keep going after a failure so every other file still gets its local copy back.
        for entry in set.entries() {
            let target = self.managed_dir.join(&entry.name);
            match fs::copy(&entry.location, &target) {
                Ok(_) => {
                    debug!(file = %entry.name, "state file restored");
                    restored.push(entry.name.clone());
                }
                Err(source) => {
                    warn!(file = %entry.name, error = %source, "state file restore failed");
                    if first_error.is_none() {
                        first_error = Some(VaultError::Restore {
                            name: entry.name.clone(),
                            backup: entry.location.clone(),
                            source,
                        });
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(restored),
        }
    }
}
