//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Error taxonomy for deployment components."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure running an external program.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("unable to prepare backup directory {path}: {source}")]
    BackupDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to back up {name}: {source}")]
    Backup {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to restore {name} from {backup}: {source}")]
    Restore {
        name: String,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{dir} is not a usable checkout: {reason}")]
    NotACheckpoint { dir: PathBuf, reason: String },
    #[error("fetch from remote failed: {0}")]
    Fetch(#[source] CommandError),
    #[error("reference {reference} cannot be resolved: {detail}")]
    UnknownReference { reference: String, detail: String },
    #[error("reset to {reference} failed, working tree may be partially updated: {source}")]
    Reset {
        reference: String,
        #[source]
        source: CommandError,
    },
    #[error("clone of {url} failed: {source}")]
    Clone {
        url: String,
        #[source]
        source: CommandError,
    },
    #[error("{dir} has no checkout and no clone URL is configured")]
    NoCloneSource { dir: PathBuf },
    #[error("unable to inspect working tree: {0}")]
    Inspect(#[source] CommandError),
}

impl SyncError {
    /// Whether the working tree is known to be untouched after this error.
    pub fn tree_intact(&self) -> bool {
        !matches!(self, SyncError::Reset { .. })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("dependency declaration {0} not found")]
    MissingDeclaration(PathBuf),
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("runtime environment creation failed: {0}")]
    Environment(#[source] CommandError),
    #[error("package manager upgrade failed: {0}")]
    PackageManager(#[source] CommandError),
    #[error("dependency install failed: {0}")]
    Install(#[source] CommandError),
    #[error("system package query failed: {0}")]
    SystemQuery(#[source] CommandError),
    #[error("system package install failed: {0}")]
    SystemInstall(#[source] CommandError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service descriptor {0} not found")]
    MissingDescriptor(PathBuf),
    #[error("unable to read service descriptor {path}: {source}")]
    ReadDescriptor {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to install unit file {path}: {source}")]
    WriteUnit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Systemctl(#[from] CommandError),
}

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("unable to read boot configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to write boot configuration {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another deployment run holds the lock on {0}")]
    Held(PathBuf),
    #[error("unable to lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Fatal errors that abort an orchestrator run before its state machine starts.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("managed directory {0} does not exist")]
    MissingManagedDir(PathBuf),
    #[error("unable to create managed directory {path}: {source}")]
    CreateManagedDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("metrics export failed: {0}")]
    Metrics(String),
}
