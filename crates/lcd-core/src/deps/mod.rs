//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Runtime dependency reconciliation."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
//! Keeps the service's isolated Python environment in line with the
//! declaration shipped in the source tree. System packages and the hardware
//! overlay, only touched at provisioning time, live in [`system`] and
//! [`overlay`].

pub mod overlay;
pub mod system;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::exec::{run_checked, CommandRunner, CommandSpec};

pub use overlay::{BootConfig, HardwareOverlay, OverlayChange};
pub use system::{AptPackages, PackageInstaller};

/// Name of the digest stamp written inside the environment after a full install.
pub const STAMP_FILE: &str = ".lcd-declaration.sha256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReconcileOutcome {
    /// Declaration unchanged since the last install; nothing was run.
    UpToDate { digest: String },
    Installed { digest: String },
}

pub trait DependencyReconciler {
    /// Create the isolated environment when absent. Returns `true` if it was created.
    fn ensure_environment(&self) -> Result<bool, ReconcileError>;

    /// Install exactly what `declaration` lists into the environment.
    fn reconcile(&self, declaration: &Path) -> Result<ReconcileOutcome, ReconcileError>;
}

/// [`DependencyReconciler`] for a `venv` managed with `pip`.
///
/// A successful install records the declaration digest in the environment;
/// a later run with the same digest returns without invoking pip.
#[derive(Clone)]
pub struct PipReconciler {
    runner: Arc<dyn CommandRunner>,
    python: String,
    venv: PathBuf,
}

impl fmt::Debug for PipReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipReconciler")
            .field("python", &self.python)
            .field("venv", &self.venv)
            .finish()
    }
}

impl PipReconciler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        python: impl Into<String>,
        venv: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            python: python.into(),
            venv: venv.into(),
        }
    }

    pub fn interpreter(&self) -> PathBuf {
        self.venv.join("bin").join("python")
    }

    fn stamp_path(&self) -> PathBuf {
        self.venv.join(STAMP_FILE)
    }

    fn recorded_digest(&self) -> Option<String> {
        fs::read_to_string(self.stamp_path())
            .ok()
            .map(|raw| raw.trim().to_owned())
    }

    fn pip(&self) -> CommandSpec {
        CommandSpec::new(self.interpreter().display().to_string()).args(["-m", "pip"])
    }
}

impl DependencyReconciler for PipReconciler {
    fn ensure_environment(&self) -> Result<bool, ReconcileError> {
        if self.interpreter().exists() {
            debug!(venv = %self.venv.display(), "runtime environment present");
            return Ok(false);
        }
        let create = CommandSpec::new(&self.python)
            .args(["-m", "venv"])
            .path_arg(&self.venv);
        run_checked(self.runner.as_ref(), &create).map_err(ReconcileError::Environment)?;
        info!(venv = %self.venv.display(), "runtime environment created");
        Ok(true)
    }

    fn reconcile(&self, declaration: &Path) -> Result<ReconcileOutcome, ReconcileError> {
        if !declaration.is_file() {
            return Err(ReconcileError::MissingDeclaration(declaration.to_path_buf()));
        }
        let digest = file_digest(declaration)?;
        let recorded = self.recorded_digest();
        if self.interpreter().exists() && recorded.as_deref() == Some(digest.as_str()) {
            debug!(declaration = %declaration.display(), "dependencies already reconciled");
            return Ok(ReconcileOutcome::UpToDate { digest });
        }

        self.ensure_environment()?;
        run_checked(
            self.runner.as_ref(),
            &self.pip().args(["install", "--upgrade", "pip"]),
        )
        .map_err(ReconcileError::PackageManager)?;
        run_checked(
            self.runner.as_ref(),
            &self.pip().args(["install", "-r"]).path_arg(declaration),
        )
        .map_err(ReconcileError::Install)?;

        let stamp = self.stamp_path();
        fs::write(&stamp, format!("{digest}\n")).map_err(|source| ReconcileError::Io {
            path: stamp.clone(),
            source,
        })?;
        info!(declaration = %declaration.display(), digest = %&digest[..12], "dependencies installed");
        Ok(ReconcileOutcome::Installed { digest })
    }
}

fn file_digest(path: &Path) -> Result<String, ReconcileError> {
    let bytes = fs::read(path).map_err(|source| ReconcileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
