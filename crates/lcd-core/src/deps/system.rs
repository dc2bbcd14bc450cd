//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "System package installation for provisioning."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{CommandError, ReconcileError};
use crate::exec::{run_checked, CommandRunner, CommandSpec};

pub trait PackageInstaller {
    /// Install whichever of `packages` are missing. Returns the names installed.
    fn ensure_installed(&self, packages: &[String]) -> Result<Vec<String>, ReconcileError>;
}

/// [`PackageInstaller`] for Debian-family images (`dpkg-query` + `apt-get`).
#[derive(Clone)]
pub struct AptPackages {
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for AptPackages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AptPackages").finish_non_exhaustive()
    }
}

impl AptPackages {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Packages from `packages` that dpkg does not report as installed.
    pub fn missing(&self, packages: &[String]) -> Result<Vec<String>, ReconcileError> {
        let mut missing = Vec::new();
        for package in packages {
            let query = CommandSpec::new("dpkg-query")
                .args(["-W", "-f=${Status}"])
                .arg(package);
            // dpkg-query exits non-zero for unknown packages; only a spawn failure is an error.
            let output = self.runner.run(&query).map_err(|source| {
                ReconcileError::SystemQuery(CommandError::Spawn {
                    command: query.to_string(),
                    source,
                })
            })?;
            if output.succeeded() && output.stdout.contains("install ok installed") {
                debug!(package = %package, "system package present");
            } else {
                missing.push(package.clone());
            }
        }
        Ok(missing)
    }

    fn apt(&self) -> CommandSpec {
        CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
    }
}

impl PackageInstaller for AptPackages {
    fn ensure_installed(&self, packages: &[String]) -> Result<Vec<String>, ReconcileError> {
        let missing = self.missing(packages)?;
        if missing.is_empty() {
            debug!("all system packages present");
            return Ok(missing);
        }
        run_checked(self.runner.as_ref(), &self.apt().arg("update"))
            .map_err(ReconcileError::SystemInstall)?;
        run_checked(
            self.runner.as_ref(),
            &self
                .apt()
                .args(["install", "-y", "--no-install-recommends"])
                .args(missing.iter().cloned()),
        )
        .map_err(ReconcileError::SystemInstall)?;
        info!(packages = %missing.join(" "), "system packages installed");
        Ok(missing)
    }
}
