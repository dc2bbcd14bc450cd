//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "First-time device provisioning sequence."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lcd_logging::{log_system_event, LogContext, SystemEventOutcome};
use serde::Serialize;
use tracing::info;

use crate::deps::{
    DependencyReconciler, HardwareOverlay, OverlayChange, PackageInstaller, ReconcileOutcome,
};
use crate::error::DeployError;
use crate::service::{ServiceController, ServiceDescriptor, ServiceStatus};
use crate::sync::{CheckoutOutcome, SourceSynchronizer};

/// Inputs for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub managed_dir: PathBuf,
    /// Clone source used when the managed directory is not a checkout yet.
    pub clone_url: Option<String>,
    pub descriptor_path: PathBuf,
    pub unit: String,
    pub run_as: String,
    pub template_root: String,
    pub system_packages: Vec<String>,
    pub declaration: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStep {
    Directory,
    Checkout,
    Descriptor,
    HardwareOverlay,
    SystemPackages,
    Environment,
    Dependencies,
    Register,
    Start,
}

impl ProvisionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::Directory => "directory",
            ProvisionStep::Checkout => "checkout",
            ProvisionStep::Descriptor => "descriptor",
            ProvisionStep::HardwareOverlay => "hardware-overlay",
            ProvisionStep::SystemPackages => "system-packages",
            ProvisionStep::Environment => "environment",
            ProvisionStep::Dependencies => "dependencies",
            ProvisionStep::Register => "register",
            ProvisionStep::Start => "start",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One completed step and whether it changed the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: ProvisionStep,
    pub changed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HardwareOutcome {
    /// Hardware enablement is turned off in configuration.
    Skipped,
    AlreadyEnabled,
    Enabled,
    Failed { reason: String },
}

/// Deferred reboot condition handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RebootRequirement {
    NotRequired,
    Required { reason: String },
}

impl RebootRequirement {
    pub fn is_required(&self) -> bool {
        matches!(self, RebootRequirement::Required { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub steps: Vec<StepRecord>,
    pub hardware: HardwareOutcome,
    pub reboot: RebootRequirement,
    pub service: Option<ServiceStatus>,
    pub warnings: Vec<String>,
}

impl ProvisionReport {
    fn record(&mut self, step: ProvisionStep, changed: bool, detail: impl Into<String>) {
        let detail = detail.into();
        let ctx = LogContext::new().with_stage(step.as_str());
        log_system_event(Some(&ctx), "provision.step", &detail, SystemEventOutcome::Success);
        self.steps.push(StepRecord {
            step,
            changed,
            detail,
        });
    }

    pub fn step(&self, step: ProvisionStep) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.step == step)
    }

    pub fn changed_steps(&self) -> Vec<ProvisionStep> {
        self.steps
            .iter()
            .filter(|record| record.changed)
            .map(|record| record.step)
            .collect()
    }
}

/// Create the managed directory when absent. Returns `true` if it was created.
pub fn ensure_directory(dir: &Path) -> Result<bool, DeployError> {
    if dir.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(dir).map_err(|source| DeployError::CreateManagedDir {
        path: dir.to_path_buf(),
        source,
    })?;
    info!(dir = %dir.display(), "managed directory created");
    Ok(true)
}

/// Linear first-time setup. Every step checks before it mutates, so a rerun
/// after a partial failure resumes safely.
pub struct ProvisionOrchestrator<'a> {
    source: &'a dyn SourceSynchronizer,
    packages: &'a dyn PackageInstaller,
    deps: &'a dyn DependencyReconciler,
    service: &'a dyn ServiceController,
    overlay: Option<&'a dyn HardwareOverlay>,
}

impl<'a> ProvisionOrchestrator<'a> {
    pub fn new(
        source: &'a dyn SourceSynchronizer,
        packages: &'a dyn PackageInstaller,
        deps: &'a dyn DependencyReconciler,
        service: &'a dyn ServiceController,
    ) -> Self {
        Self {
            source,
            packages,
            deps,
            service,
            overlay: None,
        }
    }

    /// Enable the hardware interface as part of the run.
    pub fn with_overlay(mut self, overlay: &'a dyn HardwareOverlay) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn run(&self, plan: &ProvisionPlan) -> Result<ProvisionReport, DeployError> {
        let mut report = ProvisionReport {
            steps: Vec::new(),
            hardware: HardwareOutcome::Skipped,
            reboot: RebootRequirement::NotRequired,
            service: None,
            warnings: Vec::new(),
        };

        let result = self.drive(plan, &mut report);
        if let Err(err) = &result {
            let ctx = LogContext::new().with_unit(&plan.unit);
            log_system_event(
                Some(&ctx),
                "provision.failed",
                &err.to_string(),
                SystemEventOutcome::Fault,
            );
        }
        result.map(|()| report)
    }

    fn drive(
        &self,
        plan: &ProvisionPlan,
        report: &mut ProvisionReport,
    ) -> Result<(), DeployError> {
        let created = ensure_directory(&plan.managed_dir)?;
        report.record(
            ProvisionStep::Directory,
            created,
            if created { "created" } else { "already present" },
        );

        // Clone prerequisites go in ahead of the package step.
        let tooling = self.source.checkout_packages();
        let bootstrapped = if tooling.is_empty() {
            Vec::new()
        } else {
            self.packages.ensure_installed(&tooling)?
        };
        let (cloned, mut detail) = match self.source.ensure_checkout(plan.clone_url.as_deref())? {
            CheckoutOutcome::Existing => (false, "existing checkout".to_owned()),
            CheckoutOutcome::Cloned { commit } => (true, format!("cloned at {}", commit.short())),
        };
        if !bootstrapped.is_empty() {
            detail = format!("installed {}; {detail}", bootstrapped.join(" "));
        }
        report.record(
            ProvisionStep::Checkout,
            cloned || !bootstrapped.is_empty(),
            detail,
        );

        // Fatal before the overlay, packages, runtime or unit are touched.
        let descriptor = ServiceDescriptor::load(&plan.descriptor_path, plan.unit.clone())?;
        report.record(
            ProvisionStep::Descriptor,
            false,
            plan.descriptor_path.display().to_string(),
        );

        self.enable_hardware(report);

        let installed = self.packages.ensure_installed(&plan.system_packages)?;
        report.record(
            ProvisionStep::SystemPackages,
            !installed.is_empty(),
            if installed.is_empty() {
                "all present".to_owned()
            } else {
                format!("installed {}", installed.join(" "))
            },
        );

        let created_env = self.deps.ensure_environment()?;
        report.record(
            ProvisionStep::Environment,
            created_env,
            if created_env { "created" } else { "already present" },
        );

        let outcome = self.deps.reconcile(&plan.declaration)?;
        let installed_deps = matches!(outcome, ReconcileOutcome::Installed { .. });
        report.record(
            ProvisionStep::Dependencies,
            installed_deps,
            if installed_deps {
                "installed"
            } else {
                "unchanged declaration"
            },
        );

        let adapted = descriptor.adapt(&plan.managed_dir, &plan.run_as, &plan.template_root);
        let changed = self.service.register(&adapted)?;
        report.record(
            ProvisionStep::Register,
            changed,
            if changed {
                "unit installed and enabled"
            } else {
                "unit unchanged, enabled"
            },
        );

        match self.service.start() {
            Ok(()) => report.record(ProvisionStep::Start, true, "start requested"),
            Err(err) => {
                let warning = format!("start: {err}");
                let ctx = LogContext::new().with_unit(&plan.unit).with_stage("start");
                log_system_event(
                    Some(&ctx),
                    "provision.start",
                    &warning,
                    SystemEventOutcome::Degraded,
                );
                report.warnings.push(warning);
            }
        }
        match self.service.status() {
            Ok(status) => report.service = Some(status),
            Err(err) => report.warnings.push(format!("status: {err}")),
        }
        Ok(())
    }

    fn enable_hardware(&self, report: &mut ProvisionReport) {
        let Some(overlay) = self.overlay else {
            report.record(ProvisionStep::HardwareOverlay, false, "disabled");
            return;
        };
        match overlay.ensure_enabled() {
            Ok(OverlayChange::AlreadyPresent) => {
                report.hardware = HardwareOutcome::AlreadyEnabled;
                report.record(ProvisionStep::HardwareOverlay, false, "already enabled");
            }
            Ok(OverlayChange::Appended) => {
                report.hardware = HardwareOutcome::Enabled;
                report.reboot = RebootRequirement::Required {
                    reason: "hardware overlay added to boot configuration".to_owned(),
                };
                report.record(ProvisionStep::HardwareOverlay, true, "overlay appended");
            }
            Err(err) => {
                let reason = err.to_string();
                let ctx = LogContext::new().with_stage("hardware_overlay");
                log_system_event(
                    Some(&ctx),
                    "provision.overlay",
                    &reason,
                    SystemEventOutcome::Degraded,
                );
                report.reboot = RebootRequirement::Required {
                    reason: format!("hardware overlay state unknown, verify manually: {reason}"),
                };
                report.warnings.push(format!("hardware overlay: {reason}"));
                report.hardware = HardwareOutcome::Failed { reason };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_directory_tolerates_existing() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("LidarCounter");
        assert!(ensure_directory(&dir).unwrap());
        assert!(!ensure_directory(&dir).unwrap());
    }

    #[test]
    fn reboot_requirement_flags() {
        assert!(!RebootRequirement::NotRequired.is_required());
        assert!(RebootRequirement::Required {
            reason: "overlay".into()
        }
        .is_required());
    }

    #[test]
    fn step_names_are_kebab_case() {
        assert_eq!(ProvisionStep::HardwareOverlay.to_string(), "hardware-overlay");
        let json = serde_json::to_string(&ProvisionStep::SystemPackages).unwrap();
        assert_eq!(json, "\"system-packages\"");
    }
}
