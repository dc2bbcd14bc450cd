//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Wiring of concrete components from the deployment configuration."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lcd_common::DeployConfig;
use tracing::{info, warn};

use crate::deps::{AptPackages, BootConfig, PipReconciler};
use crate::error::DeployError;
use crate::exec::{CommandRunner, SystemRunner};
use crate::lock::DirectoryLock;
use crate::metrics::RunMetrics;
use crate::provision::{ensure_directory, ProvisionOrchestrator, ProvisionPlan, ProvisionReport};
use crate::service::{ServiceController, ServiceStatus, SystemdController};
use crate::sync::{GitSynchronizer, ProbeReport, SourceSynchronizer};
use crate::update::{UpdateOrchestrator, UpdatePlan, UpdateReport};
use crate::vault::FsStateVault;

/// A device deployment described by one [`DeployConfig`].
pub struct Deployment {
    config: DeployConfig,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("managed_dir", &self.config.device.managed_dir)
            .field("unit", &self.config.service.unit)
            .finish_non_exhaustive()
    }
}

impl Deployment {
    /// Deployment that runs real programs on the host.
    pub fn from_config(config: DeployConfig) -> Self {
        Self::new(config, Arc::new(SystemRunner))
    }

    pub fn new(config: DeployConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    fn synchronizer(&self) -> GitSynchronizer {
        GitSynchronizer::new(
            self.runner.clone(),
            &self.config.device.managed_dir,
            &self.config.source.remote,
            &self.config.source.branch,
        )
    }

    fn controller(&self) -> SystemdController {
        SystemdController::new(
            self.runner.clone(),
            &self.config.service.unit,
            &self.config.service.unit_dir,
        )
    }

    fn reconciler(&self) -> PipReconciler {
        PipReconciler::new(
            self.runner.clone(),
            &self.config.runtime.python,
            self.config.venv_path(),
        )
    }

    fn lock_existing(&self) -> Result<DirectoryLock, DeployError> {
        let dir = &self.config.device.managed_dir;
        if !dir.is_dir() {
            return Err(DeployError::MissingManagedDir(dir.clone()));
        }
        Ok(DirectoryLock::acquire(dir)?)
    }

    /// Fetch and report whether the remote reference moved. Leaves the tree alone.
    pub fn check(&self) -> Result<ProbeReport, DeployError> {
        let _lock = self.lock_existing()?;
        let source = self.synchronizer();
        source.checkpoint()?;
        Ok(source.probe()?)
    }

    /// Run the update orchestrator under the managed-directory lock.
    pub fn update(&self, if_changed: bool) -> Result<UpdateReport, DeployError> {
        let clock = Instant::now();
        let result = self.lock_existing().map(|_lock| {
            let vault =
                FsStateVault::new(&self.config.device.managed_dir, &self.config.state.backup_dir);
            let source = self.synchronizer();
            let deps = self.reconciler();
            let service = self.controller();
            let plan = UpdatePlan {
                state_files: self.config.state.files.clone(),
                declaration: self.config.declaration_path(),
                if_changed,
            };
            UpdateOrchestrator::new(&vault, &source, &deps, &service, &self.config.service.unit)
                .run(&plan)
        });
        match &result {
            Ok(report) => self.export(
                "update",
                report.state.as_str(),
                report.succeeded(),
                report.duration_ms,
            ),
            Err(_) => self.export("update", "failed", false, elapsed_ms(clock)),
        }
        result
    }

    /// Bring a bare or partially provisioned device to a running service.
    pub fn provision(&self) -> Result<ProvisionReport, DeployError> {
        let clock = Instant::now();
        let result = self.provision_locked();
        let (state, success) = match &result {
            Ok(_) => ("provisioned", true),
            Err(_) => ("failed", false),
        };
        self.export("provision", state, success, elapsed_ms(clock));
        result
    }

    fn provision_locked(&self) -> Result<ProvisionReport, DeployError> {
        let dir = &self.config.device.managed_dir;
        ensure_directory(dir)?;
        let _lock = DirectoryLock::acquire(dir)?;

        let source = self.synchronizer();
        let packages = AptPackages::new(self.runner.clone());
        let deps = self.reconciler();
        let service = self.controller();
        let boot = BootConfig::new(
            &self.config.hardware.boot_config,
            &self.config.hardware.overlay_key,
            &self.config.hardware.overlay_token,
        );

        let plan = ProvisionPlan {
            managed_dir: dir.clone(),
            clone_url: self.config.source.url.clone(),
            descriptor_path: self.config.descriptor_path(),
            unit: self.config.service.unit.clone(),
            run_as: self.config.device.run_as.clone(),
            template_root: self.config.service.template_root.clone(),
            system_packages: self.config.runtime.system_packages.clone(),
            declaration: self.config.declaration_path(),
        };
        let mut orchestrator = ProvisionOrchestrator::new(&source, &packages, &deps, &service);
        if self.config.hardware.enabled {
            orchestrator = orchestrator.with_overlay(&boot);
        }
        orchestrator.run(&plan)
    }

    pub fn status(&self) -> Result<ServiceStatus, DeployError> {
        Ok(self.controller().status()?)
    }

    /// Reboot the host. Callers must have the operator's confirmation.
    pub fn reboot(&self) -> Result<(), DeployError> {
        Ok(self.controller().reboot_host()?)
    }

    fn export(&self, kind: &'static str, state: &str, success: bool, duration_ms: u64) {
        let Some(dir) = &self.config.metrics.textfile_dir else {
            return;
        };
        let written = RunMetrics::new(kind).and_then(|metrics| {
            metrics.record(state, success, duration_ms, Utc::now().timestamp());
            metrics.write_textfile(dir)
        });
        match written {
            Ok(path) => info!(path = %path.display(), kind, "run metrics written"),
            Err(err) => warn!(error = %err, kind, "unable to write run metrics"),
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}
