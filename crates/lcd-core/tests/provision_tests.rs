//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Provisioning orchestrator idempotence and failure handling."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lcd_core::deps::{BootConfig, DependencyReconciler, PackageInstaller, ReconcileOutcome};
use lcd_core::error::{DeployError, ReconcileError, ServiceError, SyncError};
use lcd_core::exec::ScriptedRunner;
use lcd_core::provision::{
    HardwareOutcome, ProvisionOrchestrator, ProvisionPlan, ProvisionStep, RebootRequirement,
};
use lcd_core::service::SystemdController;
use lcd_core::sync::{CheckoutOutcome, CommitHash, ProbeReport, SourceSynchronizer, SyncReport};
use tempfile::{tempdir, TempDir};

const DESCRIPTOR: &str = "\
[Unit]
Description=Lidar counter

[Service]
User=admin
WorkingDirectory=/home/admin/ShowMonLidarCounter
ExecStart=/home/admin/ShowMonLidarCounter/venv/bin/python app.py

[Install]
WantedBy=multi-user.target
";

/// Clones by materializing a checkout with the shipped descriptor.
struct CloningSource {
    dir: PathBuf,
    ship_descriptor: bool,
    clones: Cell<u32>,
    clone_packages: Vec<String>,
}

impl SourceSynchronizer for CloningSource {
    fn checkpoint(&self) -> Result<CommitHash, SyncError> {
        Ok(CommitHash::new("c0ffee"))
    }

    fn probe(&self) -> Result<ProbeReport, SyncError> {
        unreachable!("provisioning never probes")
    }

    fn sync(&self) -> Result<SyncReport, SyncError> {
        unreachable!("provisioning never syncs")
    }

    fn ensure_checkout(&self, url: Option<&str>) -> Result<CheckoutOutcome, SyncError> {
        if self.dir.join(".git").exists() {
            return Ok(CheckoutOutcome::Existing);
        }
        if url.is_none() {
            return Err(SyncError::NoCloneSource {
                dir: self.dir.clone(),
            });
        }
        self.clones.set(self.clones.get() + 1);
        fs::create_dir_all(self.dir.join(".git")).unwrap();
        fs::write(self.dir.join("requirements.txt"), "pyserial\n").unwrap();
        if self.ship_descriptor {
            fs::write(self.dir.join("LidarCounter.service"), DESCRIPTOR).unwrap();
        }
        Ok(CheckoutOutcome::Cloned {
            commit: CommitHash::new("c0ffee"),
        })
    }

    fn checkout_packages(&self) -> Vec<String> {
        if self.dir.join(".git").exists() {
            Vec::new()
        } else {
            self.clone_packages.clone()
        }
    }

    fn reference(&self) -> String {
        "origin/main".to_owned()
    }
}

#[derive(Default)]
struct FakePackages {
    installed: RefCell<Vec<String>>,
}

impl PackageInstaller for FakePackages {
    fn ensure_installed(&self, packages: &[String]) -> Result<Vec<String>, ReconcileError> {
        let mut installed = self.installed.borrow_mut();
        let missing: Vec<String> = packages
            .iter()
            .filter(|p| !installed.contains(p))
            .cloned()
            .collect();
        installed.extend(missing.iter().cloned());
        Ok(missing)
    }
}

#[derive(Default)]
struct FakeDeps {
    environment: Cell<bool>,
    digest: RefCell<Option<String>>,
}

impl DependencyReconciler for FakeDeps {
    fn ensure_environment(&self) -> Result<bool, ReconcileError> {
        Ok(!self.environment.replace(true))
    }

    fn reconcile(&self, declaration: &Path) -> Result<ReconcileOutcome, ReconcileError> {
        let digest = fs::read_to_string(declaration).map_err(|source| ReconcileError::Io {
            path: declaration.to_path_buf(),
            source,
        })?;
        let previous = self.digest.replace(Some(digest.clone()));
        if previous.as_deref() == Some(digest.as_str()) {
            Ok(ReconcileOutcome::UpToDate { digest })
        } else {
            Ok(ReconcileOutcome::Installed { digest })
        }
    }
}

struct Device {
    root: TempDir,
    runner: Arc<ScriptedRunner>,
    source: CloningSource,
    packages: FakePackages,
    deps: FakeDeps,
    service: SystemdController,
}

impl Device {
    fn bare() -> Self {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("boot")).unwrap();
        fs::create_dir(root.path().join("units")).unwrap();
        fs::write(
            root.path().join("boot").join("armbianEnv.txt"),
            "verbosity=1\noverlays=i2c0\n",
        )
        .unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "systemctl show",
            lcd_core::exec::CommandOutput::success(
                "ActiveState=active\nSubState=running\nMainPID=421\nExecMainStatus=0\nResult=success\n",
            ),
        );
        let source = CloningSource {
            dir: root.path().join("LidarCounter"),
            ship_descriptor: true,
            clones: Cell::new(0),
            clone_packages: Vec::new(),
        };
        let service = SystemdController::new(
            runner.clone(),
            "LidarCounter.service",
            root.path().join("units"),
        );
        Self {
            root,
            runner,
            source,
            packages: FakePackages::default(),
            deps: FakeDeps::default(),
            service,
        }
    }

    fn managed(&self) -> PathBuf {
        self.root.path().join("LidarCounter")
    }

    fn boot(&self) -> BootConfig {
        BootConfig::new(
            self.root.path().join("boot").join("armbianEnv.txt"),
            "overlays",
            "uart5",
        )
    }

    fn boot_contents(&self) -> String {
        fs::read_to_string(self.root.path().join("boot").join("armbianEnv.txt")).unwrap()
    }

    fn plan(&self) -> ProvisionPlan {
        ProvisionPlan {
            managed_dir: self.managed(),
            clone_url: Some("https://example.invalid/LidarCounter.git".into()),
            descriptor_path: self.managed().join("LidarCounter.service"),
            unit: "LidarCounter.service".into(),
            run_as: "root".into(),
            template_root: "/home/admin/ShowMonLidarCounter".into(),
            system_packages: vec!["git".into(), "python3-venv".into()],
            declaration: self.managed().join("requirements.txt"),
        }
    }

    fn orchestrator(&self) -> ProvisionOrchestrator<'_> {
        ProvisionOrchestrator::new(&self.source, &self.packages, &self.deps, &self.service)
    }
}

#[test]
fn bare_device_is_brought_to_running_service() {
    let device = Device::bare();
    let boot = device.boot();

    let report = device
        .orchestrator()
        .with_overlay(&boot)
        .run(&device.plan())
        .unwrap();

    let steps: Vec<_> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(
        steps,
        vec![
            ProvisionStep::Directory,
            ProvisionStep::Checkout,
            ProvisionStep::Descriptor,
            ProvisionStep::HardwareOverlay,
            ProvisionStep::SystemPackages,
            ProvisionStep::Environment,
            ProvisionStep::Dependencies,
            ProvisionStep::Register,
            ProvisionStep::Start,
        ]
    );
    assert_eq!(report.hardware, HardwareOutcome::Enabled);
    assert!(report.reboot.is_required());
    assert_eq!(device.boot_contents(), "verbosity=1\noverlays=i2c0 uart5\n");

    let unit = fs::read_to_string(device.root.path().join("units").join("LidarCounter.service"))
        .unwrap();
    assert!(unit.contains("User=root"));
    assert!(unit.contains(&format!(
        "WorkingDirectory={}",
        device.managed().display()
    )));
    assert!(!unit.contains("ShowMonLidarCounter"));
    assert_eq!(
        device.runner.calls(),
        vec![
            "systemctl daemon-reload",
            "systemctl enable LidarCounter.service",
            "systemctl start LidarCounter.service",
            "systemctl show LidarCounter.service --property=ActiveState,SubState,MainPID,ExecMainStatus,Result",
        ]
    );
    assert!(report.service.unwrap().running());
}

#[test]
fn second_provisioning_changes_nothing_and_keeps_one_overlay_token() {
    let device = Device::bare();
    let boot = device.boot();
    device
        .orchestrator()
        .with_overlay(&boot)
        .run(&device.plan())
        .unwrap();

    let again = device
        .orchestrator()
        .with_overlay(&boot)
        .run(&device.plan())
        .unwrap();

    assert_eq!(again.hardware, HardwareOutcome::AlreadyEnabled);
    assert_eq!(again.reboot, RebootRequirement::NotRequired);
    assert_eq!(again.changed_steps(), vec![ProvisionStep::Start]);
    assert_eq!(device.source.clones.get(), 1);
    assert_eq!(device.boot_contents().matches("uart5").count(), 1);
    assert_eq!(
        again.step(ProvisionStep::Directory).unwrap().detail,
        "already present"
    );
}

#[test]
fn clone_tooling_is_installed_before_checkout() {
    let mut device = Device::bare();
    device.source.clone_packages = vec!["git".into()];

    let report = device.orchestrator().run(&device.plan()).unwrap();

    assert_eq!(*device.packages.installed.borrow(), vec!["git", "python3-venv"]);
    let checkout = report.step(ProvisionStep::Checkout).unwrap();
    assert!(checkout.changed);
    assert!(checkout.detail.starts_with("installed git; cloned at"), "{}", checkout.detail);
    assert_eq!(
        report.step(ProvisionStep::SystemPackages).unwrap().detail,
        "installed python3-venv"
    );

    let again = device.orchestrator().run(&device.plan()).unwrap();
    assert_eq!(
        again.step(ProvisionStep::Checkout).unwrap().detail,
        "existing checkout"
    );
}

#[test]
fn missing_descriptor_aborts_before_device_changes() {
    let mut device = Device::bare();
    device.source.ship_descriptor = false;
    let boot = device.boot();
    let before = device.boot_contents();

    let err = device
        .orchestrator()
        .with_overlay(&boot)
        .run(&device.plan())
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::Service(ServiceError::MissingDescriptor(_))
    ));
    assert_eq!(device.boot_contents(), before);
    assert!(device.packages.installed.borrow().is_empty());
    assert!(device.runner.calls().is_empty());
}

#[test]
fn overlay_failure_defers_to_reboot_and_continues() {
    let device = Device::bare();
    let broken = BootConfig::new(
        device.root.path().join("missing").join("armbianEnv.txt"),
        "overlays",
        "uart5",
    );

    let report = device
        .orchestrator()
        .with_overlay(&broken)
        .run(&device.plan())
        .unwrap();

    assert!(matches!(report.hardware, HardwareOutcome::Failed { .. }));
    match &report.reboot {
        RebootRequirement::Required { reason } => assert!(reason.contains("verify manually")),
        other => panic!("expected reboot requirement, got {other:?}"),
    }
    assert!(report.step(ProvisionStep::Start).is_some());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn disabled_hardware_is_skipped() {
    let device = Device::bare();
    let before = device.boot_contents();
    let report = device.orchestrator().run(&device.plan()).unwrap();
    assert_eq!(report.hardware, HardwareOutcome::Skipped);
    assert!(!report.reboot.is_required());
    assert_eq!(device.boot_contents(), before);
}

#[test]
fn bare_device_without_clone_url_is_fatal() {
    let device = Device::bare();
    let mut plan = device.plan();
    plan.clone_url = None;
    let err = device.orchestrator().run(&plan).unwrap_err();
    assert!(matches!(err, DeployError::Sync(SyncError::NoCloneSource { .. })));
    assert!(device.managed().is_dir());
}
