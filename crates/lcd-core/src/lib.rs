//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Deployment and update orchestration for the LidarCounter device."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
//! Components are defined as traits so the orchestrators can run against
//! in-memory fakes; [`Deployment`] wires the host-backed implementations
//! from a [`lcd_common::DeployConfig`].

pub mod deployment;
pub mod deps;
pub mod error;
pub mod exec;
pub mod lock;
pub mod metrics;
pub mod provision;
pub mod service;
pub mod sync;
pub mod update;
pub mod vault;

pub use deployment::Deployment;
pub use deps::{
    AptPackages, BootConfig, DependencyReconciler, HardwareOverlay, OverlayChange,
    PackageInstaller, PipReconciler, ReconcileOutcome,
};
pub use error::{
    CommandError, DeployError, LockError, OverlayError, ReconcileError, ServiceError, SyncError,
    VaultError,
};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ScriptedRunner, SystemRunner};
pub use lock::DirectoryLock;
pub use metrics::RunMetrics;
pub use provision::{
    HardwareOutcome, ProvisionOrchestrator, ProvisionPlan, ProvisionReport, ProvisionStep,
    RebootRequirement,
};
pub use service::{ServiceController, ServiceDescriptor, ServiceStatus, SystemdController};
pub use sync::{
    CheckoutOutcome, CommitHash, GitSynchronizer, ProbeReport, SourceSynchronizer, SyncReport,
};
pub use update::{UpdateOrchestrator, UpdatePlan, UpdateReport, UpdateState};
pub use vault::{BackupSet, FsStateVault, StateVault};
