//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Update orchestrator state machine."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
//! Steady-state update path:
//!
//! ```text
//! Idle -> BackingUp -> Syncing -> Restoring -> Reconciling -> Restarting -> Verified
//!            |            |           |
//!            +------------+-----------+--------------------------------> Failed
//! ```
//!
//! With `if_changed`, a probe runs first and an unchanged remote ends the run
//! in `UpToDate` before anything is backed up.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lcd_logging::{lcd_warn, log_system_event, LogContext, SystemEventOutcome};
use serde::Serialize;

use crate::deps::{DependencyReconciler, ReconcileOutcome};
use crate::error::VaultError;
use crate::service::{ServiceController, ServiceStatus};
use crate::sync::{CommitHash, ProbeReport, SourceSynchronizer, SyncReport};
use crate::vault::{BackupSet, StateVault};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    BackingUp,
    Syncing,
    Restoring,
    Reconciling,
    Restarting,
    Verified,
    Failed,
    /// Remote reference equals the local checkout; nothing was touched.
    UpToDate,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::BackingUp => "backing_up",
            UpdateState::Syncing => "syncing",
            UpdateState::Restoring => "restoring",
            UpdateState::Reconciling => "reconciling",
            UpdateState::Restarting => "restarting",
            UpdateState::Verified => "verified",
            UpdateState::Failed => "failed",
            UpdateState::UpToDate => "up_to_date",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::Verified | UpdateState::Failed | UpdateState::UpToDate
        )
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Inputs for one update run.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub state_files: Vec<String>,
    pub declaration: PathBuf,
    /// Skip the run entirely when the remote has nothing new.
    pub if_changed: bool,
}

/// Everything an update run did, in order.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub state: UpdateState,
    /// States entered, starting with `Idle`.
    pub history: Vec<UpdateState>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub checkpoint: Option<CommitHash>,
    pub probe: Option<ProbeReport>,
    pub backed_up: Vec<String>,
    pub sync: Option<SyncReport>,
    pub restored: Vec<String>,
    pub reconcile: Option<ReconcileOutcome>,
    pub service: Option<ServiceStatus>,
    /// Non-fatal problems, in the order they occurred.
    pub warnings: Vec<String>,
    /// Reason for a `Failed` terminal state.
    pub failure: Option<String>,
}

impl UpdateReport {
    fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            history: vec![UpdateState::Idle],
            started_at: Utc::now(),
            duration_ms: 0,
            checkpoint: None,
            probe: None,
            backed_up: Vec::new(),
            sync: None,
            restored: Vec::new(),
            reconcile: None,
            service: None,
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.state, UpdateState::Verified | UpdateState::UpToDate)
    }

    pub fn visited(&self, state: UpdateState) -> bool {
        self.history.contains(&state)
    }

    fn enter(&mut self, state: UpdateState) {
        self.state = state;
        self.history.push(state);
    }
}

/// Drives one update through the component traits.
///
/// The orchestrator is the only place that decides whether a component
/// failure aborts the run or is carried as a warning.
pub struct UpdateOrchestrator<'a> {
    vault: &'a dyn StateVault,
    source: &'a dyn SourceSynchronizer,
    deps: &'a dyn DependencyReconciler,
    service: &'a dyn ServiceController,
    unit: &'a str,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(
        vault: &'a dyn StateVault,
        source: &'a dyn SourceSynchronizer,
        deps: &'a dyn DependencyReconciler,
        service: &'a dyn ServiceController,
        unit: &'a str,
    ) -> Self {
        Self {
            vault,
            source,
            deps,
            service,
            unit,
        }
    }

    /// Run to a terminal state. Never panics on component failure.
    pub fn run(&self, plan: &UpdatePlan) -> UpdateReport {
        let clock = Instant::now();
        let mut report = UpdateReport::new();
        self.drive(plan, &mut report);
        report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = if report.succeeded() {
            SystemEventOutcome::Success
        } else {
            SystemEventOutcome::Fault
        };
        let commit = report.sync.as_ref().map(|s| s.current.to_string());
        let ctx = self.context(report.state, commit.as_deref());
        log_system_event(
            Some(&ctx),
            "update.finished",
            &format!("update finished in state {}", report.state),
            outcome,
        );
        report
    }

    fn drive(&self, plan: &UpdatePlan, report: &mut UpdateReport) {
        let checkpoint = match self.source.checkpoint() {
            Ok(commit) => commit,
            Err(err) => return self.fail(report, format!("checkpoint: {err}")),
        };
        report.checkpoint = Some(checkpoint.clone());

        if plan.if_changed {
            match self.source.probe() {
                Ok(probe) if !probe.pending() => {
                    report.probe = Some(probe);
                    report.enter(UpdateState::UpToDate);
                    let ctx = self.context(UpdateState::UpToDate, Some(checkpoint.as_str()));
                    log_system_event(
                        Some(&ctx),
                        "update.probe",
                        "remote reference unchanged, nothing to apply",
                        SystemEventOutcome::Success,
                    );
                    return;
                }
                Ok(probe) => report.probe = Some(probe),
                Err(err) => return self.fail(report, format!("probe: {err}")),
            }
        }

        self.transition(report, UpdateState::BackingUp);
        let backup = match self.vault.backup(&plan.state_files) {
            Ok(set) => set,
            Err(err) => return self.fail(report, format!("backup: {err}")),
        };
        report.backed_up = backup.names().into_iter().map(str::to_owned).collect();

        self.transition(report, UpdateState::Syncing);
        match self.source.sync() {
            Ok(sync) => {
                for warning in sync.warnings() {
                    self.warn(report, warning);
                }
                report.sync = Some(sync);
            }
            Err(err) if err.tree_intact() => {
                return self.fail(report, format!("sync: {err}"));
            }
            Err(err) => {
                // A partial reset may have clobbered local state; put it back before failing.
                self.transition(report, UpdateState::Restoring);
                if let Err(restore_err) = self.restore(&backup, report) {
                    self.warn(report, format!("restore after failed reset: {restore_err}"));
                }
                return self.fail(report, format!("sync: {err}"));
            }
        }

        self.transition(report, UpdateState::Restoring);
        if let Err(err) = self.restore(&backup, report) {
            return self.fail(report, format!("restore: {err}"));
        }

        self.transition(report, UpdateState::Reconciling);
        match self.deps.reconcile(&plan.declaration) {
            Ok(outcome) => report.reconcile = Some(outcome),
            Err(err) => self.degrade(report, "update.reconcile", format!("reconcile: {err}")),
        }

        self.transition(report, UpdateState::Restarting);
        if let Err(err) = self.service.restart() {
            self.degrade(report, "update.restart", format!("restart: {err}"));
        }
        match self.service.status() {
            Ok(status) => {
                if !status.running() {
                    self.warn(report, format!("{} is not running: {status}", self.unit));
                }
                report.service = Some(status);
            }
            Err(err) => self.warn(report, format!("status: {err}")),
        }

        self.transition(report, UpdateState::Verified);
    }

    fn restore(
        &self,
        backup: &BackupSet,
        report: &mut UpdateReport,
    ) -> Result<(), VaultError> {
        let restored = self.vault.restore(backup)?;
        report.restored = restored;
        Ok(())
    }

    fn context<'c>(&'c self, state: UpdateState, commit: Option<&'c str>) -> LogContext<'c> {
        let mut ctx = LogContext::new()
            .with_unit(self.unit)
            .with_stage(state.as_str());
        if let Some(commit) = commit {
            ctx = ctx.with_commit(commit);
        }
        ctx
    }

    fn transition(&self, report: &mut UpdateReport, next: UpdateState) {
        let previous = report.state;
        report.enter(next);
        let ctx = self.context(next, None);
        log_system_event(
            Some(&ctx),
            "update.transition",
            &format!("{previous} -> {next}"),
            SystemEventOutcome::Success,
        );
    }

    fn warn(&self, report: &mut UpdateReport, warning: String) {
        lcd_warn!(context = self.context(report.state, None), "{warning}");
        report.warnings.push(warning);
    }

    fn degrade(&self, report: &mut UpdateReport, event: &str, warning: String) {
        let ctx = self.context(report.state, None);
        log_system_event(Some(&ctx), event, &warning, SystemEventOutcome::Degraded);
        report.warnings.push(warning);
    }

    fn fail(&self, report: &mut UpdateReport, reason: String) {
        let ctx = self.context(report.state, None);
        log_system_event(Some(&ctx), "update.failed", &reason, SystemEventOutcome::Fault);
        report.enter(UpdateState::Failed);
        report.failure = Some(reason);
    }
}
