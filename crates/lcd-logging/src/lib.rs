//! ---
//! lcd_section: "03-logging"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Structured logging context and lifecycle events."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Lifecycle event helpers shared by the orchestrators and the CLI.

use tracing::Level;

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Init-system unit the run is acting on.
    pub unit: Option<&'a str>,
    /// Orchestrator stage name.
    pub stage: Option<&'a str>,
    /// Source commit associated with the event.
    pub commit: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a unit name.
    pub fn with_unit(mut self, unit: &'a str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Attach a stage name.
    pub fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attach a commit hash.
    pub fn with_commit(mut self, commit: &'a str) -> Self {
        self.commit = Some(commit);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed but the run continues.
    Degraded,
    /// The step failed or the run was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized system event with an outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    // `tracing::event!` needs a constant level, so dispatch per level.
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                unit = ctx.unit.unwrap_or(""),
                stage = ctx.stage.unwrap_or(""),
                commit = ctx.commit.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Degraded => emit!(Level::WARN),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_unit("LidarCounter.service")
            .with_stage("restarting");
        lcd_info!(context = ctx.clone(), "unit restarted");
        lcd_debug!("debug message");
        lcd_error!(context = ctx, "exit status: {}", 3);
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_commit("0123abcd");
        log_system_event(
            Some(&ctx),
            "update.sync",
            "synchronized",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "update.reconcile",
            "pip failed",
            SystemEventOutcome::Degraded,
        );
        log_system_event(None, "update.sync", "fetch failed", SystemEventOutcome::Fault);
    }
}
