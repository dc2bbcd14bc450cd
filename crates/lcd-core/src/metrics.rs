//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Run metrics exported for the node-exporter textfile collector."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::DeployError;

/// Gauges describing the most recent orchestrator run of one kind.
///
/// Each invocation is a short-lived process, so every value describes the
/// last run only; the textfile collector keeps the history.
#[derive(Clone)]
pub struct RunMetrics {
    kind: &'static str,
    last_timestamp: GaugeVec,
    last_success: IntGaugeVec,
    last_duration: GaugeVec,
    terminal_state: IntGaugeVec,
    registry: Registry,
}

impl RunMetrics {
    /// `kind` labels the run, e.g. `update` or `provision`.
    pub fn new(kind: &'static str) -> Result<Self, DeployError> {
        let registry = Registry::new();

        let last_timestamp = GaugeVec::new(
            Opts::new(
                "lcd_run_last_timestamp_seconds",
                "Unix time at which the last run finished",
            ),
            &["kind"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(last_timestamp.clone()))
            .map_err(metrics_err)?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "lcd_run_last_success",
                "1 when the last run reached a successful terminal state",
            ),
            &["kind"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(last_success.clone()))
            .map_err(metrics_err)?;

        let last_duration = GaugeVec::new(
            Opts::new("lcd_run_duration_seconds", "Wall time of the last run"),
            &["kind"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(last_duration.clone()))
            .map_err(metrics_err)?;

        let terminal_state = IntGaugeVec::new(
            Opts::new(
                "lcd_run_terminal_state",
                "Terminal state of the last run, one series per state set to 1",
            ),
            &["kind", "state"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(terminal_state.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            kind,
            last_timestamp,
            last_success,
            last_duration,
            terminal_state,
            registry,
        })
    }

    pub fn record(&self, state: &str, success: bool, duration_ms: u64, finished_unix: i64) {
        let kind = self.kind;
        self.last_timestamp
            .with_label_values(&[kind])
            .set(finished_unix as f64);
        self.last_success
            .with_label_values(&[kind])
            .set(i64::from(success));
        self.last_duration
            .with_label_values(&[kind])
            .set(duration_ms as f64 / 1000.0);
        self.terminal_state
            .with_label_values(&[kind, state])
            .set(1);
    }

    /// Prometheus text exposition of every registered series.
    pub fn render(&self) -> Result<String, DeployError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        String::from_utf8(buffer).map_err(metrics_err)
    }

    /// Write `lcd_<kind>.prom` into `dir`, replacing it atomically so the
    /// collector never reads a partial file.
    pub fn write_textfile(&self, dir: &Path) -> Result<PathBuf, DeployError> {
        let body = self.render()?;
        fs::create_dir_all(dir).map_err(metrics_err)?;
        let target = dir.join(format!("lcd_{}.prom", self.kind));
        let staging = dir.join(format!(".lcd_{}.prom.tmp", self.kind));
        fs::write(&staging, body).map_err(metrics_err)?;
        fs::rename(&staging, &target).map_err(metrics_err)?;
        Ok(target)
    }
}

impl std::fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunMetrics")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn metrics_err(err: impl std::fmt::Display) -> DeployError {
    DeployError::Metrics(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_last_run() {
        let metrics = RunMetrics::new("update").unwrap();
        metrics.record("verified", true, 2500, 1_760_000_000);
        let text = metrics.render().unwrap();
        assert!(text.contains("lcd_run_last_success{kind=\"update\"} 1"), "{text}");
        assert!(text.contains("lcd_run_duration_seconds{kind=\"update\"} 2.5"), "{text}");
        assert!(
            text.contains("lcd_run_terminal_state{kind=\"update\",state=\"verified\"} 1"),
            "{text}"
        );
    }

    #[test]
    fn textfile_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = RunMetrics::new("provision").unwrap();
        metrics.record("failed", false, 10, 1_760_000_000);
        let path = metrics.write_textfile(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("lcd_provision.prom"));
        metrics.write_textfile(dir.path()).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(fs::read_to_string(path)
            .unwrap()
            .contains("lcd_run_last_success{kind=\"provision\"} 0"));
    }
}
