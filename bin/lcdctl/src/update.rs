//! ---
//! lcd_section: "04-operator-interface"
//! lcd_subsection: "binary"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Update check and apply commands."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use lcd_core::{Deployment, ProbeReport, UpdateReport, UpdateState};

use crate::OutputFormat;

/// Top-level update commands.
#[derive(Debug, Subcommand)]
pub enum UpdateCommand {
    /// Fetch and report whether the remote reference moved, without changing anything.
    Check,
    /// Back up local state, sync to the remote reference, restore, reconcile and restart.
    Apply(ApplyOptions),
}

#[derive(Debug, Args)]
pub struct ApplyOptions {
    /// Do nothing when the remote reference equals the deployed commit.
    #[arg(long = "if-changed")]
    pub if_changed: bool,
}

/// Execute the supplied update command.
pub fn run(deployment: &Deployment, command: UpdateCommand, output: OutputFormat) -> Result<()> {
    match command {
        UpdateCommand::Check => {
            let probe = deployment.check().context("update check failed")?;
            match output {
                OutputFormat::Json => crate::print_json(&probe),
                OutputFormat::Text => {
                    render_probe(&probe);
                    Ok(())
                }
            }
        }
        UpdateCommand::Apply(options) => {
            let report = deployment
                .update(options.if_changed)
                .context("update could not start")?;
            match output {
                OutputFormat::Json => crate::print_json(&report)?,
                OutputFormat::Text => render_report(&report),
            }
            if report.state == UpdateState::Failed {
                bail!(
                    "update failed: {}",
                    report.failure.as_deref().unwrap_or("unknown reason")
                );
            }
            Ok(())
        }
    }
}

fn render_probe(probe: &ProbeReport) {
    println!(
        "Deployed: {}\nRemote ({}): {}\nUpdate Available: {}",
        probe.local.short(),
        probe.reference,
        probe.remote.short(),
        probe.pending()
    );
}

fn render_report(report: &UpdateReport) {
    let path: Vec<&str> = report.history.iter().map(|state| state.as_str()).collect();
    println!("Stages: {}", path.join(" -> "));
    match report.state {
        UpdateState::UpToDate => {
            if let Some(commit) = &report.checkpoint {
                println!("Already up to date at {}", commit.short());
            }
        }
        UpdateState::Verified => {
            if let Some(sync) = &report.sync {
                if sync.changed() {
                    println!("Updated {} -> {}", sync.previous.short(), sync.current.short());
                } else {
                    println!("Re-deployed {}", sync.current.short());
                }
            }
            if !report.restored.is_empty() {
                println!("Restored: {}", report.restored.join(", "));
            }
        }
        _ => {}
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    if let Some(failure) = &report.failure {
        println!("Failed: {failure}");
    }
    match &report.service {
        Some(status) => println!("Service: {status}"),
        None if report.state == UpdateState::Verified => println!("Service: status unavailable"),
        None => {}
    }
}
