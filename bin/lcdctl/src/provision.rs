//! ---
//! lcd_section: "04-operator-interface"
//! lcd_subsection: "binary"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Provision command and reboot confirmation."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::io::{self, IsTerminal, Write};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use lcd_core::{Deployment, HardwareOutcome, ProvisionReport, RebootRequirement};
use lcd_logging::{log_system_event, LogContext, SystemEventOutcome};

use crate::OutputFormat;

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Reboot without asking when the boot configuration changed.
    #[arg(long, conflicts_with = "no_reboot")]
    yes: bool,

    /// Never reboot; only report that one is required.
    #[arg(long = "no-reboot")]
    no_reboot: bool,
}

pub fn run(deployment: &Deployment, args: ProvisionArgs, output: OutputFormat) -> Result<()> {
    let report = deployment
        .provision()
        .context("provisioning aborted; rerun after fixing the error above")?;

    match output {
        OutputFormat::Json => crate::print_json(&report)?,
        OutputFormat::Text => render(&report),
    }

    let RebootRequirement::Required { reason } = &report.reboot else {
        return Ok(());
    };
    let confirmed = if args.no_reboot {
        false
    } else if args.yes {
        true
    } else if io::stdin().is_terminal() {
        prompt_yes_no(&format!("Reboot required ({reason}). Reboot now?"), false)?
    } else {
        false
    };

    let ctx = LogContext::new()
        .with_unit(&deployment.config().service.unit)
        .with_stage("reboot");
    if confirmed {
        log_system_event(
            Some(&ctx),
            "provision.reboot",
            "operator confirmed reboot",
            SystemEventOutcome::Success,
        );
        deployment.reboot().context("failed to reboot host")?;
    } else {
        log_system_event(
            Some(&ctx),
            "provision.reboot",
            reason,
            SystemEventOutcome::Degraded,
        );
        eprintln!("Reboot pending: {reason}. Reboot the device before relying on the serial interface.");
    }
    Ok(())
}

fn render(report: &ProvisionReport) {
    for record in &report.steps {
        let marker = if record.changed { "changed" } else { "ok" };
        println!("{:<17} {:<8} {}", record.step, marker, record.detail);
    }
    match &report.hardware {
        HardwareOutcome::Skipped => println!("Hardware overlay: disabled in configuration"),
        HardwareOutcome::AlreadyEnabled => println!("Hardware overlay: already enabled"),
        HardwareOutcome::Enabled => println!("Hardware overlay: enabled (takes effect after reboot)"),
        HardwareOutcome::Failed { reason } => println!("Hardware overlay: FAILED ({reason})"),
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    match &report.service {
        Some(status) => println!("Service: {status}"),
        None => println!("Service: status unavailable"),
    }
}

fn prompt_yes_no(prompt: &str, default: bool) -> Result<bool> {
    loop {
        let suffix = if default { "[Y/n]" } else { "[y/N]" };
        print!("{prompt} {suffix}: ");
        io::stdout()
            .flush()
            .context("failed to flush prompt to stdout")?;

        let mut input = String::new();
        let read = io::stdin()
            .read_line(&mut input)
            .context("failed to read response from stdin")?;
        if read == 0 {
            return Err(anyhow!("input stream closed"));
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(default);
        }
        match trimmed.to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please enter 'y' or 'n'."),
        }
    }
}
