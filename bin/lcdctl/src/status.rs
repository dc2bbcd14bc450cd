//! ---
//! lcd_section: "04-operator-interface"
//! lcd_subsection: "binary"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Managed service status command."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use lcd_core::Deployment;

use crate::OutputFormat;

pub fn run(deployment: &Deployment, output: OutputFormat) -> Result<()> {
    let status = deployment
        .status()
        .context("unable to query the managed service")?;
    match output {
        OutputFormat::Json => crate::print_json(&status),
        OutputFormat::Text => {
            println!("{}: {status}", deployment.config().service.unit);
            Ok(())
        }
    }
}
