//! ---
//! lcd_section: "04-operator-interface"
//! lcd_subsection: "binary"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Operator CLI for provisioning and updating the device."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use lcd_common::{
    init_tracing, DeployConfig, LoadedDeployConfig, VersionInfo, DEFAULT_CONFIG_PATH,
};
use lcd_core::Deployment;
use lcd_logging::lcd_debug;

mod provision;
mod status;
mod update;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "LidarCounter deployment control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    /// Configuration file (LCD_CONFIG takes precedence when set).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format for command results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "First-time device setup")]
    Provision(provision::ProvisionArgs),
    #[command(subcommand, about = "Update the deployed source and restart the service")]
    Update(update::UpdateCommand),
    #[command(about = "Show the managed service status")]
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    let Some(command) = cli.command else {
        println!("{}", VersionInfo::current().banner());
        println!("Run `lcdctl --help` for usage.");
        return Ok(());
    };

    let loaded = load_config(cli.config.as_ref())?;
    init_tracing("lcdctl", &loaded.config.logging)?;
    match &loaded.source {
        Some(path) => lcd_debug!("configuration loaded from {}", path.display()),
        None => lcd_debug!("no configuration file found, using factory defaults"),
    }
    let deployment = Deployment::from_config(loaded.config);

    match command {
        Commands::Provision(args) => provision::run(&deployment, args, cli.output),
        Commands::Update(cmd) => update::run(&deployment, cmd, cli.output),
        Commands::Status => status::run(&deployment, cli.output),
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<LoadedDeployConfig> {
    let mut candidates = Vec::new();
    let env_override = std::env::var_os(DeployConfig::ENV_CONFIG_PATH)
        .is_some_and(|value| !value.to_string_lossy().trim().is_empty());
    if let Some(path) = explicit {
        if !env_override && !path.exists() {
            anyhow::bail!("configuration file {} does not exist", path.display());
        }
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_PATH));
    candidates.push(PathBuf::from("configs/deploy.example.toml"));
    DeployConfig::load_with_source(&candidates).context("failed to load deployment configuration")
}

/// Print a serializable report as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
