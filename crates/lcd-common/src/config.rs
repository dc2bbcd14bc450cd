//! ---
//! lcd_section: "01-core-functionality"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Deployment configuration model and loading."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

/// Default location of the device-wide configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lcd/deploy.toml";

fn default_managed_dir() -> PathBuf {
    PathBuf::from("/root/LidarCounter")
}

fn default_run_as() -> String {
    "root".to_owned()
}

fn default_remote() -> String {
    "origin".to_owned()
}

fn default_branch() -> String {
    "main".to_owned()
}

fn default_state_files() -> Vec<String> {
    vec!["config.json".to_owned(), "schedule.json".to_owned()]
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/tmp/lcd-backup")
}

fn default_python() -> String {
    "python3".to_owned()
}

fn default_venv_dir() -> PathBuf {
    PathBuf::from("venv")
}

fn default_declaration() -> PathBuf {
    PathBuf::from("requirements.txt")
}

fn default_system_packages() -> Vec<String> {
    [
        "python3",
        "python3-venv",
        "python3-pip",
        "python3-dev",
        "build-essential",
        "git",
        "libffi-dev",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_unit() -> String {
    "LidarCounter.service".to_owned()
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_template_root() -> String {
    "/home/admin/ShowMonLidarCounter".to_owned()
}

fn default_hardware_enabled() -> bool {
    true
}

fn default_boot_config() -> PathBuf {
    PathBuf::from("/boot/armbianEnv.txt")
}

fn default_overlay_key() -> String {
    "overlays".to_owned()
}

fn default_overlay_token() -> String {
    "uart5".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/lcd")
}

/// Primary configuration object for the deployment tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`DeployConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedDeployConfig {
    pub config: DeployConfig,
    /// `None` when no candidate existed and built-in defaults were used.
    pub source: Option<PathBuf>,
}

impl DeployConfig {
    pub const ENV_CONFIG_PATH: &'static str = "LCD_CONFIG";

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `LCD_CONFIG` path must exist. Otherwise the first existing
    /// candidate wins, and when none exists the factory defaults apply.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedDeployConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedDeployConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedDeployConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found, using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedDeployConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<DeployConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if !self.device.managed_dir.is_absolute() {
            return Err(anyhow!(
                "device.managed_dir must be absolute (got {})",
                self.device.managed_dir.display()
            ));
        }
        if self.device.run_as.trim().is_empty() {
            return Err(anyhow!("device.run_as cannot be empty"));
        }
        if self.source.remote.trim().is_empty() || self.source.branch.trim().is_empty() {
            return Err(anyhow!("source.remote and source.branch must both be set"));
        }
        for name in &self.state.files {
            if !is_plain_file_name(name) {
                return Err(anyhow!(
                    "tracked state file '{}' must be a plain file name",
                    name
                ));
            }
        }
        if self.service.unit.trim().is_empty() {
            return Err(anyhow!("service.unit cannot be empty"));
        }
        if self.hardware.enabled
            && (self.hardware.overlay_key.trim().is_empty()
                || self.hardware.overlay_token.trim().is_empty())
        {
            return Err(anyhow!(
                "hardware.overlay_key and hardware.overlay_token are required when hardware is enabled"
            ));
        }
        if self.hardware.overlay_token.contains(char::is_whitespace) {
            return Err(anyhow!("hardware.overlay_token cannot contain whitespace"));
        }
        Ok(())
    }

    /// Absolute path of the isolated runtime environment.
    pub fn venv_path(&self) -> PathBuf {
        self.resolve(&self.runtime.venv_dir)
    }

    /// Absolute path of the dependency declaration inside the source tree.
    pub fn declaration_path(&self) -> PathBuf {
        self.resolve(&self.runtime.declaration)
    }

    /// Absolute path of the service descriptor inside the source tree.
    pub fn descriptor_path(&self) -> PathBuf {
        self.resolve(&self.service.descriptor)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.device.managed_dir.join(path)
        }
    }
}

impl std::str::FromStr for DeployConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: DeployConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_managed_dir")]
    pub managed_dir: PathBuf,
    #[serde(default = "default_run_as")]
    pub run_as: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            managed_dir: default_managed_dir(),
            run_as: default_run_as(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Clone URL, only consulted when provisioning a bare device.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: default_branch(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_files")]
    pub files: Vec<String>,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            files: default_state_files(),
            backup_dir: default_backup_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_venv_dir")]
    pub venv_dir: PathBuf,
    #[serde(default = "default_declaration")]
    pub declaration: PathBuf,
    #[serde(default = "default_system_packages")]
    pub system_packages: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            venv_dir: default_venv_dir(),
            declaration: default_declaration(),
            system_packages: default_system_packages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Unit file shipped in the source tree, relative to the managed directory.
    #[serde(default = "default_unit_path")]
    pub descriptor: PathBuf,
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,
    /// Deployment path baked into the shipped descriptor.
    #[serde(default = "default_template_root")]
    pub template_root: String,
}

fn default_unit_path() -> PathBuf {
    PathBuf::from(default_unit())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit: default_unit(),
            descriptor: default_unit_path(),
            unit_dir: default_unit_dir(),
            template_root: default_template_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_hardware_enabled")]
    pub enabled: bool,
    #[serde(default = "default_boot_config")]
    pub boot_config: PathBuf,
    #[serde(default = "default_overlay_key")]
    pub overlay_key: String,
    #[serde(default = "default_overlay_token")]
    pub overlay_token: String,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enabled: default_hardware_enabled(),
            boot_config: default_boot_config(),
            overlay_key: default_overlay_key(),
            overlay_token: default_overlay_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: LogFormat::default(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Node-exporter textfile-collector directory; each run kind writes `lcd_<kind>.prom`.
    #[serde(default)]
    pub textfile_dir: Option<PathBuf>,
}
