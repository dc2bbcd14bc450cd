//! ---
//! lcd_section: "01-core-functionality"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Shared primitives for the deployment tooling."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
//! Shared configuration, logging and version metadata consumed across the
//! lcd workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    DeployConfig, DeviceConfig, HardwareConfig, LoadedDeployConfig, LoggingConfig, MetricsConfig,
    RuntimeConfig, ServiceConfig, SourceConfig, StateConfig, DEFAULT_CONFIG_PATH,
};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
