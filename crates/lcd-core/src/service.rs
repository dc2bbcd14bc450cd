//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Managed service lifecycle through the host init system."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::exec::{run_checked, CommandRunner, CommandSpec};

/// Unit file shipped in the source tree, before or after device adaptation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub contents: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// Read the descriptor from the synchronized tree.
    pub fn load(path: &Path, name: impl Into<String>) -> Result<Self, ServiceError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::new(name, contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(ServiceError::MissingDescriptor(path.to_path_buf()))
            }
            Err(source) => Err(ServiceError::ReadDescriptor {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Substitute the device's deployment path and run-as identity.
    ///
    /// Every occurrence of `template_root` (the path the descriptor was
    /// authored against) becomes `deploy_dir`; `User=` and `WorkingDirectory=`
    /// are forced, and added to `[Service]` when the descriptor omits them.
    pub fn adapt(&self, deploy_dir: &Path, run_as: &str, template_root: &str) -> Self {
        let deploy = deploy_dir.display().to_string();
        let user_line = format!("User={run_as}");
        let workdir_line = format!("WorkingDirectory={deploy}");

        let mut lines = Vec::new();
        let mut in_service = false;
        let mut saw_user = false;
        let mut saw_workdir = false;
        let mut service_header = None;

        for raw in self.contents.lines() {
            let trimmed = raw.trim();
            if trimmed.starts_with('[') {
                in_service = trimmed == "[Service]";
                if in_service {
                    service_header = Some(lines.len());
                }
                lines.push(raw.to_owned());
                continue;
            }
            if in_service && trimmed.starts_with("User=") {
                saw_user = true;
                lines.push(user_line.clone());
            } else if in_service && trimmed.starts_with("WorkingDirectory=") {
                saw_workdir = true;
                lines.push(workdir_line.clone());
            } else if template_root.is_empty() {
                lines.push(raw.to_owned());
            } else {
                lines.push(raw.replace(template_root, &deploy));
            }
        }

        let mut missing = Vec::new();
        if !saw_user {
            missing.push(user_line);
        }
        if !saw_workdir {
            missing.push(workdir_line);
        }
        match service_header {
            Some(index) => {
                for (offset, line) in missing.into_iter().enumerate() {
                    lines.insert(index + 1 + offset, line);
                }
            }
            None if !missing.is_empty() => {
                lines.push("[Service]".to_owned());
                lines.extend(missing);
            }
            None => {}
        }

        let mut contents = lines.join("\n");
        contents.push('\n');
        Self::new(self.name.clone(), contents)
    }
}

/// Snapshot of the unit as reported by the init system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub active_state: String,
    pub sub_state: String,
    /// `None` when no main process is running.
    pub main_pid: Option<u32>,
    /// Exit status of the last main process, if any.
    pub exit_status: Option<i32>,
    pub result: String,
}

impl ServiceStatus {
    pub fn running(&self) -> bool {
        self.active_state == "active" && self.sub_state == "running"
    }

    /// Parse `systemctl show` `Key=Value` output.
    pub fn parse(output: &str) -> Self {
        let mut status = Self::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "ActiveState" => status.active_state = value.to_owned(),
                "SubState" => status.sub_state = value.to_owned(),
                "MainPID" => status.main_pid = value.parse().ok().filter(|pid| *pid != 0),
                "ExecMainStatus" => status.exit_status = value.parse().ok(),
                "Result" => status.result = value.to_owned(),
                _ => {}
            }
        }
        status
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.active_state, self.sub_state)?;
        if let Some(pid) = self.main_pid {
            write!(f, " pid {pid}")?;
        }
        if !self.running() {
            if let Some(code) = self.exit_status {
                write!(f, ", last exit {code}")?;
            }
            if !self.result.is_empty() && self.result != "success" {
                write!(f, ", result {}", self.result)?;
            }
        }
        Ok(())
    }
}

pub trait ServiceController {
    /// Install the descriptor into the init system and enable it at boot.
    /// Returns `true` when the installed unit changed.
    fn register(&self, descriptor: &ServiceDescriptor) -> Result<bool, ServiceError>;
    fn start(&self) -> Result<(), ServiceError>;
    fn stop(&self) -> Result<(), ServiceError>;
    /// Starts the service if it was not running.
    fn restart(&self) -> Result<(), ServiceError>;
    fn status(&self) -> Result<ServiceStatus, ServiceError>;
}

/// [`ServiceController`] for a system-level systemd unit.
#[derive(Clone)]
pub struct SystemdController {
    runner: Arc<dyn CommandRunner>,
    unit: String,
    unit_dir: PathBuf,
}

impl fmt::Debug for SystemdController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemdController")
            .field("unit", &self.unit)
            .field("unit_dir", &self.unit_dir)
            .finish()
    }
}

impl SystemdController {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        unit: impl Into<String>,
        unit_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            unit: unit.into(),
            unit_dir: unit_dir.into(),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(&self.unit)
    }

    fn systemctl(&self, args: &[&str]) -> Result<String, ServiceError> {
        let spec = CommandSpec::new("systemctl").args(args.iter().copied());
        Ok(run_checked(self.runner.as_ref(), &spec)?.stdout)
    }

    fn unit_action(&self, action: &str) -> Result<(), ServiceError> {
        self.systemctl(&[action, self.unit.as_str()])?;
        info!(unit = %self.unit, action, "service action completed");
        Ok(())
    }

    /// Reboot the host. Used only after explicit operator confirmation.
    pub fn reboot_host(&self) -> Result<(), ServiceError> {
        info!("rebooting host");
        self.systemctl(&["reboot"]).map(|_| ())
    }
}

impl ServiceController for SystemdController {
    fn register(&self, descriptor: &ServiceDescriptor) -> Result<bool, ServiceError> {
        let path = self.unit_path();
        let unchanged = fs::read_to_string(&path)
            .map(|installed| installed == descriptor.contents)
            .unwrap_or(false);
        if unchanged {
            debug!(unit = %path.display(), "unit file already current");
        } else {
            fs::write(&path, &descriptor.contents).map_err(|source| ServiceError::WriteUnit {
                path: path.clone(),
                source,
            })?;
            info!(unit = %path.display(), "unit file installed");
        }
        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", self.unit.as_str()])?;
        Ok(!unchanged)
    }

    fn start(&self) -> Result<(), ServiceError> {
        self.unit_action("start")
    }

    fn stop(&self) -> Result<(), ServiceError> {
        self.unit_action("stop")
    }

    fn restart(&self) -> Result<(), ServiceError> {
        self.unit_action("restart")
    }

    fn status(&self) -> Result<ServiceStatus, ServiceError> {
        let output = self.systemctl(&[
            "show",
            self.unit.as_str(),
            "--property=ActiveState,SubState,MainPID,ExecMainStatus,Result",
        ])?;
        Ok(ServiceStatus::parse(&output))
    }
}
