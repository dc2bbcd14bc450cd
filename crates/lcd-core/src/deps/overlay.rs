//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Hardware overlay enablement in the boot configuration."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
//! The boot configuration is a line-based `key=value` file edited by hand on
//! the device (Armbian's `armbianEnv.txt`). Enabling an interface means the
//! overlay token must appear in the whitespace-separated list on the overlay
//! line; existing entries are never replaced.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::OverlayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayChange {
    AlreadyPresent,
    /// The file was modified; the change only takes effect after a reboot.
    Appended,
}

pub trait HardwareOverlay {
    fn ensure_enabled(&self) -> Result<OverlayChange, OverlayError>;
}

/// [`HardwareOverlay`] backed by a boot configuration file on disk.
#[derive(Debug, Clone)]
pub struct BootConfig {
    path: PathBuf,
    key: String,
    token: String,
}

impl BootConfig {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            token: token.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the token is currently declared. A missing file counts as not enabled.
    pub fn is_enabled(&self) -> Result<bool, OverlayError> {
        Ok(apply_overlay(&self.read()?, &self.key, &self.token).is_none())
    }

    fn read(&self) -> Result<String, OverlayError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(OverlayError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, content: &str) -> Result<(), OverlayError> {
        let write_err = |source| OverlayError::Write {
            path: self.path.clone(),
            source,
        };
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "boot-config".to_owned());
        let staging = self.path.with_file_name(format!(".{file_name}.lcd-tmp"));
        let mut file = fs::File::create(&staging).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&staging, &self.path).map_err(write_err)
    }
}

impl HardwareOverlay for BootConfig {
    fn ensure_enabled(&self) -> Result<OverlayChange, OverlayError> {
        // Always re-read: the file is shared with the operator and the bootloader tooling.
        let current = self.read()?;
        match apply_overlay(&current, &self.key, &self.token) {
            None => {
                debug!(path = %self.path.display(), token = %self.token, "overlay already enabled");
                Ok(OverlayChange::AlreadyPresent)
            }
            Some(updated) => {
                self.write(&updated)?;
                info!(path = %self.path.display(), token = %self.token, "overlay appended");
                Ok(OverlayChange::Appended)
            }
        }
    }
}

/// Return the edited configuration, or `None` when `token` is already listed
/// under `key`.
///
/// The first `key=` line receives the token; without one, a new line is added
/// at the end of the file.
pub fn apply_overlay(content: &str, key: &str, token: &str) -> Option<String> {
    let prefix = format!("{key}=");
    let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();

    match lines
        .iter()
        .position(|line| line.trim_start().starts_with(&prefix))
    {
        Some(index) => {
            let line = &lines[index];
            let (head, values) = line.split_at(line.find('=').map_or(line.len(), |i| i + 1));
            if values.split_whitespace().any(|value| value == token) {
                return None;
            }
            let values = values.trim_end();
            let replacement = if values.trim().is_empty() {
                format!("{head}{token}")
            } else {
                format!("{head}{values} {token}")
            };
            lines[index] = replacement;
        }
        None => lines.push(format!("{prefix}{token}")),
    }

    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_to_existing_list() {
        let content = "verbosity=1\noverlays=i2c0 spi-spidev\nrootdev=UUID=abc\n";
        let updated = apply_overlay(content, "overlays", "uart5").unwrap();
        assert_eq!(
            updated,
            "verbosity=1\noverlays=i2c0 spi-spidev uart5\nrootdev=UUID=abc\n"
        );
    }

    #[test]
    fn present_token_is_left_alone() {
        assert!(apply_overlay("overlays=uart5 i2c0\n", "overlays", "uart5").is_none());
    }

    #[test]
    fn similar_token_is_not_mistaken_for_present() {
        let updated = apply_overlay("overlays=uart50\n", "overlays", "uart5").unwrap();
        assert_eq!(updated, "overlays=uart50 uart5\n");
    }

    #[test]
    fn missing_line_is_added_with_newline_handling() {
        let updated = apply_overlay("verbosity=1", "overlays", "uart5").unwrap();
        assert_eq!(updated, "verbosity=1\noverlays=uart5\n");
        assert_eq!(apply_overlay("", "overlays", "uart5").unwrap(), "overlays=uart5\n");
    }

    #[test]
    fn empty_overlay_line_gets_token_without_leading_space() {
        let updated = apply_overlay("overlays=\n", "overlays", "uart5").unwrap();
        assert_eq!(updated, "overlays=uart5\n");
    }

    #[test]
    fn key_prefix_of_other_key_is_not_matched() {
        let updated = apply_overlay("overlay_prefix=sun50i-h616\n", "overlays", "uart5").unwrap();
        assert_eq!(updated, "overlay_prefix=sun50i-h616\noverlays=uart5\n");
    }

    #[test]
    fn ensure_enabled_twice_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("armbianEnv.txt");
        fs::write(&path, "verbosity=1\noverlays=i2c0\n").unwrap();
        let boot = BootConfig::new(&path, "overlays", "uart5");

        assert!(!boot.is_enabled().unwrap());
        assert_eq!(boot.ensure_enabled().unwrap(), OverlayChange::Appended);
        assert_eq!(boot.ensure_enabled().unwrap(), OverlayChange::AlreadyPresent);
        assert!(boot.is_enabled().unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "verbosity=1\noverlays=i2c0 uart5\n"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn unwritable_location_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let boot = BootConfig::new(
            dir.path().join("missing").join("armbianEnv.txt"),
            "overlays",
            "uart5",
        );
        assert!(matches!(boot.ensure_enabled(), Err(OverlayError::Write { .. })));
    }
}
