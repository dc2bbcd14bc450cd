//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "External program execution behind a substitutable runner."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::CommandError;

/// A fully described program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    fn status_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "signal".to_owned(),
        }
    }
}

/// Runs external programs. Implementations must not interpret exit codes.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;
}

/// Run a command and turn a spawn failure or non-zero exit into [`CommandError`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, CommandError> {
    let output = runner.run(spec).map_err(|source| CommandError::Spawn {
        command: spec.to_string(),
        source,
    })?;
    if output.succeeded() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            command: spec.to_string(),
            status: output.status_label(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        debug!(command = %spec, cwd = ?spec.current_dir, "running");
        let output = command.output()?;
        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %spec, code = ?result.code, "finished");
        Ok(result)
    }
}

/// In-memory [`CommandRunner`] that records invocations and answers from a script.
///
/// Responses are matched by command-line prefix; the most recently registered
/// matching rule wins and unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, Result<CommandOutput, io::ErrorKind>)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) -> &Self {
        self.rules.lock().push((prefix.into(), Ok(output)));
        self
    }

    /// Make commands starting with `prefix` fail to spawn.
    pub fn spawn_error(&self, prefix: impl Into<String>, kind: io::ErrorKind) -> &Self {
        self.rules.lock().push((prefix.into(), Err(kind)));
        self
    }

    /// Every command run so far, rendered as command lines.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(ToString::to_string).collect()
    }

    /// Recorded invocations, including working directory and environment.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.calls.lock().push(spec.clone());
        let line = spec.to_string();
        let rules = self.rules.lock();
        match rules.iter().rev().find(|(prefix, _)| line.starts_with(prefix)) {
            Some((_, Ok(output))) => Ok(output.clone()),
            Some((_, Err(kind))) => Err(io::Error::new(*kind, format!("scripted failure: {line}"))),
            None => Ok(CommandOutput::success("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_command_line() {
        let spec = CommandSpec::new("git")
            .args(["reset", "--hard"])
            .arg("origin/main");
        assert_eq!(spec.to_string(), "git reset --hard origin/main");
    }

    #[test]
    fn run_checked_reports_exit_code_and_stderr() {
        let runner = ScriptedRunner::new();
        runner.respond("git fetch", CommandOutput::failure(128, "could not resolve host\n"));
        let err = run_checked(&runner, &CommandSpec::new("git").arg("fetch")).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exit code 128"), "{text}");
        assert!(text.contains("could not resolve host"), "{text}");
    }

    #[test]
    fn latest_matching_rule_wins() {
        let runner = ScriptedRunner::new();
        runner
            .respond("systemctl", CommandOutput::failure(1, "first"))
            .respond("systemctl restart", CommandOutput::success("ok"));
        let out = runner
            .run(&CommandSpec::new("systemctl").args(["restart", "x.service"]))
            .unwrap();
        assert_eq!(out.stdout, "ok");
        let out = runner
            .run(&CommandSpec::new("systemctl").args(["stop", "x.service"]))
            .unwrap();
        assert_eq!(out.stderr, "first");
        assert_eq!(runner.count_matching("systemctl"), 2);
    }

    #[test]
    fn spawn_errors_surface_as_command_errors() {
        let runner = ScriptedRunner::new();
        runner.spawn_error("apt-get", io::ErrorKind::NotFound);
        let err = run_checked(&runner, &CommandSpec::new("apt-get").arg("update")).unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
