//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Destructive synchronization of the source tree to a remote reference."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CommandError, SyncError};
use crate::exec::{run_checked, CommandRunner, CommandSpec};

/// Full object name of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into().trim().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for operator output.
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a successful force-sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub previous: CommitHash,
    pub current: CommitHash,
    /// Tracked files whose local modifications were thrown away by the reset.
    pub discarded: Vec<String>,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// Non-fatal conditions worth showing to the operator.
    pub fn warnings(&self) -> Vec<String> {
        if self.discarded.is_empty() {
            Vec::new()
        } else {
            vec![format!(
                "discarded local modifications to tracked files: {}",
                self.discarded.join(", ")
            )]
        }
    }
}

/// Read-only comparison of the local checkout with the fetched remote reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub reference: String,
    pub local: CommitHash,
    pub remote: CommitHash,
}

impl ProbeReport {
    pub fn pending(&self) -> bool {
        self.local != self.remote
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CheckoutOutcome {
    Existing,
    Cloned { commit: CommitHash },
}

/// Forces the managed directory's tracked source to match one remote reference.
pub trait SourceSynchronizer {
    /// Confirm the managed directory is a checkout with a usable remote and
    /// return its current commit.
    fn checkpoint(&self) -> Result<CommitHash, SyncError>;

    /// Fetch and compare without touching the working tree.
    fn probe(&self) -> Result<ProbeReport, SyncError>;

    /// Fetch, then reset the tree to exactly the remote reference.
    ///
    /// Any error other than [`SyncError::Reset`] leaves the previous tree in place.
    fn sync(&self) -> Result<SyncReport, SyncError>;

    /// Clone the remote into an empty managed directory if it is not a checkout yet.
    fn ensure_checkout(&self, url: Option<&str>) -> Result<CheckoutOutcome, SyncError>;

    /// System packages [`ensure_checkout`](Self::ensure_checkout) needs before
    /// it can clone. Empty once the directory is a checkout.
    fn checkout_packages(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human-readable reference name, e.g. `origin/main`.
    fn reference(&self) -> String;
}

/// [`SourceSynchronizer`] driving the `git` command line.
#[derive(Clone)]
pub struct GitSynchronizer {
    runner: Arc<dyn CommandRunner>,
    dir: PathBuf,
    remote: String,
    branch: String,
}

impl fmt::Debug for GitSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitSynchronizer")
            .field("dir", &self.dir)
            .field("remote", &self.remote)
            .field("branch", &self.branch)
            .finish()
    }
}

impl GitSynchronizer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        dir: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            dir: dir.into(),
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn git<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("git").args(args).current_dir(&self.dir)
    }

    fn head(&self) -> Result<CommitHash, CommandError> {
        let out = run_checked(
            self.runner.as_ref(),
            &self.git(["rev-parse", "--verify", "HEAD"]),
        )?;
        Ok(CommitHash::new(out.stdout))
    }

    /// Fetch every remote and resolve the configured reference.
    fn fetch(&self) -> Result<CommitHash, SyncError> {
        run_checked(self.runner.as_ref(), &self.git(["fetch", "--all", "--prune"]))
            .map_err(SyncError::Fetch)?;
        let reference = self.reference();
        let out = run_checked(
            self.runner.as_ref(),
            &self.git(["rev-parse", "--verify"]).arg(format!("{reference}^{{commit}}")),
        )
        .map_err(|err| SyncError::UnknownReference {
            reference: reference.clone(),
            detail: err.to_string(),
        })?;
        Ok(CommitHash::new(out.stdout))
    }

    fn modified_tracked_files(&self) -> Vec<String> {
        match run_checked(
            self.runner.as_ref(),
            &self.git(["status", "--porcelain", "--untracked-files=no"]),
        ) {
            Ok(out) => parse_porcelain(&out.stdout),
            Err(err) => {
                warn!(error = %err, "unable to list local modifications before reset");
                Vec::new()
            }
        }
    }
}

impl SourceSynchronizer for GitSynchronizer {
    fn checkpoint(&self) -> Result<CommitHash, SyncError> {
        let not_checkpoint = |reason: String| SyncError::NotACheckpoint {
            dir: self.dir.clone(),
            reason,
        };
        if !self.dir.join(".git").exists() {
            return Err(not_checkpoint("no .git directory".to_owned()));
        }
        let head = self
            .head()
            .map_err(|err| not_checkpoint(format!("no commit checked out ({err})")))?;
        run_checked(
            self.runner.as_ref(),
            &self.git(["remote", "get-url"]).arg(&self.remote),
        )
        .map_err(|err| not_checkpoint(format!("remote '{}' missing ({err})", self.remote)))?;
        Ok(head)
    }

    fn probe(&self) -> Result<ProbeReport, SyncError> {
        let remote = self.fetch()?;
        let local = self.head().map_err(SyncError::Inspect)?;
        Ok(ProbeReport {
            reference: self.reference(),
            local,
            remote,
        })
    }

    fn sync(&self) -> Result<SyncReport, SyncError> {
        let previous = self.head().map_err(SyncError::Inspect)?;
        let target = self.fetch()?;
        let discarded = self.modified_tracked_files();
        let reference = self.reference();

        run_checked(
            self.runner.as_ref(),
            &self.git(["reset", "--hard"]).arg(target.as_str()),
        )
        .map_err(|source| SyncError::Reset {
            reference: reference.clone(),
            source,
        })?;
        let current = self.head().map_err(|source| SyncError::Reset {
            reference: reference.clone(),
            source,
        })?;

        info!(
            reference = %reference,
            previous = %previous.short(),
            current = %current.short(),
            discarded = discarded.len(),
            "source synchronized"
        );
        Ok(SyncReport {
            previous,
            current,
            discarded,
        })
    }

    fn ensure_checkout(&self, url: Option<&str>) -> Result<CheckoutOutcome, SyncError> {
        if self.dir.join(".git").exists() {
            debug!(dir = %self.dir.display(), "checkout already present");
            return Ok(CheckoutOutcome::Existing);
        }
        let url = url.ok_or_else(|| SyncError::NoCloneSource {
            dir: self.dir.clone(),
        })?;
        let clone = CommandSpec::new("git")
            .args(["clone", "--branch"])
            .arg(&self.branch)
            .arg("--origin")
            .arg(&self.remote)
            .arg(url)
            .path_arg(&self.dir);
        run_checked(self.runner.as_ref(), &clone).map_err(|source| SyncError::Clone {
            url: url.to_owned(),
            source,
        })?;
        let commit = self.head().map_err(SyncError::Inspect)?;
        info!(url, commit = %commit.short(), dir = %self.dir.display(), "source cloned");
        Ok(CheckoutOutcome::Cloned { commit })
    }

    fn checkout_packages(&self) -> Vec<String> {
        if self.dir.join(".git").exists() {
            Vec::new()
        } else {
            vec!["git".to_owned()]
        }
    }

    fn reference(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.get(3..))
        .map(|path| match path.split_once(" -> ") {
            Some((_, renamed)) => renamed.to_owned(),
            None => path.to_owned(),
        })
        .filter(|path| !path.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::exec::{CommandOutput, ScriptedRunner};

    const OLD: &str = "1111111111111111111111111111111111111111";
    const NEW: &str = "2222222222222222222222222222222222222222";

    fn checkout() -> (tempfile::TempDir, Arc<ScriptedRunner>, GitSynchronizer) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("git rev-parse --verify HEAD", CommandOutput::success(format!("{OLD}\n")));
        runner.respond(
            "git rev-parse --verify origin/main^{commit}",
            CommandOutput::success(format!("{NEW}\n")),
        );
        let sync = GitSynchronizer::new(runner.clone(), dir.path(), "origin", "main");
        (dir, runner, sync)
    }

    #[test]
    fn porcelain_lists_modified_and_renamed_paths() {
        let parsed = parse_porcelain(" M app.py\nM  templates/index.html\nR  old.py -> new.py\n");
        assert_eq!(parsed, vec!["app.py", "templates/index.html", "new.py"]);
    }

    #[test]
    fn checkpoint_requires_git_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let sync = GitSynchronizer::new(runner.clone(), dir.path(), "origin", "main");
        let err = sync.checkpoint().unwrap_err();
        assert!(matches!(err, SyncError::NotACheckpoint { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn bare_directory_needs_git_to_clone() {
        let dir = tempfile::tempdir().unwrap();
        let sync = GitSynchronizer::new(Arc::new(ScriptedRunner::new()), dir.path(), "origin", "main");
        assert_eq!(sync.checkout_packages(), vec!["git"]);

        fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(sync.checkout_packages().is_empty());
    }

    #[test]
    fn checkpoint_requires_configured_remote() {
        let (_dir, runner, sync) = checkout();
        runner.respond(
            "git remote get-url origin",
            CommandOutput::failure(2, "error: No such remote 'origin'"),
        );
        let err = sync.checkpoint().unwrap_err();
        assert!(err.to_string().contains("remote 'origin' missing"));
    }

    #[test]
    fn fetch_failure_never_resets() {
        let (_dir, runner, sync) = checkout();
        runner.respond(
            "git fetch",
            CommandOutput::failure(128, "fatal: unable to access remote"),
        );
        let err = sync.sync().unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));
        assert!(err.tree_intact());
        assert_eq!(runner.count_matching("git reset"), 0);
    }

    #[test]
    fn unknown_reference_never_resets() {
        let (_dir, runner, sync) = checkout();
        runner.respond(
            "git rev-parse --verify origin/main",
            CommandOutput::failure(128, "fatal: Needed a single revision"),
        );
        let err = sync.sync().unwrap_err();
        assert!(matches!(err, SyncError::UnknownReference { .. }));
        assert_eq!(runner.count_matching("git reset"), 0);
    }

    #[test]
    fn sync_resets_to_fetched_commit_and_reports_discarded_edits() {
        let (_dir, runner, sync) = checkout();
        runner.respond("git status", CommandOutput::success(" M app.py\n"));
        let report = sync.sync().unwrap();
        assert_eq!(report.previous.as_str(), OLD);
        assert_eq!(report.discarded, vec!["app.py"]);
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(runner.count_matching(&format!("git reset --hard {NEW}")), 1);
    }

    #[test]
    fn reset_failure_is_not_tree_intact() {
        let (_dir, runner, sync) = checkout();
        runner.respond(
            "git reset",
            CommandOutput::failure(128, "error: unable to unlink old 'app.py'"),
        );
        let err = sync.sync().unwrap_err();
        assert!(!err.tree_intact());
    }

    #[test]
    fn probe_reports_pending_change() {
        let (_dir, runner, sync) = checkout();
        let probe = sync.probe().unwrap();
        assert!(probe.pending());
        assert_eq!(probe.reference, "origin/main");
        assert_eq!(runner.count_matching("git reset"), 0);
    }

    #[test]
    fn ensure_checkout_clones_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("git rev-parse --verify HEAD", CommandOutput::success(OLD));
        let sync = GitSynchronizer::new(runner.clone(), dir.path(), "origin", "main");

        let outcome = sync
            .ensure_checkout(Some("https://example.invalid/counter.git"))
            .unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Cloned { .. }));
        assert_eq!(runner.count_matching("git clone --branch main --origin origin"), 1);

        fs::create_dir(dir.path().join(".git")).unwrap();
        let outcome = sync.ensure_checkout(None).unwrap();
        assert_eq!(outcome, CheckoutOutcome::Existing);
        assert_eq!(runner.count_matching("git clone"), 1);
    }

    #[test]
    fn ensure_checkout_without_url_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sync = GitSynchronizer::new(Arc::new(ScriptedRunner::new()), dir.path(), "origin", "main");
        assert!(matches!(
            sync.ensure_checkout(None),
            Err(SyncError::NoCloneSource { .. })
        ));
    }
}
