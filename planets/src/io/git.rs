//! Git adapter for the content repository and the project tree.
//!
//! Every git call goes through a [`Shell`] so fetch logic can be exercised
//! against a scripted shell in tests.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, instrument};

use crate::io::shell::{Invocation, Shell, ShellOutput};

/// Wrapper for executing git commands in a working directory.
pub struct Git<'a, S: Shell + ?Sized> {
    shell: &'a S,
    workdir: PathBuf,
}

impl<'a, S: Shell + ?Sized> Git<'a, S> {
    pub fn new(shell: &'a S, workdir: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if the working directory is inside a git working tree.
    ///
    /// A directory nested in some other repository counts as well; git does
    /// not distinguish the two.
    pub fn is_inside_work_tree(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        debug!(code = out.code, "is-inside-work-tree");
        Ok(out.success())
    }

    /// Clone `url` into `<workdir>/<name>`.
    #[instrument(skip_all, fields(url, name))]
    pub fn clone_repo(&self, url: &str, name: &str) -> Result<()> {
        debug!(url, name, "cloning");
        self.run_checked(&["clone", url, name])
    }

    /// Checkout a branch, tag or commit.
    #[instrument(skip_all, fields(revision))]
    pub fn checkout(&self, revision: &str) -> Result<()> {
        debug!(revision, "checking out");
        self.run_checked(&["checkout", revision])
    }

    fn run_checked(&self, args: &[&str]) -> Result<()> {
        let out = self.run(args)?;
        out.check(&format!("git {}", args.join(" ")))
    }

    fn run(&self, args: &[&str]) -> Result<ShellOutput> {
        self.shell.run(&git_invocation(&self.workdir, args))
    }
}

/// `git clean -xfd`: remove untracked and ignored files under `workdir`.
pub fn clean_invocation(workdir: &Path) -> Invocation {
    git_invocation(workdir, &["clean", "-xfd"])
}

fn git_invocation(workdir: &Path, args: &[&str]) -> Invocation {
    Invocation::new("git")
        .args(args.iter().copied())
        .current_dir(workdir)
}
