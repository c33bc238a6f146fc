//! Test-only helpers: a scripted shell and throwaway git repositories.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::io::shell::{Invocation, Shell, ShellOutput};

type Responder = Box<dyn Fn(&Invocation) -> ShellOutput>;

/// Records every invocation and answers from a closure instead of spawning.
pub struct FakeShell {
    responder: Responder,
    calls: RefCell<Vec<Invocation>>,
}

impl FakeShell {
    pub fn new(responder: impl Fn(&Invocation) -> ShellOutput + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Every command succeeds with no output.
    pub fn succeeding() -> Self {
        Self::new(|_| ShellOutput::exited(0))
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Recorded invocations rendered as shell lines.
    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    /// Recorded invocations whose arguments contain `arg`.
    pub fn calls_with(&self, arg: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|inv| inv.args.iter().any(|a| a == arg))
            .cloned()
            .collect()
    }
}

impl Shell for FakeShell {
    fn run(&self, invocation: &Invocation) -> Result<ShellOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok((self.responder)(invocation))
    }
}

/// A git repository in a temporary directory with a `master` branch.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/master"])?;
        repo.git(&["config", "user.name", "Planets Test"])?;
        repo.git(&["config", "user.email", "planets-test@local.invalid"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file (creating parent directories) without staging it.
    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write, stage and commit a single file.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        self.write_file(rel, contents)?;
        self.git(&["add", rel])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    /// Create a lightweight tag at HEAD.
    pub fn tag(&self, name: &str) -> Result<()> {
        self.git(&["tag", name])?;
        Ok(())
    }

    /// Run git in the repository and return stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("run git {:?}", args))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {:?} failed: {}", args, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
