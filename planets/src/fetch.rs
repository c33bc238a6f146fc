//! Repository fetcher: keep a local clone of the content repository at a revision.
//!
//! Cloning is cached by directory presence. An existing directory is reused
//! as long as git calls it a working tree; remote URL and revision are not
//! compared.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::git::Git;
use crate::io::shell::Shell;

/// What [`ensure_clone`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneAction {
    /// The directory already was a working tree.
    Reused,
    /// Nothing existed; cloned fresh.
    Cloned,
    /// A directory existed but was not a working tree; removed and cloned.
    Recloned,
}

/// Make sure `dest` is a git working tree, cloning `url` into it if needed.
#[instrument(skip(shell, dest), fields(dest = %dest.display()))]
pub fn ensure_clone<S: Shell + ?Sized>(shell: &S, url: &str, dest: &Path) -> Result<CloneAction> {
    let mut action = CloneAction::Cloned;
    if dest.is_dir() {
        if Git::new(shell, dest).is_inside_work_tree()? {
            info!("reusing existing clone");
            return Ok(CloneAction::Reused);
        }
        warn!("directory is not a working tree, removing");
        fs::remove_dir_all(dest).with_context(|| format!("remove {}", dest.display()))?;
        action = CloneAction::Recloned;
    }

    let name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("clone destination {} has no name", dest.display()))?;
    let parent = dest
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Git::new(shell, parent).clone_repo(url, name)?;
    info!(?action, "cloned");
    Ok(action)
}

/// Switch the working tree at `dest` to `revision` (branch, tag or commit).
#[instrument(skip(shell, dest), fields(dest = %dest.display()))]
pub fn checkout<S: Shell + ?Sized>(shell: &S, dest: &Path, revision: &str) -> Result<()> {
    Git::new(shell, dest).checkout(revision)
}
