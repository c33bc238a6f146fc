//! Planet discovery: fetch the content repository and find planet configs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::fetch::{checkout, ensure_clone};
use crate::io::config::Settings;
use crate::io::requirements::executable_present;
use crate::io::shell::Shell;

pub const BRANCHES_DIR: &str = "branches";
pub const PLANET_CONFIG: &str = "config.ini";

/// A directory under `branches/` carrying a `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Planet {
    pub name: String,
    pub config_path: PathBuf,
}

/// Ensure the clone, check out the configured revision, and list planets.
///
/// Fails with `git missing` before touching anything when git is not on `PATH`.
#[instrument(skip_all, fields(revision = settings.revision()))]
pub fn discover_planets<S: Shell + ?Sized>(shell: &S, settings: &Settings) -> Result<Vec<Planet>> {
    if !executable_present(shell, "git")? {
        bail!("git missing");
    }
    let checkout_dir = settings.checkout_dir();
    let action = ensure_clone(shell, &settings.config.repo_url, &checkout_dir)?;
    debug!(?action, "clone ready");
    checkout(shell, &checkout_dir, settings.revision())?;
    let planets = list_planets(&checkout_dir.join(BRANCHES_DIR))?;
    info!(count = planets.len(), "planets discovered");
    Ok(planets)
}

/// Entries of `branches_dir` whose `config.ini` is a regular file, sorted by name.
///
/// A missing `branches_dir` is an error.
pub fn list_planets(branches_dir: &Path) -> Result<Vec<Planet>> {
    let mut planets = Vec::new();
    for entry in
        fs::read_dir(branches_dir).with_context(|| format!("read {}", branches_dir.display()))?
    {
        let entry = entry.context("read branches entry")?;
        let config_path = entry.path().join(PLANET_CONFIG);
        if !config_path.is_file() {
            debug!(entry = %entry.path().display(), "no config.ini, skipping");
            continue;
        }
        planets.push(Planet {
            name: entry.file_name().to_string_lossy().into_owned(),
            config_path,
        });
    }
    planets.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(planets)
}
