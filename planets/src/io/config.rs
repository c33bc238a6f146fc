//! Planets configuration stored in `planets.toml` at the project root.
//!
//! Every field is optional; a missing file means defaults. The content
//! revision can be overridden with `PLANET_CONTENT_REVISION`, resolved once in
//! [`Settings::resolve`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::shell::{DEFAULT_OUTPUT_LIMIT_BYTES, SystemShell};

pub const CONFIG_FILE_NAME: &str = "planets.toml";
pub const REVISION_ENV: &str = "PLANET_CONTENT_REVISION";

/// Planets configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanetsConfig {
    /// Content repository to clone.
    pub repo_url: String,

    /// Directory (relative to the project root) holding the clone.
    pub repo_name: String,

    /// Branch, tag or commit to check out.
    pub revision: String,

    /// Package specifiers, one per line.
    pub requirements_file: PathBuf,

    /// Executables that must resolve on `PATH`.
    pub required_tools: Vec<String>,

    /// Interpreter used to query and install packages.
    pub python: String,

    /// Install command. Templated with `python` and `requirements`.
    pub install_command: Vec<String>,

    /// Test command run once per planet. Templated with `planet` and `config`.
    pub test_command: Vec<String>,

    /// 0 captures command output, 1 also prints stderr, 2 streams everything.
    pub verbosity: u8,

    /// Tasks run when `planets run` gets no names.
    pub default_tasks: Vec<String>,

    /// Kill commands running longer than this. Unset blocks indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// Captured stdout/stderr kept per command.
    pub output_limit_bytes: usize,
}

impl Default for PlanetsConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/mozilla/planet-content".to_string(),
            repo_name: "planet-content".to_string(),
            revision: "master".to_string(),
            requirements_file: PathBuf::from("requirements.txt"),
            required_tools: vec!["git".to_string(), "pip".to_string()],
            python: "python3".to_string(),
            install_command: [
                "{{ python }}",
                "-m",
                "pip",
                "install",
                "-r",
                "{{ requirements }}",
            ]
            .map(String::from)
            .to_vec(),
            test_command: ["pytest", "-vv", "-s", "--ini", "{{ config }}", "tests/"]
                .map(String::from)
                .to_vec(),
            verbosity: 2,
            default_tasks: vec!["post".to_string()],
            command_timeout_secs: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl PlanetsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(anyhow!("repo_url must be non-empty"));
        }
        validate_repo_name(&self.repo_name)?;
        if self.revision.trim().is_empty() {
            return Err(anyhow!("revision must be non-empty"));
        }
        if self.requirements_file.as_os_str().is_empty() {
            return Err(anyhow!("requirements_file must be non-empty"));
        }
        if self.required_tools.iter().any(|tool| tool.trim().is_empty()) {
            return Err(anyhow!("required_tools entries must be non-empty"));
        }
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must be non-empty"));
        }
        if self.install_command.is_empty() || self.install_command[0].trim().is_empty() {
            return Err(anyhow!("install_command must be a non-empty array"));
        }
        if self.test_command.is_empty() || self.test_command[0].trim().is_empty() {
            return Err(anyhow!("test_command must be a non-empty array"));
        }
        if self.verbosity > 2 {
            return Err(anyhow!("verbosity must be 0, 1 or 2"));
        }
        if self.command_timeout_secs == Some(0) {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

fn validate_repo_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("repo_name must be non-empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(anyhow!("repo_name must not contain path separators"));
    }
    if name == "." || name == ".." {
        return Err(anyhow!("repo_name must name a directory"));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlanetsConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlanetsConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = PlanetsConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlanetsConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Configuration resolved for one invocation: project root plus config with
/// environment overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub root: PathBuf,
    pub config: PlanetsConfig,
}

impl Settings {
    /// Apply environment overrides using `lookup` (an empty value counts as unset).
    pub fn resolve(
        root: impl Into<PathBuf>,
        mut config: PlanetsConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(revision) = lookup(REVISION_ENV).filter(|value| !value.trim().is_empty()) {
            debug!(%revision, "revision overridden from environment");
            config.revision = revision;
        }
        config.validate()?;
        Ok(Self {
            root: root.into(),
            config,
        })
    }

    /// Resolve against the process environment.
    pub fn from_env(root: impl Into<PathBuf>, config: PlanetsConfig) -> Result<Self> {
        Self::resolve(root, config, |key| std::env::var(key).ok())
    }

    pub fn revision(&self) -> &str {
        &self.config.revision
    }

    pub fn checkout_dir(&self) -> PathBuf {
        self.root.join(&self.config.repo_name)
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.root.join(&self.config.requirements_file)
    }

    /// Shell honoring the configured timeout and output limit.
    pub fn shell(&self) -> SystemShell {
        SystemShell {
            timeout: self.config.command_timeout_secs.map(Duration::from_secs),
            output_limit_bytes: self.config.output_limit_bytes,
        }
    }
}
