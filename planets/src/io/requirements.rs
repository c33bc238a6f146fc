//! Requirement checks: executables on `PATH` and installed Python packages.

use std::fs::File;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::io::config::Settings;
use crate::io::shell::{Invocation, Shell, quote};

/// Resolves the requirements file (`argv[1]`) against the interpreter's
/// installed distributions. Exits non-zero with the conflict on stderr.
const PACKAGE_CHECK_SCRIPT: &str = "\
import sys, warnings
warnings.simplefilter('ignore')
import pkg_resources
try:
    pkg_resources.require(open(sys.argv[1]).read().split('\\n'))
except Exception as ex:
    sys.exit(str(ex))
";

/// Outcome of checking installed packages against the requirements file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCheck {
    Satisfied,
    Unsatisfied { detail: String },
}

impl PackageCheck {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PackageCheck::Satisfied)
    }
}

/// True iff `hash <name>` succeeds, i.e. the name resolves on `PATH`.
#[instrument(skip(shell))]
pub fn executable_present<S: Shell + ?Sized>(shell: &S, name: &str) -> Result<bool> {
    let out = shell.run(&Invocation::shell(format!("hash {}", quote(name))))?;
    debug!(code = out.code, "hash");
    Ok(out.success())
}

/// Check installed packages against the configured requirements file.
///
/// The configured interpreter resolves the file with `pkg_resources`, so
/// version ordering and environment markers follow Python packaging rules.
/// An unreadable requirements file is an error. Anything going wrong after
/// that (interpreter missing, `pkg_resources` unavailable, a conflict) means
/// unsatisfied.
#[instrument(skip_all)]
pub fn check_packages<S: Shell + ?Sized>(shell: &S, settings: &Settings) -> Result<PackageCheck> {
    let path = settings.requirements_path();
    File::open(&path).with_context(|| format!("read {}", path.display()))?;

    let invocation = Invocation::new(settings.config.python.clone())
        .arg("-c")
        .arg(PACKAGE_CHECK_SCRIPT)
        .arg(path.to_string_lossy())
        .current_dir(&settings.root);
    let out = match shell.run(&invocation) {
        Ok(out) => out,
        Err(err) => return Ok(unsatisfied(format!("{err:#}"))),
    };
    debug!(code = out.code, "package check");
    if out.success() {
        return Ok(PackageCheck::Satisfied);
    }

    let detail = match out.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => line.to_string(),
        None if out.timed_out => "package check timed out".to_string(),
        None => format!("package check failed with exit code {}", out.code),
    };
    Ok(unsatisfied(detail))
}

fn unsatisfied(detail: String) -> PackageCheck {
    warn!(%detail, "package requirements not met");
    PackageCheck::Unsatisfied { detail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::PlanetsConfig;
    use crate::io::shell::{ShellOutput, SystemShell};
    use crate::test_support::FakeShell;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn settings_with_requirements(contents: &str) -> (tempfile::TempDir, Settings) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("requirements.txt"), contents).expect("write");
        let settings =
            Settings::resolve(temp.path(), PlanetsConfig::default(), |_| None).expect("settings");
        (temp, settings)
    }

    /// Runs every command through `env PYTHONPATH=<site>` so the interpreter
    /// sees distributions installed under `site`.
    struct WithSitePackages {
        site: PathBuf,
    }

    impl Shell for WithSitePackages {
        fn run(&self, invocation: &Invocation) -> Result<ShellOutput> {
            let mut wrapped = Invocation::new("env")
                .arg(format!("PYTHONPATH={}", self.site.display()))
                .arg(invocation.program.clone())
                .args(invocation.args.iter().cloned());
            wrapped.cwd = invocation.cwd.clone();
            SystemShell::default().run(&wrapped)
        }
    }

    fn install_fake_distribution(site: &Path, name: &str, version: &str) {
        let dist_info = site.join(format!("{}-{version}.dist-info", name.replace('-', "_")));
        fs::create_dir_all(&dist_info).expect("mkdir");
        fs::write(
            dist_info.join("METADATA"),
            format!("Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n"),
        )
        .expect("write metadata");
    }

    fn pkg_resources_available() -> bool {
        let available = SystemShell::default()
            .run(&Invocation::new("python3").args(["-c", "import pkg_resources"]))
            .is_ok_and(|out| out.success());
        if !available {
            eprintln!("skipping: python3 with pkg_resources is not available");
        }
        available
    }

    #[test]
    fn finds_present_executable() {
        let shell = SystemShell::default();
        assert!(executable_present(&shell, "sh").expect("hash"));
    }

    #[test]
    fn rejects_fabricated_executable() {
        let shell = SystemShell::default();
        assert!(!executable_present(&shell, "planets-no-such-tool-7d1e").expect("hash"));
    }

    #[test]
    fn satisfied_when_interpreter_check_passes() {
        let (temp, settings) = settings_with_requirements("pytest>=7\n");
        let shell = FakeShell::succeeding();
        let check = check_packages(&shell, &settings).expect("check");
        assert_eq!(check, PackageCheck::Satisfied);

        let calls = shell.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "python3");
        assert_eq!(calls[0].args[0], "-c");
        assert_eq!(
            calls[0].args[2],
            temp.path().join("requirements.txt").to_string_lossy()
        );
        assert_eq!(calls[0].cwd.as_deref(), Some(temp.path()));
    }

    #[test]
    fn conflict_message_becomes_detail() {
        let (_temp, settings) = settings_with_requirements("pytest>=8\n");
        let shell = FakeShell::new(|_| {
            ShellOutput::exited(1).with_stderr(
                "(pytest 7.4.0 (/usr/lib/python3/site-packages), Requirement.parse('pytest>=8'))\n",
            )
        });
        let check = check_packages(&shell, &settings).expect("check");
        assert_eq!(
            check,
            PackageCheck::Unsatisfied {
                detail: "(pytest 7.4.0 (/usr/lib/python3/site-packages), Requirement.parse('pytest>=8'))"
                    .to_string()
            }
        );
    }

    #[test]
    fn silent_failure_reports_exit_code() {
        let (_temp, settings) = settings_with_requirements("pytest\n");
        let shell = FakeShell::new(|_| ShellOutput::exited(2));
        let check = check_packages(&shell, &settings).expect("check");
        assert_eq!(
            check,
            PackageCheck::Unsatisfied {
                detail: "package check failed with exit code 2".to_string()
            }
        );
    }

    #[test]
    fn missing_interpreter_is_unsatisfied_not_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("requirements.txt"), "pytest\n").expect("write");
        let config = PlanetsConfig {
            python: "planets-no-such-python-7d1e".to_string(),
            ..PlanetsConfig::default()
        };
        let settings = Settings::resolve(temp.path(), config, |_| None).expect("settings");
        let check = check_packages(&SystemShell::default(), &settings).expect("check");
        assert!(!check.is_satisfied());
    }

    #[test]
    fn missing_requirements_file_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings =
            Settings::resolve(temp.path(), PlanetsConfig::default(), |_| None).expect("settings");
        let shell = FakeShell::succeeding();
        let err = check_packages(&shell, &settings).expect_err("missing file");
        assert!(err.to_string().contains("requirements.txt"));
        assert!(shell.calls().is_empty());
    }

    #[test]
    fn prerelease_does_not_satisfy_final_release() {
        if !pkg_resources_available() {
            return;
        }
        let site = tempfile::tempdir().expect("site");
        install_fake_distribution(site.path(), "planets-fake-dist", "8.0.0rc1");
        let shell = WithSitePackages {
            site: site.path().to_path_buf(),
        };

        let (_temp, settings) = settings_with_requirements("planets-fake-dist>=8.0\n");
        let check = check_packages(&shell, &settings).expect("check");
        match check {
            PackageCheck::Unsatisfied { detail } => {
                assert!(detail.contains("8.0.0rc1"), "detail: {detail}");
            }
            PackageCheck::Satisfied => panic!("8.0.0rc1 must not satisfy >=8.0"),
        }

        let (_temp, settings) = settings_with_requirements("planets-fake-dist>=8.0rc1\n");
        assert_eq!(
            check_packages(&shell, &settings).expect("check"),
            PackageCheck::Satisfied
        );
    }

    #[test]
    fn requirement_with_inactive_marker_is_skipped() {
        if !pkg_resources_available() {
            return;
        }
        let (_temp, settings) = settings_with_requirements(
            "# py2 only\nplanets-absent-dist-7d1e; python_version < \"3\"\n\n",
        );
        assert_eq!(
            check_packages(&SystemShell::default(), &settings).expect("check"),
            PackageCheck::Satisfied
        );
    }
}
