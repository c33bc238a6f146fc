//! Task declarations: `reqs`, `test` and `tidy`.
//!
//! Declaring `test` runs planet discovery (clone + checkout), so it is only
//! declared when something asks for it.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, Value, context};
use tracing::{debug, instrument};

use crate::core::task::{Action, TaskDecl, TaskGroup, UpToDate};
use crate::discovery::discover_planets;
use crate::io::config::Settings;
use crate::io::git::clean_invocation;
use crate::io::shell::{Invocation, Shell};

pub const REQS: &str = "reqs";
pub const TEST: &str = "test";
pub const TIDY: &str = "tidy";

/// Group names with their one-line docs, in declaration order.
pub const GROUPS: [(&str, &str); 3] = [
    (REQS, "check for required software"),
    (TEST, "run pytest once per planet"),
    (TIDY, "clean repo"),
];

fn doc(group: &str) -> &'static str {
    GROUPS
        .iter()
        .find(|(name, _)| *name == group)
        .map_or("", |&(_, doc)| doc)
}

/// One `check-hash-<tool>` per required tool, then the requirements install.
pub fn reqs_group(settings: &Settings) -> Result<TaskGroup> {
    let mut group = TaskGroup::new(REQS, doc(REQS));
    for tool in &settings.config.required_tools {
        group = group.subtask(
            &format!("check-hash-{tool}"),
            Action::CheckExecutable(tool.clone()),
        );
    }

    let requirements = settings.config.requirements_file.to_string_lossy().into_owned();
    let install = render_command(
        &settings.config.install_command,
        context! { python => &settings.config.python, requirements => &requirements },
    )
    .context("render install_command")?
    .current_dir(&settings.root);
    group.push(
        TaskDecl::new(
            format!("{REQS}:{requirements}"),
            Action::Command(install),
        )
        .uptodate(UpToDate::PackagesSatisfied),
    );
    Ok(group)
}

/// Discover planets and declare `test:<planet>` for each, depending on `reqs`.
///
/// Writes `planets=[...]` and one `planet=<name>` line per planet to `out`.
#[instrument(skip_all)]
pub fn test_group<S: Shell + ?Sized, W: Write>(
    shell: &S,
    settings: &Settings,
    out: &mut W,
) -> Result<TaskGroup> {
    let planets = discover_planets(shell, settings).context("discover planets")?;
    let names: Vec<&str> = planets.iter().map(|p| p.name.as_str()).collect();
    debug!(count = names.len(), "declaring test tasks");
    writeln!(out, "planets={names:?}")?;

    let mut group = TaskGroup::new(TEST, doc(TEST));
    for planet in &planets {
        writeln!(out, "planet={}", planet.name)?;
        let config = display_relative(&planet.config_path, &settings.root);
        let command = render_command(
            &settings.config.test_command,
            context! { planet => &planet.name, config => &config },
        )
        .with_context(|| format!("render test_command for {}", planet.name))?
        .current_dir(&settings.root);
        group.push(
            TaskDecl::new(format!("{TEST}:{}", planet.name), Action::Command(command))
                .depends_on(REQS),
        );
    }
    Ok(group)
}

/// Single task: remove untracked and ignored files from the project tree.
pub fn tidy_group(settings: &Settings) -> TaskGroup {
    let mut group = TaskGroup::new(TIDY, doc(TIDY));
    group.push(TaskDecl::new(
        TIDY,
        Action::Command(clean_invocation(&settings.root)),
    ));
    group
}

/// Declare the groups needed for `requested`, in declaration order.
///
/// `test` is declared when requested (as a group or `test:<planet>`) or when
/// `all` is set. Discovery output goes to `out`.
pub fn declare<S: Shell + ?Sized, W: Write>(
    shell: &S,
    settings: &Settings,
    requested: &[String],
    all: bool,
    out: &mut W,
) -> Result<Vec<TaskGroup>> {
    let wants_test = all || requested.iter().any(|name| belongs_to(name, TEST));
    let mut groups = vec![reqs_group(settings)?];
    if wants_test {
        groups.push(test_group(shell, settings, out)?);
    }
    groups.push(tidy_group(settings));
    Ok(groups)
}

fn belongs_to(name: &str, group: &str) -> bool {
    name == group
        || name
            .strip_prefix(group)
            .is_some_and(|rest| rest.starts_with(':'))
}

/// Render each argv element as a template, then build an invocation.
fn render_command(template: &[String], ctx: Value) -> Result<Invocation> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let argv = template
        .iter()
        .map(|arg| {
            env.render_str(arg, &ctx)
                .with_context(|| format!("render '{arg}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    Invocation::from_argv(&argv)
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::plan;
    use crate::discovery::{BRANCHES_DIR, PLANET_CONFIG};
    use crate::io::config::PlanetsConfig;
    use crate::test_support::FakeShell;
    use std::fs;

    fn settings(root: &Path) -> Settings {
        Settings::resolve(root, PlanetsConfig::default(), |_| None).expect("settings")
    }

    fn names(group: &TaskGroup) -> Vec<&str> {
        group.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    fn seed_planets(settings: &Settings, planets: &[&str]) {
        for planet in planets {
            let dir = settings.checkout_dir().join(BRANCHES_DIR).join(planet);
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(dir.join(PLANET_CONFIG), "").expect("write");
        }
    }

    #[test]
    fn reqs_declares_tool_checks_and_install() {
        let settings = settings(Path::new("/srv/planets"));
        let group = reqs_group(&settings).expect("reqs");
        assert_eq!(
            names(&group),
            vec![
                "reqs:check-hash-git",
                "reqs:check-hash-pip",
                "reqs:requirements.txt"
            ]
        );
        let install = &group.tasks[2];
        assert_eq!(install.uptodate, Some(UpToDate::PackagesSatisfied));
        match &install.action {
            Action::Command(inv) => assert_eq!(
                inv.to_string(),
                "cd /srv/planets && python3 -m pip install -r requirements.txt"
            ),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_tasks_point_at_planet_configs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path());
        seed_planets(&settings, &["mozilla", "firefox"]);
        let shell = FakeShell::succeeding();

        let mut out = Vec::new();
        let group = test_group(&shell, &settings, &mut out).expect("test");
        assert_eq!(names(&group), vec!["test:firefox", "test:mozilla"]);
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "planets=[\"firefox\", \"mozilla\"]\nplanet=firefox\nplanet=mozilla\n"
        );
        let task = &group.tasks[0];
        assert_eq!(task.task_dep, vec![REQS]);
        match &task.action {
            Action::Command(inv) => {
                assert_eq!(inv.program, "pytest");
                assert_eq!(
                    inv.args,
                    vec![
                        "-vv",
                        "-s",
                        "--ini",
                        "planet-content/branches/firefox/config.ini",
                        "tests/"
                    ]
                );
                assert_eq!(inv.cwd.as_deref(), Some(temp.path()));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn custom_test_command_can_use_planet_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = PlanetsConfig {
            test_command: ["tox", "-e", "{{ planet }}"].map(String::from).to_vec(),
            ..PlanetsConfig::default()
        };
        let settings = Settings::resolve(temp.path(), config, |_| None).expect("settings");
        seed_planets(&settings, &["mozilla"]);

        let group = test_group(&FakeShell::succeeding(), &settings, &mut std::io::sink()).expect("test");
        match &group.tasks[0].action {
            Action::Command(inv) => assert_eq!(inv.args, vec!["-e", "mozilla"]),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn unknown_template_variable_is_error() {
        let config = PlanetsConfig {
            install_command: ["pip", "install", "{{ nope }}"].map(String::from).to_vec(),
            ..PlanetsConfig::default()
        };
        let settings = Settings::resolve("/srv", config, |_| None).expect("settings");
        assert!(reqs_group(&settings).is_err());
    }

    #[test]
    fn tidy_runs_git_clean_in_root() {
        let group = tidy_group(&settings(Path::new("/srv/planets")));
        assert_eq!(names(&group), vec!["tidy"]);
        assert_eq!(
            group.tasks[0].action,
            Action::Command(clean_invocation(Path::new("/srv/planets")))
        );
    }

    #[test]
    fn tidy_does_not_trigger_discovery() {
        let shell = FakeShell::succeeding();
        let settings = settings(Path::new("/srv/planets"));
        let groups = declare(
            &shell,
            &settings,
            &["tidy".to_string()],
            false,
            &mut Vec::new(),
        )
        .expect("declare");
        let group_names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(group_names, vec![REQS, TIDY]);
        assert!(shell.calls().is_empty());
    }

    #[test]
    fn test_plan_runs_reqs_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = settings(temp.path());
        seed_planets(&settings, &["mozilla"]);
        let shell = FakeShell::succeeding();

        let requested = ["test:mozilla".to_string()];
        let groups =
            declare(&shell, &settings, &requested, false, &mut std::io::sink()).expect("declare");
        let planned = plan(&groups, &requested).expect("plan");
        let order: Vec<&str> = planned.iter().map(|p| p.task.name.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "reqs:check-hash-git",
                "reqs:check-hash-pip",
                "reqs:requirements.txt",
                "test:mozilla"
            ]
        );
    }

    #[test]
    fn matches_group_prefix_only_at_separator() {
        assert!(belongs_to("test", TEST));
        assert!(belongs_to("test:mozilla", TEST));
        assert!(!belongs_to("testing", TEST));
    }
}
