//! CLI command implementations.

use std::io::Write;

use anyhow::Result;
use tracing::{debug, info};

use crate::core::task::Action;
use crate::engine::{Engine, RunOptions};
use crate::exit_codes;
use crate::io::config::Settings;
use crate::io::shell::Shell;
use crate::tasks::{GROUPS, declare};

/// Run the named tasks (or the configured defaults) and return the exit code.
pub fn run_tasks<S: Shell + ?Sized, W: Write>(
    shell: &S,
    settings: &Settings,
    tasks: &[String],
    options: RunOptions,
    mut out: W,
) -> Result<i32> {
    let requested = if tasks.is_empty() {
        debug!(defaults = ?settings.config.default_tasks, "no tasks named, using defaults");
        settings.config.default_tasks.clone()
    } else {
        tasks.to_vec()
    };

    let groups = declare(shell, settings, &requested, false, &mut out)?;
    let report = Engine::new(shell, settings, options, out).run(&groups, &requested)?;
    info!(succeeded = report.succeeded(), "tasks finished");
    Ok(if report.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::TASK_FAILED
    })
}

/// Print task groups; with `all`, also declare `test` and print every task.
pub fn list_tasks<S: Shell + ?Sized, W: Write>(
    shell: &S,
    settings: &Settings,
    all: bool,
    mut out: W,
) -> Result<()> {
    if !all {
        for (name, doc) in GROUPS {
            writeln!(out, "{name:<8} {doc}")?;
        }
        return Ok(());
    }

    for group in declare(shell, settings, &[], true, &mut out)? {
        writeln!(out, "{:<8} {}", group.name, group.doc)?;
        for task in &group.tasks {
            if task.name == group.name {
                continue;
            }
            match &task.action {
                Action::Command(invocation) => {
                    writeln!(out, "  {}  ({invocation})", task.name)?;
                }
                Action::CheckExecutable(name) => {
                    writeln!(out, "  {}  (hash {name})", task.name)?;
                }
            }
        }
    }
    Ok(())
}
