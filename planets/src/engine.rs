//! Sequential task engine.
//!
//! Runs a plan from [`crate::core::task::plan`] one task at a time. Progress
//! goes to the provided writer: `.  name` when a task runs, `-- name` when it
//! is up to date.

use std::collections::BTreeSet;
use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::task::{Action, TaskDecl, TaskGroup, UpToDate, plan};
use crate::io::config::Settings;
use crate::io::requirements::{PackageCheck, check_packages, executable_present};
use crate::io::shell::Shell;

/// How one task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Ran,
    UpToDate,
    Failed { reason: String },
    /// Not run because a dependency failed.
    DependencyFailed { dependency: String },
}

impl TaskStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed { .. } | TaskStatus::DependencyFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub name: String,
    pub status: TaskStatus,
    pub elapsed: Duration,
}

/// Results in execution order. Tasks after a stop are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.results.iter().any(|r| r.status.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn status_of(&self, name: &str) -> Option<&TaskStatus> {
        self.results
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// 0 captures command output, 1 also prints stderr, 2 streams everything.
    pub verbosity: u8,
    /// Keep going after a failure (dependents of the failed task still skip).
    pub continue_on_failure: bool,
}

pub struct Engine<'a, S: Shell + ?Sized, W: Write> {
    shell: &'a S,
    settings: &'a Settings,
    options: RunOptions,
    out: W,
}

impl<'a, S: Shell + ?Sized, W: Write> Engine<'a, S, W> {
    pub fn new(shell: &'a S, settings: &'a Settings, options: RunOptions, out: W) -> Self {
        Self {
            shell,
            settings,
            options,
            out,
        }
    }

    /// Plan `requested` against `groups` and run it.
    ///
    /// Errors only when planning fails or progress cannot be written; task
    /// failures are reported in the returned [`RunReport`].
    #[instrument(skip_all, fields(requested = ?requested))]
    pub fn run(&mut self, groups: &[TaskGroup], requested: &[String]) -> Result<RunReport> {
        let planned = plan(groups, requested)?;
        debug!(tasks = planned.len(), "plan ready");

        let mut report = RunReport::default();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        for step in planned {
            let started = Instant::now();
            let status = match step.deps.iter().find(|dep| failed.contains(*dep)) {
                Some(dependency) => {
                    writeln!(self.out, "!! {} (dependency {} failed)", step.task.name, dependency)?;
                    TaskStatus::DependencyFailed {
                        dependency: dependency.clone(),
                    }
                }
                None => self.execute(step.task)?,
            };
            let stop = status.is_failure() && !self.options.continue_on_failure;
            if status.is_failure() {
                failed.insert(step.task.name.clone());
            }
            report.results.push(TaskResult {
                name: step.task.name.clone(),
                status,
                elapsed: started.elapsed(),
            });
            if stop {
                warn!(task = %step.task.name, "stopping after failure");
                break;
            }
        }

        for failure in report.failures() {
            if let TaskStatus::Failed { reason } = &failure.status {
                writeln!(self.out, "TaskFailed - {}: {}", failure.name, reason)?;
            }
        }
        info!(
            tasks = report.results.len(),
            succeeded = report.succeeded(),
            "run finished"
        );
        Ok(report)
    }

    fn execute(&mut self, task: &TaskDecl) -> Result<TaskStatus> {
        if let Some(check) = task.uptodate {
            match self.is_up_to_date(check) {
                Ok(true) => {
                    writeln!(self.out, "-- {}", task.name)?;
                    return Ok(TaskStatus::UpToDate);
                }
                Ok(false) => {}
                Err(err) => {
                    writeln!(self.out, ".  {}", task.name)?;
                    return Ok(TaskStatus::Failed {
                        reason: format!("up-to-date check failed: {err:#}"),
                    });
                }
            }
        }

        writeln!(self.out, ".  {}", task.name)?;
        self.out.flush()?;
        match &task.action {
            Action::CheckExecutable(name) => match executable_present(self.shell, name) {
                Ok(true) => Ok(TaskStatus::Ran),
                Ok(false) => Ok(TaskStatus::Failed {
                    reason: format!("{name} not found on PATH"),
                }),
                Err(err) => Ok(TaskStatus::Failed {
                    reason: format!("{err:#}"),
                }),
            },
            Action::Command(invocation) => {
                let invocation = invocation.clone().echo(self.options.verbosity >= 2);
                let out = match self.shell.run(&invocation) {
                    Ok(out) => out,
                    Err(err) => {
                        return Ok(TaskStatus::Failed {
                            reason: format!("{err:#}"),
                        });
                    }
                };
                let failed = !out.success();
                if failed && self.options.verbosity == 0 {
                    self.out.write_all(out.stdout.as_bytes())?;
                }
                if failed || self.options.verbosity == 1 {
                    self.out.write_all(out.stderr.as_bytes())?;
                }
                if out.timed_out {
                    return Ok(TaskStatus::Failed {
                        reason: format!("command timed out: {invocation}"),
                    });
                }
                if failed {
                    return Ok(TaskStatus::Failed {
                        reason: format!("command failed with exit code {}: {invocation}", out.code),
                    });
                }
                Ok(TaskStatus::Ran)
            }
        }
    }

    fn is_up_to_date(&mut self, check: UpToDate) -> Result<bool> {
        match check {
            UpToDate::PackagesSatisfied => {
                match check_packages(self.shell, self.settings)? {
                    PackageCheck::Satisfied => Ok(true),
                    PackageCheck::Unsatisfied { detail } => {
                        writeln!(self.out, "{detail}")?;
                        Ok(false)
                    }
                }
            }
        }
    }
}
