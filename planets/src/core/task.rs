//! Task declarations and execution planning.
//!
//! A [`TaskGroup`] is what a user names on the command line (`reqs`, `test`,
//! `tidy`); its [`TaskDecl`]s are the units that actually run (`reqs:check-hash-git`,
//! `test:<planet>`). Dependencies may name either.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow, bail};

use crate::io::shell::Invocation;

/// What a task does when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a command; non-zero exit fails the task.
    Command(Invocation),
    /// Fail unless the executable resolves on `PATH`.
    CheckExecutable(String),
}

/// Predicate that lets a task be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpToDate {
    /// Installed packages already satisfy the requirements file.
    PackagesSatisfied,
}

/// One runnable task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDecl {
    /// Full name: `group:sub`, or just `group` for single-task groups.
    pub name: String,
    pub action: Action,
    /// Group or task names that must succeed first.
    pub task_dep: Vec<String>,
    pub uptodate: Option<UpToDate>,
}

impl TaskDecl {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
            task_dep: Vec::new(),
            uptodate: None,
        }
    }

    pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
        self.task_dep.push(dep.into());
        self
    }

    pub fn uptodate(mut self, check: UpToDate) -> Self {
        self.uptodate = Some(check);
        self
    }
}

/// A named group of tasks with a one-line description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup {
    pub name: String,
    pub doc: String,
    pub tasks: Vec<TaskDecl>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            tasks: Vec::new(),
        }
    }

    /// Add `group:sub`.
    pub fn subtask(mut self, sub: &str, action: Action) -> Self {
        let name = format!("{}:{}", self.name, sub);
        self.tasks.push(TaskDecl::new(name, action));
        self
    }

    pub fn push(&mut self, task: TaskDecl) {
        self.tasks.push(task);
    }
}

/// A task scheduled to run, with its dependencies expanded to task names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask<'a> {
    pub task: &'a TaskDecl,
    pub deps: Vec<String>,
}

/// Order the tasks needed for `requested`: dependencies first, each task once,
/// otherwise in declaration order.
pub fn plan<'a>(groups: &'a [TaskGroup], requested: &[String]) -> Result<Vec<PlannedTask<'a>>> {
    let index = Index::new(groups)?;
    let mut planner = Planner {
        index: &index,
        visiting: BTreeSet::new(),
        planned: BTreeSet::new(),
        order: Vec::new(),
    };
    for name in requested {
        for task in index.expand(name)? {
            planner.visit(task)?;
        }
    }
    Ok(planner.order)
}

struct Index<'a> {
    groups: BTreeMap<&'a str, &'a TaskGroup>,
    tasks: BTreeMap<&'a str, &'a TaskDecl>,
}

impl<'a> Index<'a> {
    fn new(groups: &'a [TaskGroup]) -> Result<Self> {
        let mut index = Index {
            groups: BTreeMap::new(),
            tasks: BTreeMap::new(),
        };
        for group in groups {
            if index.groups.insert(group.name.as_str(), group).is_some() {
                bail!("duplicate task group '{}'", group.name);
            }
            for task in &group.tasks {
                if index.tasks.insert(task.name.as_str(), task).is_some() {
                    bail!("duplicate task '{}'", task.name);
                }
            }
        }
        Ok(index)
    }

    /// Group name → its tasks; task name → itself.
    fn expand(&self, name: &str) -> Result<Vec<&'a TaskDecl>> {
        if let Some(&group) = self.groups.get(name) {
            return Ok(group.tasks.iter().collect());
        }
        if let Some(&task) = self.tasks.get(name) {
            return Ok(vec![task]);
        }
        Err(anyhow!(
            "unknown task '{}' (known: {})",
            name,
            self.groups.keys().copied().collect::<Vec<_>>().join(", ")
        ))
    }
}

struct Planner<'i, 'a> {
    index: &'i Index<'a>,
    visiting: BTreeSet<&'a str>,
    planned: BTreeSet<&'a str>,
    order: Vec<PlannedTask<'a>>,
}

impl<'a> Planner<'_, 'a> {
    fn visit(&mut self, task: &'a TaskDecl) -> Result<()> {
        if self.planned.contains(task.name.as_str()) {
            return Ok(());
        }
        if !self.visiting.insert(task.name.as_str()) {
            bail!("dependency cycle through '{}'", task.name);
        }
        let mut deps = Vec::new();
        for dep in &task.task_dep {
            for dep_task in self.index.expand(dep)? {
                self.visit(dep_task)?;
                deps.push(dep_task.name.clone());
            }
        }
        self.visiting.remove(task.name.as_str());
        self.planned.insert(task.name.as_str());
        self.order.push(PlannedTask { task, deps });
        Ok(())
    }
}
