//! Test orchestration for planet configurations.
//!
//! A planet is a directory under `branches/` of the external planet-content
//! repository that carries a `config.ini`. This crate declares the tasks that
//! prepare a machine (`reqs`), fetch the content repository and run the test
//! suite once per planet (`test`), and clean the working tree (`tidy`).
//!
//! - **[`core`]**: Pure logic (task plans). No I/O.
//! - **[`io`]**: Side-effecting operations (subprocesses, git, config files).
//!
//! Orchestration modules ([`fetch`], [`discovery`], [`tasks`], [`engine`],
//! [`cli`]) coordinate core logic with I/O to implement the CLI commands.

pub mod cli;
pub mod core;
pub mod discovery;
pub mod engine;
pub mod exit_codes;
pub mod fetch;
pub mod io;
pub mod logging;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
