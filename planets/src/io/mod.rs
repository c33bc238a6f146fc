//! I/O helpers for planets commands.

pub mod config;
pub mod git;
pub mod requirements;
pub mod shell;
