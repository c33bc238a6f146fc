//! Pure logic: no filesystem, no subprocesses.

pub mod task;
