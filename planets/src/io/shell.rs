//! Shell invoker: runs external commands and reports their exit code and output.
//!
//! A non-zero exit is data, not an error. `Err` is reserved for commands that
//! could not be spawned or waited on.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// One external command: program, arguments, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Inherit the terminal instead of capturing stdout/stderr.
    pub echo: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            echo: false,
        }
    }

    /// Run `line` through `sh -c`, for shell builtins such as `hash`.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(line)
    }

    /// Build from an argv vector (`argv[0]` is the program).
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
        if program.trim().is_empty() {
            bail!("command program must be non-empty");
        }
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cwd) = &self.cwd {
            write!(f, "cd {} && ", quote(&cwd.to_string_lossy()))?;
        }
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Process exit code; `128 + signal` when killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellOutput {
    /// A finished command with no output.
    pub fn exited(code: i32) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }

    /// Turn a failed command into an error naming `what` and the exit code.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.timed_out {
            bail!("{what} timed out");
        }
        if self.code != 0 {
            let stderr = self.stderr.trim();
            if stderr.is_empty() {
                bail!("{what} failed with exit code {}", self.code);
            }
            bail!("{what} failed with exit code {}: {stderr}", self.code);
        }
        Ok(())
    }
}

/// Runs invocations. Implemented by [`SystemShell`] and by scripted fakes in tests.
pub trait Shell {
    fn run(&self, invocation: &Invocation) -> Result<ShellOutput>;
}

impl<S: Shell + ?Sized> Shell for &S {
    fn run(&self, invocation: &Invocation) -> Result<ShellOutput> {
        (**self).run(invocation)
    }
}

/// Spawns real child processes.
#[derive(Debug, Clone)]
pub struct SystemShell {
    /// `None` blocks until the child exits.
    pub timeout: Option<Duration>,
    /// Captured bytes kept per stream; the rest is drained and discarded.
    pub output_limit_bytes: usize,
}

impl Default for SystemShell {
    fn default() -> Self {
        Self {
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

impl Shell for SystemShell {
    #[instrument(skip_all, fields(command = %invocation, echo = invocation.echo))]
    fn run(&self, invocation: &Invocation) -> Result<ShellOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdin(Stdio::null());
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        if invocation.echo {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        debug!("spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(e).with_context(|| format!("spawn {}", invocation.program));
            }
        };

        // Pipes are drained concurrently so a chatty child cannot fill them and block.
        let readers: Option<(ReaderHandle, ReaderHandle)> = if invocation.echo {
            None
        } else {
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("stdout was not piped"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| anyhow!("stderr was not piped"))?;
            let limit = self.output_limit_bytes;
            Some((
                thread::spawn(move || read_stream_limited(stdout, limit)),
                thread::spawn(move || read_stream_limited(stderr, limit)),
            ))
        };

        let mut timed_out = false;
        let status = match self.timeout {
            None => child.wait().context("wait for command")?,
            Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
                Some(status) => status,
                None => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        "command timed out, killing"
                    );
                    timed_out = true;
                    child.kill().context("kill command")?;
                    child.wait().context("wait command after kill")?
                }
            },
        };

        let (stdout, stderr) = match readers {
            Some((stdout_handle, stderr_handle)) => {
                let (stdout, stdout_truncated) =
                    join_output(stdout_handle).context("join stdout")?;
                let (stderr, stderr_truncated) =
                    join_output(stderr_handle).context("join stderr")?;
                if stdout_truncated > 0 || stderr_truncated > 0 {
                    warn!(stdout_truncated, stderr_truncated, "output truncated");
                }
                (
                    String::from_utf8_lossy(&stdout).into_owned(),
                    String::from_utf8_lossy(&stderr).into_owned(),
                )
            }
            None => (String::new(), String::new()),
        };

        let code = exit_code(status);
        debug!(code, timed_out, "command finished");
        Ok(ShellOutput {
            code,
            stdout,
            stderr,
            timed_out,
        })
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn join_output(handle: ReaderHandle) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Quote a word for display or for embedding in an `sh -c` line.
pub fn quote(input: &str) -> String {
    if !input.is_empty()
        && input
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return input.to_string();
    }
    let mut escaped = String::from("'");
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_output() {
        let shell = SystemShell::default();
        let out = shell
            .run(&Invocation::shell("echo out; echo err >&2; exit 7"))
            .expect("run");
        assert_eq!(out.code, 7);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[test]
    fn runs_in_requested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let shell = SystemShell::default();
        let out = shell
            .run(&Invocation::new("ls").current_dir(temp.path()))
            .expect("run");
        assert!(out.success());
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn truncates_captured_output() {
        let shell = SystemShell {
            timeout: None,
            output_limit_bytes: 4,
        };
        let out = shell
            .run(&Invocation::shell("printf 0123456789"))
            .expect("run");
        assert_eq!(out.stdout, "0123");
    }

    #[test]
    fn kills_command_after_timeout() {
        let shell = SystemShell {
            timeout: Some(Duration::from_millis(200)),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        };
        let out = shell.run(&Invocation::new("sleep").arg("5")).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.check("sleep").is_err());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let shell = SystemShell::default();
        let err = shell
            .run(&Invocation::new("planets-no-such-program-9f3c"))
            .expect_err("spawn fails");
        assert!(err.to_string().contains("spawn"));
    }

    #[test]
    fn check_reports_exit_code_and_stderr() {
        let out = ShellOutput::exited(128).with_stderr("fatal: repository not found\n");
        let err = out.check("git clone").expect_err("failed");
        assert_eq!(
            err.to_string(),
            "git clone failed with exit code 128: fatal: repository not found"
        );
        assert!(ShellOutput::exited(0).check("git clone").is_ok());
    }

    #[test]
    fn displays_invocation_as_shell_line() {
        let inv = Invocation::new("git")
            .args(["commit", "-m", "hello world"])
            .current_dir("/tmp/repo");
        assert_eq!(inv.to_string(), "cd /tmp/repo && git commit -m 'hello world'");
    }

    #[test]
    fn from_argv_rejects_empty_command() {
        assert!(Invocation::from_argv(&[]).is_err());
        let inv = Invocation::from_argv(&["pytest".to_string(), "-vv".to_string()]).expect("argv");
        assert_eq!(inv.program, "pytest");
        assert_eq!(inv.args, vec!["-vv"]);
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(quote("it's"), "'it'\"'\"'s'");
        assert_eq!(quote(""), "''");
    }
}
