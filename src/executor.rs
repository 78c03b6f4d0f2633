// file: src/executor.rs
// version: 2.1.0
// guid: 7e0d52c8-1f4a-4b93-bc27-a85e60d91f34

//! Centralized command execution with consistent error handling.
//!
//! All external tools are launched through [`Executor::run`], which captures
//! stdout and stderr and wraps failures with the full command line and the
//! captured output so callers (and tests) can assert on both.

use crate::error::{ImageBuildError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::debug;

/// A prepared external command.
///
/// Facades under `commands/` build these; the executor is the only place
/// that actually spawns processes.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    stdin: Option<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            stdin: None,
        }
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
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Feed the given string to the child's stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// The full command line as a single string, used in error messages.
    pub fn rendered(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout followed by stderr, the way failures are reported.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs external commands sequentially, awaiting each to completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    debug: bool,
}

impl Executor {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Verify that a program is present on the PATH.
    pub fn check_tool(&self, program: &str) -> Result<()> {
        which::which(program)
            .map(|_| ())
            .map_err(|_| ImageBuildError::ToolNotFound(program.to_string()))
    }

    /// Run a command, requiring a zero exit code.
    pub async fn run(&self, cmd: &Command) -> Result<CommandOutput> {
        let (output, code) = self.run_unchecked(cmd).await?;
        if code != 0 {
            return Err(ImageBuildError::ToolFailure {
                command: cmd.rendered(),
                output: output.combined(),
                code,
            });
        }
        Ok(output)
    }

    /// Run a command and return its output along with the exit code.
    ///
    /// Only spawn errors are reported; a non-zero exit is the caller's
    /// problem. Used for the host introspection helpers that deliberately
    /// swallow failures.
    pub async fn run_unchecked(&self, cmd: &Command) -> Result<(CommandOutput, i32)> {
        debug!("+ {}", cmd.rendered());

        let mut command = tokio::process::Command::new(cmd.program());
        command
            .args(cmd.get_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }
        if let Some(ref dir) = cmd.current_dir {
            command.current_dir(dir);
        }
        if cmd.stdin.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ImageBuildError::ToolNotFound(cmd.program().to_string())
            } else {
                ImageBuildError::IoError(e)
            }
        })?;

        if let Some(ref input) = cmd.stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                drop(stdin);
            }
        }

        let raw = child.wait_with_output().await?;
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };

        if self.debug {
            let combined = output.combined();
            if !combined.is_empty() {
                println!("{}", combined);
            }
        }

        Ok((output, raw.status.code().unwrap_or(-1)))
    }
}
