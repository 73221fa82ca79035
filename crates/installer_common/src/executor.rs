//! Executor - the single seam through which OS utilities are run
//!
//! Account creation, ownership changes and init-system commands all go
//! through `Executor::run`, so orchestration logic can be exercised without a
//! real host. A spawn failure is an error; a non-zero exit is returned as data
//! and judged by the caller.

use crate::error::{InstallError, Result};
use std::process::Command;
use std::time::Instant;
use tracing::debug;

/// Maximum stderr length carried into error messages
const MAX_STDERR_CHARS: usize = 2048;

/// A command to run on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub envs: Vec<(String, String)>,
    /// Run as this account instead of the installer's own
    pub run_as: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            run_as: None,
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
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    /// Shell-like rendering for logs and error messages
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        let line = parts.join(" ");
        match &self.run_as {
            Some(user) => format!("[{}] {}", user, line),
            None => line,
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `InstallError::CommandFailed`
    pub fn check(self, cmd: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            let mut stderr = self.stderr.trim().to_string();
            if stderr.len() > MAX_STDERR_CHARS {
                let mut cut = MAX_STDERR_CHARS;
                while !stderr.is_char_boundary(cut) {
                    cut -= 1;
                }
                stderr.truncate(cut);
            }
            Err(InstallError::CommandFailed {
                command: cmd.display(),
                code: self.exit_code,
                stderr,
            })
        }
    }
}

/// Runs commands on the host
pub trait Executor {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Run and require exit code 0
    fn run_checked(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        self.run(cmd)?.check(cmd)
    }
}

/// Executor backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn build(cmd: &CommandSpec) -> Command {
        let mut command = match &cmd.run_as {
            Some(user) => {
                let mut c = Command::new("runuser");
                c.args(["-u", user.as_str(), "--", cmd.program.as_str()]);
                c
            }
            None => Command::new(&cmd.program),
        };
        command.args(&cmd.args);
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }
        command
    }
}

impl Executor for SystemExecutor {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        debug!("Executing: {}", cmd.display());
        let started = Instant::now();

        let output = Self::build(cmd)
            .output()
            .map_err(|source| InstallError::Spawn {
                command: cmd.display(),
                source,
            })?;

        let result = CommandOutput {
            // Killed by a signal: no code, report as failure
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(
            "`{}` exited with {} after {}ms",
            cmd.program,
            result.exit_code,
            started.elapsed().as_millis()
        );
        Ok(result)
    }
}
