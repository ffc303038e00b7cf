//! External tool invocation.
//!
//! Every compile, link, convert and flash step is one blocking call through
//! [`ToolRunner`]. The runner returns a structured [`ToolOutput`]; turning a
//! non-zero status into an error is the caller's decision.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BuildError;

/// A fully synthesized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Invocation {
    /// Start a command line for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Program to execute.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments, excluding the program.
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// The argument following the first `flag`, e.g. the `-o` target.
    pub fn value_after(&self, flag: &str) -> Option<&OsStr> {
        let mut it = self.args.iter();
        it.find(|a| a.as_os_str() == flag)?;
        it.next().map(OsString::as_os_str)
    }

    /// File name of the program, used as the tool name in diagnostics.
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program.display())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Result of one finished external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Output of a process that exited with `code` and printed nothing.
    pub fn exited(code: i32) -> Self {
        Self {
            status: Some(code),
            ..Self::default()
        }
    }

    /// `true` for exit code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Convert a non-zero exit into [`BuildError::ToolFailed`].
    pub fn check(self, invocation: &Invocation) -> Result<Self, BuildError> {
        if self.success() {
            return Ok(self);
        }
        tracing::warn!(
            tool = %invocation.tool_name(),
            status = ?self.status,
            "{}",
            self.stderr.trim_end()
        );
        Err(BuildError::ToolFailed {
            tool: invocation.tool_name(),
            status: self.status,
            stderr: self.stderr,
        })
    }
}

/// Executes external tools. Implemented by [`SystemRunner`] for real
/// processes and by recording fakes in tests.
pub trait ToolRunner {
    /// Run `invocation` to completion and capture its output.
    ///
    /// Captured output suits compilers, whose diagnostics are reported on
    /// failure.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError>;

    /// Run `invocation` with inherited stdio, so progress from interactive
    /// tools (the flasher) reaches the terminal as it happens.
    fn run_attached(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        self.run(invocation)
    }
}

impl<R: ToolRunner + ?Sized> ToolRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        (**self).run(invocation)
    }

    fn run_attached(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        (**self).run_attached(invocation)
    }
}

/// Runs tools as child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.arguments());
        cmd
    }

    fn spawn_error(invocation: &Invocation, source: std::io::Error) -> BuildError {
        BuildError::Spawn {
            program: invocation.program().to_path_buf(),
            source,
        }
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        tracing::debug!("{invocation}");
        let output = Self::command(invocation)
            .output()
            .map_err(|e| Self::spawn_error(invocation, e))?;
        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_attached(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        tracing::debug!("{invocation}");
        let status = Self::command(invocation)
            .status()
            .map_err(|e| Self::spawn_error(invocation, e))?;
        Ok(ToolOutput {
            status: status.code(),
            ..ToolOutput::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn value_after_finds_output_path() {
        let inv = Invocation::new("gcc").args(["-c", "a.c", "-o", "a.o"]);
        assert_eq!(inv.value_after("-o"), Some(OsStr::new("a.o")));
        assert_eq!(inv.value_after("-T"), None);
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let inv = Invocation::new("gcc").args(["-c", "my file.c"]);
        assert_eq!(inv.to_string(), "\"gcc\" -c \"my file.c\"");
    }

    #[test]
    fn check_turns_nonzero_exit_into_tool_failure() {
        let inv = Invocation::new("/opt/bin/riscv64-vega-elf-gcc.exe");
        let err = ToolOutput::exited(1).check(&inv).unwrap_err();
        match err {
            BuildError::ToolFailed { tool, status, .. } => {
                assert_eq!(tool, "riscv64-vega-elf-gcc");
                assert_eq!(status, Some(1));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let inv = Invocation::new("/definitely/not/a/real/tool");
        assert!(matches!(
            SystemRunner.run(&inv),
            Err(BuildError::Spawn { .. })
        ));
    }
}
