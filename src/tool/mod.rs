//! External tool invocation contract.
//!
//! Every stage that shells out describes the call as a [`ToolInvocation`]
//! (program, ordered arguments, working directory, inputs, expected outputs
//! and timeout) and hands it to a [`ToolRunner`]. The production runner is
//! [`ProcessRunner`]; tests substitute recording fakes. [`run_with_retry`]
//! applies the per-tool [`RetryPolicy`].

mod error;
mod process;
mod programs;

pub use error::ToolError;
pub use process::ProcessRunner;
pub use programs::{ConfiguratorPrograms, ToolSet};

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Role an external tool plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Copies source trees into the workspace.
    SourceCopy,
    /// Generates configuration sources from application metadata.
    Configurator,
    /// Fortran preprocessor.
    Preprocessor,
    /// Domain-specific source transformer.
    Transformer,
    /// Fortran compiler.
    Compiler,
    /// Object archiver.
    Archiver,
    /// Executable linker.
    Linker,
}

impl ToolKind {
    /// How failures of this tool are treated.
    #[must_use]
    pub const fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::SourceCopy => RetryPolicy::Retryable,
            Self::Configurator
            | Self::Preprocessor
            | Self::Transformer
            | Self::Compiler
            | Self::Archiver
            | Self::Linker => RetryPolicy::Fatal,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceCopy => "source copier",
            Self::Configurator => "configurator",
            Self::Preprocessor => "preprocessor",
            Self::Transformer => "transformer",
            Self::Compiler => "compiler",
            Self::Archiver => "archiver",
            Self::Linker => "linker",
        };
        f.write_str(name)
    }
}

/// Whether a failed invocation may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fail the stage on the first error.
    Fatal,
    /// Retry a bounded number of times.
    Retryable,
}

/// One call to an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Role of the tool.
    pub kind: ToolKind,
    /// Executable name or path.
    pub program: String,
    /// Arguments in order, passed verbatim.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Utf8PathBuf,
    /// Files the tool reads.
    pub inputs: Vec<Utf8PathBuf>,
    /// Files the tool is expected to write.
    pub outputs: Vec<Utf8PathBuf>,
    /// Time after which the tool is killed.
    pub timeout: Duration,
}

impl ToolInvocation {
    /// Start describing a call to `program` in `cwd`.
    #[must_use]
    pub fn new(kind: ToolKind, program: impl Into<String>, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            kind,
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Record an input file and append it as an argument.
    #[must_use]
    pub fn input_arg(mut self, input: &Utf8Path) -> Self {
        self.inputs.push(input.to_owned());
        self.arg(input.as_str())
    }

    /// Record an input file without adding an argument.
    #[must_use]
    pub fn input(mut self, input: &Utf8Path) -> Self {
        self.inputs.push(input.to_owned());
        self
    }

    /// Record an expected output file without adding an argument.
    #[must_use]
    pub fn output(mut self, output: &Utf8Path) -> Self {
        self.outputs.push(output.to_owned());
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as a single shell-quoted string, for logs.
    #[must_use]
    pub fn command_line(&self) -> String {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words).unwrap_or_else(|_| {
            let mut line = self.program.clone();
            for arg in &self.args {
                line.push(' ');
                line.push_str(arg);
            }
            line
        })
    }
}

/// Executes tool invocations.
///
/// Implementations must be shareable across worker threads.
#[cfg_attr(test, mockall::automock)]
pub trait ToolRunner: Send + Sync {
    /// Run `invocation` to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] if the tool cannot start, times out or exits
    /// unsuccessfully.
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError>;
}

/// Bounded retries for [`RetryPolicy::Retryable`] tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; later retries wait proportionally longer.
    pub backoff: Duration,
}

/// Run `invocation`, retrying retryable failures up to `settings.retries`
/// times.
///
/// # Errors
///
/// Returns the last [`ToolError`] once attempts are exhausted, or the first
/// error that is not retryable.
pub fn run_with_retry(
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
    settings: RetrySettings,
) -> Result<(), ToolError> {
    let mut attempt: u32 = 0;
    loop {
        match runner.run(invocation) {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < settings.retries => {
                attempt += 1;
                warn!(
                    tool = %invocation.kind,
                    attempt,
                    retries = settings.retries,
                    error = %err,
                    "retrying tool invocation"
                );
                thread::sleep(settings.backoff.saturating_mul(attempt));
            }
            Err(err) => return Err(err),
        }
    }
}
