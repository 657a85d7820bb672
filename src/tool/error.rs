//! Error types for external tool invocations.

use std::{io, time::Duration};
use thiserror::Error;

use super::{RetryPolicy, ToolKind};

/// Failures reported by a [`super::ToolRunner`].
#[derive(Debug, Error)]
pub enum ToolError {
    /// The executable could not be started.
    #[error("failed to start {tool} `{program}`")]
    Spawn {
        /// Tool role.
        tool: ToolKind,
        /// Executable name or path.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The tool exited unsuccessfully.
    #[error("{tool} `{program}` exited with {}{}", exit_label(.status), stderr_suffix(.stderr))]
    Exit {
        /// Tool role.
        tool: ToolKind,
        /// Executable name or path.
        program: String,
        /// Exit code, or `None` when terminated by a signal.
        status: Option<i32>,
        /// Trailing standard error output.
        stderr: String,
    },
    /// The tool did not finish within its timeout and was killed.
    #[error("{tool} `{program}` timed out after {timeout:?}")]
    Timeout {
        /// Tool role.
        tool: ToolKind,
        /// Executable name or path.
        program: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The run was cancelled while the tool was running; it was killed.
    #[error("{tool} `{program}` was killed because the build was cancelled")]
    Cancelled {
        /// Tool role.
        tool: ToolKind,
        /// Executable name or path.
        program: String,
    },
    /// Communication with the running tool failed.
    #[error("I/O error while running {tool} `{program}`")]
    Io {
        /// Tool role.
        tool: ToolKind,
        /// Executable name or path.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    /// Tool role that failed.
    #[must_use]
    pub const fn tool(&self) -> ToolKind {
        match self {
            Self::Spawn { tool, .. }
            | Self::Exit { tool, .. }
            | Self::Timeout { tool, .. }
            | Self::Cancelled { tool, .. }
            | Self::Io { tool, .. } => *tool,
        }
    }

    /// Report whether another attempt may succeed.
    ///
    /// Only tools with [`RetryPolicy::Retryable`] are retried, and never when
    /// the executable could not be started at all or the run was cancelled.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.tool().retry_policy() == RetryPolicy::Retryable
            && !matches!(self, Self::Spawn { .. } | Self::Cancelled { .. })
    }
}

fn exit_label(status: &Option<i32>) -> String {
    status.map_or_else(|| "a signal".to_owned(), |code| format!("status {code}"))
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}
