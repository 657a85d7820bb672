//! Error types for build state management.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

use super::{StateField, WorkspaceLabel};

/// Errors raised while opening, mutating or closing a [`super::BuildState`].
#[derive(Debug, Error)]
pub enum StateError {
    /// Another build holds the workspace for the same identity.
    #[error("workspace {label} is already open at {path}")]
    WorkspaceConflict {
        /// Identity that collided.
        label: WorkspaceLabel,
        /// Workspace root that is locked.
        path: Utf8PathBuf,
    },
    /// An application name or toolchain id cannot name a workspace.
    #[error("`{part}` cannot be used in a workspace name: it {reason}")]
    InvalidLabel {
        /// Rejected name or id.
        part: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A single-assignment field was written twice.
    #[error("{field} has already been recorded for this build")]
    AlreadySet {
        /// Field that was written twice.
        field: StateField,
    },
    /// A workspace directory or file could not be created or removed.
    #[error("workspace I/O failed for {path}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The state snapshot could not be serialised.
    #[error("failed to serialise build state to {path}")]
    Serialise {
        /// Destination of the snapshot.
        path: Utf8PathBuf,
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
