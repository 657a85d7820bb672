//! Error types for the pipeline driver.
//!
//! Kept apart from the driver so the lint suppression needed by the derive
//! macros stays narrow.

// The miette/thiserror derives trigger `unused_assignments` on some
// toolchains only, so `#[expect]` cannot be used here.
// FIXME(rust-lang/rust#130021): remove once upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use crate::stage::{StageFailure, StageId};
use crate::state::{StateError, StateField};
use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by [`super::Pipeline::run`].
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    /// The workspace could not be opened.
    #[error("failed to open the build workspace")]
    #[diagnostic(
        code(fabline::pipeline::workspace),
        help(
            "check the toolchain id, or whether another build of the same application and toolchain is still running"
        )
    )]
    Workspace(#[source] StateError),

    /// A stage failed; the pipeline stopped and the workspace was closed.
    #[error("stage {stage} failed (workspace {workspace})")]
    #[diagnostic(
        code(fabline::pipeline::stage),
        help("files written before the failure are left in the workspace for inspection")
    )]
    Stage {
        /// Stage that failed.
        stage: StageId,
        /// Workspace root of the run.
        workspace: Utf8PathBuf,
        /// Why the stage failed.
        #[source]
        source: StageFailure,
    },

    /// The run was cancelled before or during `stage`.
    #[error("build cancelled at stage {stage} (workspace {workspace})")]
    #[diagnostic(
        code(fabline::pipeline::cancelled),
        help("the workspace was closed; rerun the build to start again")
    )]
    Cancelled {
        /// Stage that was about to run or running.
        stage: StageId,
        /// Workspace root of the run.
        workspace: Utf8PathBuf,
    },

    /// Every stage succeeded but the workspace could not be closed.
    #[error("failed to close workspace {workspace}")]
    #[diagnostic(code(fabline::pipeline::teardown))]
    Teardown {
        /// Workspace root of the run.
        workspace: Utf8PathBuf,
        /// Underlying state error.
        #[source]
        source: StateError,
    },

    /// The stages finished without producing a required artefact.
    #[error("the pipeline finished without recording {field} (workspace {workspace})")]
    #[diagnostic(
        code(fabline::pipeline::missing_artifact),
        help("check that the root symbol names a program in the application sources")
    )]
    MissingArtifact {
        /// Field that was left empty.
        field: StateField,
        /// Workspace root of the run.
        workspace: Utf8PathBuf,
    },
}

impl BuildError {
    /// Workspace root involved in the failure, when one was opened.
    #[must_use]
    pub const fn workspace(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Workspace(_) => None,
            Self::Stage { workspace, .. }
            | Self::Cancelled { workspace, .. }
            | Self::Teardown { workspace, .. }
            | Self::MissingArtifact { workspace, .. } => Some(workspace),
        }
    }

    /// Stage at which the run stopped, if it stopped inside the sequence.
    #[must_use]
    pub const fn stage(&self) -> Option<StageId> {
        match self {
            Self::Stage { stage, .. } | Self::Cancelled { stage, .. } => Some(*stage),
            Self::Workspace(_) | Self::Teardown { .. } | Self::MissingArtifact { .. } => None,
        }
    }
}
