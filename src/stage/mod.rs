//! The fixed catalogue of pipeline stages.
//!
//! Each stage declares the [`StateField`]s it needs populated before it can do
//! useful work and the fields it fills in. [`StageRegistry::standard`] lists
//! the stages in the one order the driver runs them; the order is a
//! topological flattening of those declarations.
//!
//! Stages receive a [`StageContext`] holding the build state, the
//! application's [`ProjectSpecialization`] and the tool plumbing. A stage
//! whose application-supplied input is empty returns
//! [`StageOutcome::Skipped`] instead of failing.

mod acquire;
mod analyse;
mod archive;
mod compile;
mod configure;
mod discover;
mod link;
mod preprocess;
mod transform;
mod workaround;
mod workers;

pub use acquire::AcquireSources;
pub use analyse::AnalyseDependencies;
pub use archive::ArchiveObjects;
pub use compile::CompileFortran;
pub use configure::GenerateConfiguration;
pub use discover::DiscoverSourceFiles;
pub use link::LinkExecutable;
pub use preprocess::Preprocess;
pub use transform::Psyclone;
pub use workaround::{StopConcatenationWorkaround, rewrite_stop_concatenation};
pub use workers::CancelFlag;

use crate::config::PipelineConfig;
use crate::deps::AnalysisError;
use crate::project::ProjectSpecialization;
use crate::state::{BuildState, StateError, StateField};
use crate::tool::{ToolError, ToolInvocation, ToolKind, ToolRunner, ToolSet};
use crate::toolchain::Toolchain;
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, io};
use thiserror::Error;

/// Identifier of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageId {
    /// Copy application source trees into the workspace.
    AcquireSources = 1,
    /// Generate configuration sources from application metadata.
    GenerateConfiguration = 2,
    /// Record the files under `source/` that pass the path filters.
    DiscoverSourceFiles = 3,
    /// Preprocess `.F90` and copy `.f90` sources.
    PreprocessFortran = 4,
    /// Preprocess `.X90` and copy `.x90` sources.
    PreprocessX90 = 5,
    /// Split `.x90` algorithm sources into algorithm and PSy layers.
    Psyclone = 6,
    /// Rewrite string concatenation in `stop` statements.
    StopConcatenationWorkaround = 7,
    /// Build the module dependency graph.
    AnalyseDependencies = 8,
    /// Compile the units reachable from the root.
    CompileFortran = 9,
    /// Archive the non-root objects.
    ArchiveObjects = 10,
    /// Link the executable.
    LinkExecutable = 11,
}

impl StageId {
    /// Every stage in execution order.
    pub const ALL: [Self; 11] = [
        Self::AcquireSources,
        Self::GenerateConfiguration,
        Self::DiscoverSourceFiles,
        Self::PreprocessFortran,
        Self::PreprocessX90,
        Self::Psyclone,
        Self::StopConcatenationWorkaround,
        Self::AnalyseDependencies,
        Self::CompileFortran,
        Self::ArchiveObjects,
        Self::LinkExecutable,
    ];

    /// 1-based position in the pipeline.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self as u32
    }

    /// Stable kebab-case name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AcquireSources => "acquire-sources",
            Self::GenerateConfiguration => "generate-configuration",
            Self::DiscoverSourceFiles => "discover-source-files",
            Self::PreprocessFortran => "preprocess-fortran",
            Self::PreprocessX90 => "preprocess-x90",
            Self::Psyclone => "psyclone",
            Self::StopConcatenationWorkaround => "stop-concatenation-workaround",
            Self::AnalyseDependencies => "analyse-dependencies",
            Self::CompileFortran => "compile-fortran",
            Self::ArchiveObjects => "archive-objects",
            Self::LinkExecutable => "link-executable",
        }
    }

    /// Human-readable description for progress output.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AcquireSources => "Acquiring sources",
            Self::GenerateConfiguration => "Generating configuration sources",
            Self::DiscoverSourceFiles => "Discovering source files",
            Self::PreprocessFortran => "Preprocessing Fortran",
            Self::PreprocessX90 => "Preprocessing X90",
            Self::Psyclone => "Running PSyclone",
            Self::StopConcatenationWorkaround => "Rewriting stop concatenation",
            Self::AnalyseDependencies => "Analysing dependencies",
            Self::CompileFortran => "Compiling Fortran",
            Self::ArchiveObjects => "Archiving objects",
            Self::LinkExecutable => "Linking executable",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of stages in the pipeline.
pub const STAGE_COUNT: u32 = 11;

/// Contract of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    /// Stage identifier.
    pub id: StageId,
    /// Fields that must be populated for the stage to have work.
    pub requires: &'static [StateField],
    /// Fields the stage populates.
    pub effects: &'static [StateField],
}

impl StageSpec {
    /// 1-based position in the pipeline.
    #[must_use]
    pub const fn ordinal(&self) -> u32 {
        self.id.ordinal()
    }
}

/// Result of a stage that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage did its work.
    Ran,
    /// The stage had nothing to do.
    Skipped(String),
}

impl StageOutcome {
    /// Build a [`StageOutcome::Skipped`] with `reason`.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

/// Why a stage failed.
#[derive(Debug, Error)]
pub enum StageFailure {
    /// An external tool failed.
    #[error(transparent)]
    Tool(ToolError),
    /// Dependency analysis rejected the sources.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    /// The build state rejected an update.
    #[error(transparent)]
    State(#[from] StateError),
    /// A workspace file could not be read or written.
    #[error("I/O error on {path}")]
    Io {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The worker pool for a parallel stage could not be started.
    #[error("failed to start stage workers")]
    Workers(#[from] rayon::ThreadPoolBuildError),
    /// The run was cancelled while the stage was working.
    #[error("cancelled")]
    Cancelled,
}

impl From<ToolError> for StageFailure {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Cancelled { .. } => Self::Cancelled,
            other => Self::Tool(other),
        }
    }
}

impl StageFailure {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Everything a stage may read or update.
pub struct StageContext<'a> {
    /// Build state of the current run; the only thing stages mutate.
    pub state: &'a mut BuildState,
    /// Application being built.
    pub project: &'a dyn ProjectSpecialization,
    /// Active toolchain.
    pub toolchain: &'a Toolchain,
    /// Resolved tool programs.
    pub tools: &'a ToolSet,
    /// Executes tool invocations.
    pub runner: &'a dyn ToolRunner,
    /// Pipeline settings.
    pub config: &'a PipelineConfig,
    /// Set when the run should stop.
    pub cancel: &'a CancelFlag,
}

impl StageContext<'_> {
    /// Start an invocation of `program` in the workspace root with the
    /// configured tool timeout.
    #[must_use]
    pub fn invocation(&self, kind: ToolKind, program: &str) -> ToolInvocation {
        ToolInvocation::new(kind, program, self.state.layout().root())
            .timeout(self.config.tool_timeout)
    }

    /// Run `invocation` unless the run has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure::Cancelled`] or the tool's failure.
    pub fn run_tool(&self, invocation: &ToolInvocation) -> Result<(), StageFailure> {
        self.checkpoint()?;
        self.runner.run(invocation).map_err(StageFailure::from)
    }

    /// Fail with [`StageFailure::Cancelled`] once cancellation is requested.
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure::Cancelled`] when the cancel flag is set.
    pub fn checkpoint(&self) -> Result<(), StageFailure> {
        if self.cancel.is_cancelled() {
            Err(StageFailure::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Root of the application installation.
    #[must_use]
    pub fn install_root(&self) -> &Utf8Path {
        self.state.install_root()
    }
}

/// One step of the pipeline.
pub trait Stage: Send + Sync {
    /// Contract of this stage.
    fn spec(&self) -> StageSpec;

    /// Do the stage's work.
    ///
    /// # Errors
    ///
    /// Returns a [`StageFailure`] when a tool, check or file operation fails.
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure>;
}

/// Ordered list of stages the driver executes.
pub struct StageRegistry {
    stages: Vec<Box<dyn Stage>>,
}

impl StageRegistry {
    /// The canonical eleven-stage pipeline.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: vec![
                Box::new(AcquireSources),
                Box::new(GenerateConfiguration),
                Box::new(DiscoverSourceFiles),
                Box::new(Preprocess::fortran()),
                Box::new(Preprocess::x90()),
                Box::new(Psyclone),
                Box::new(StopConcatenationWorkaround),
                Box::new(AnalyseDependencies),
                Box::new(CompileFortran),
                Box::new(ArchiveObjects),
                Box::new(LinkExecutable),
            ],
        }
    }

    /// Wrap every stage with `wrap`, keeping the order.
    ///
    /// Used to observe or perturb stages without changing the sequence.
    #[must_use]
    pub fn instrument<F>(self, wrap: F) -> Self
    where
        F: FnMut(Box<dyn Stage>) -> Box<dyn Stage>,
    {
        Self {
            stages: self.stages.into_iter().map(wrap).collect(),
        }
    }

    /// Contracts of every stage in order.
    #[must_use]
    pub fn specs(&self) -> Vec<StageSpec> {
        self.stages.iter().map(|stage| stage.spec()).collect()
    }

    /// Iterate over the stages in order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Stage> {
        self.stages.iter().map(AsRef::as_ref)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Report whether the registry holds no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Generated files under `build_output/` with the given extension.
pub(crate) fn generated_with_extension(state: &BuildState, extension: &str) -> Vec<Utf8PathBuf> {
    let output = state.layout().build_output();
    state
        .generated_files()
        .iter()
        .filter(|path| path.starts_with(&output) && path.extension() == Some(extension))
        .cloned()
        .collect()
}

/// Create the parent directory of `path`.
pub(crate) fn ensure_parent(path: &Utf8Path) -> Result<(), StageFailure> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|err| StageFailure::io(parent, err)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests;
