//! The pipeline driver.
//!
//! [`Pipeline::run`] opens the [`BuildState`] for an application and
//! toolchain, runs every stage of its [`StageRegistry`] in order and closes
//! the state exactly once, whether the run succeeded, failed or was
//! cancelled. Nothing written to the workspace is rolled back.

mod error;

pub use error::BuildError;

use crate::config::PipelineConfig;
use crate::hasher::GraphHasher;
use crate::logging;
use crate::project::{InstallRoot, ProjectSpecialization};
use crate::stage::{
    CancelFlag, StageContext, StageFailure, StageId, StageOutcome, StageRegistry, StageSpec,
};
use crate::state::{BuildState, StateField, WorkspaceLabel};
use crate::status::{LogReporter, StatusReporter};
use crate::tool::{ProcessRunner, ToolRunner, ToolSet};
use crate::toolchain::Toolchain;
use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Linked executable.
    pub executable: Utf8PathBuf,
    /// Archive of the non-root objects, if any were compiled.
    pub archive: Option<Utf8PathBuf>,
    /// Every object file, in compile order.
    pub objects: Vec<Utf8PathBuf>,
    /// Digest of the dependency graph.
    pub graph_digest: String,
    /// Workspace root of the run.
    pub workspace: Utf8PathBuf,
}

/// Runs the stage sequence for one toolchain.
pub struct Pipeline {
    config: PipelineConfig,
    toolchain: Toolchain,
    install_root: InstallRoot,
    tools: ToolSet,
    runner: Option<Box<dyn ToolRunner>>,
    reporter: Box<dyn StatusReporter>,
    registry: StageRegistry,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Create a pipeline with the standard stages, real processes and
    /// log-based reporting.
    ///
    /// Tool programs are the toolchain defaults; use [`Pipeline::with_tools`]
    /// to apply configured overrides. Real processes are killed when the
    /// cancel flag is set.
    #[must_use]
    pub fn new(config: PipelineConfig, toolchain: Toolchain, install_root: InstallRoot) -> Self {
        let tools = ToolSet::defaults(&toolchain, install_root.as_path());
        Self {
            config,
            toolchain,
            install_root,
            tools,
            runner: None,
            reporter: Box::new(LogReporter),
            registry: StageRegistry::standard(),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the resolved tool programs.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the tool runner.
    #[must_use]
    pub fn with_runner(mut self, runner: impl ToolRunner + 'static) -> Self {
        self.runner = Some(Box::new(runner));
        self
    }

    /// Replace the status reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the stage registry.
    #[must_use]
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share `cancel` with the caller instead of the pipeline's own flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the run when set.
    #[must_use]
    pub const fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Active toolchain.
    #[must_use]
    pub const fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Build `project` and return the linked executable.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Workspace`] if the workspace cannot be opened,
    /// [`BuildError::Stage`] for the first stage that fails,
    /// [`BuildError::Cancelled`] when the cancel flag is set,
    /// [`BuildError::MissingArtifact`] if no executable was linked and
    /// [`BuildError::Teardown`] if closing the workspace fails after an
    /// otherwise successful run.
    pub fn run(&self, project: &dyn ProjectSpecialization) -> Result<Artifact, BuildError> {
        logging::mark_run_started();
        let label = WorkspaceLabel::new(project.name(), self.toolchain.id())
            .map_err(BuildError::Workspace)?;
        let mut state = BuildState::open(
            label,
            &self.config.workspace_base,
            self.install_root.as_path(),
        )
        .map_err(BuildError::Workspace)?;
        let workspace = state.layout().root().to_owned();
        info!(workspace = %workspace, toolchain = self.toolchain.id(), "build started");

        let outcome = self
            .run_stages(&mut state, project)
            .and_then(|()| Self::artifact(&state));
        let closed = state.close();
        self.reporter.report_teardown(&workspace, closed.is_ok());

        match (outcome, closed) {
            (Ok(artifact), Ok(())) => {
                self.reporter.report_complete(&artifact.executable);
                info!(executable = %artifact.executable, digest = %artifact.graph_digest, "build finished");
                Ok(artifact)
            }
            (Ok(_), Err(source)) => Err(BuildError::Teardown { workspace, source }),
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    warn!(workspace = %workspace, error = %close_err, "workspace did not close cleanly");
                }
                Err(err)
            }
        }
    }

    fn run_stages(
        &self,
        state: &mut BuildState,
        project: &dyn ProjectSpecialization,
    ) -> Result<(), BuildError> {
        let processes = ProcessRunner::new().with_cancel_flag(self.cancel.clone());
        let runner: &dyn ToolRunner = self.runner.as_deref().unwrap_or(&processes);
        for stage in self.registry.iter() {
            let spec = stage.spec();
            if self.cancel.is_cancelled() {
                return Err(cancelled(spec.id, state));
            }
            self.reporter.report_stage(spec.id);
            if let Some(field) = unmet_requirement(&spec, state) {
                let outcome = StageOutcome::skipped(format!("{field} is empty"));
                debug!(stage = %spec.id, "skipping: {field} is empty");
                self.reporter.report_outcome(spec.id, &outcome);
                continue;
            }
            let mut ctx = StageContext {
                state: &mut *state,
                project,
                toolchain: &self.toolchain,
                tools: &self.tools,
                runner,
                config: &self.config,
                cancel: &self.cancel,
            };
            match stage.run(&mut ctx) {
                Ok(outcome) => {
                    if outcome == StageOutcome::Ran {
                        warn_on_empty_effects(&spec, state);
                    } else {
                        debug!(stage = %spec.id, ?outcome, "stage skipped");
                    }
                    self.reporter.report_outcome(spec.id, &outcome);
                }
                Err(StageFailure::Cancelled) => return Err(cancelled(spec.id, state)),
                Err(source) => {
                    return Err(BuildError::Stage {
                        stage: spec.id,
                        workspace: state.layout().root().to_owned(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn artifact(state: &BuildState) -> Result<Artifact, BuildError> {
        let workspace = state.layout().root().to_owned();
        let Some(executable) = state.executable() else {
            return Err(BuildError::MissingArtifact {
                field: StateField::Executable,
                workspace,
            });
        };
        let Some(graph) = state.dependency_graph() else {
            return Err(BuildError::MissingArtifact {
                field: StateField::DependencyGraph,
                workspace,
            });
        };
        Ok(Artifact {
            executable: executable.to_owned(),
            archive: state.archive().map(ToOwned::to_owned),
            objects: state.object_files().iter().cloned().collect(),
            graph_digest: GraphHasher::hash(graph),
            workspace,
        })
    }
}

fn cancelled(stage: StageId, state: &BuildState) -> BuildError {
    info!(stage = %stage, "build cancelled");
    BuildError::Cancelled {
        stage,
        workspace: state.layout().root().to_owned(),
    }
}

fn unmet_requirement(spec: &StageSpec, state: &BuildState) -> Option<StateField> {
    spec.requires
        .iter()
        .copied()
        .find(|field| !state.is_populated(*field))
}

fn warn_on_empty_effects(spec: &StageSpec, state: &BuildState) {
    for field in spec.effects {
        if !state.is_populated(*field) {
            warn!(stage = %spec.id, field = %field, "stage ran but left {field} empty");
        }
    }
}
