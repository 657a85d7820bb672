//! Link the executable.

use super::{Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec};
use crate::state::StateField;
use crate::tool::ToolKind;
use tracing::info;

/// Links `build_output/<root symbol>` from the root object, the archive (if
/// one was built) and the application's link flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkExecutable;

impl Stage for LinkExecutable {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::LinkExecutable,
            requires: &[StateField::DependencyGraph, StateField::ObjectFiles],
            effects: &[StateField::Executable],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let Some(graph) = ctx.state.dependency_graph() else {
            return Ok(StageOutcome::skipped("no dependency graph"));
        };
        let output = ctx.state.layout().build_output();
        let root_object = output.join(graph.root()).with_extension("o");
        if !ctx.state.object_files().contains(&root_object) {
            return Ok(StageOutcome::skipped("root unit was not compiled"));
        }
        let executable = output.join(ctx.project.root_symbol());
        let mut command = ctx
            .invocation(ToolKind::Linker, &ctx.tools.linker)
            .arg("-o")
            .output(&executable)
            .arg(executable.as_str())
            .input_arg(&root_object);
        if let Some(archive) = ctx.state.archive() {
            command = command.input_arg(archive);
        }
        let invocation = command.args(ctx.project.link_flags());
        ctx.run_tool(&invocation)?;
        info!(executable = %executable, "linked executable");
        ctx.state.set_executable(executable)?;
        Ok(StageOutcome::Ran)
    }
}
