//! Build the module dependency graph from generated sources.

use super::{
    Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec, generated_with_extension,
    workers::parallel_map,
};
use crate::deps::{IgnoreSet, analyze, scan_file};
use crate::state::StateField;
use tracing::info;

/// Scans every generated `.f90` file under `build_output/` and records the
/// graph pruned to the application's root symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyseDependencies;

impl Stage for AnalyseDependencies {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::AnalyseDependencies,
            requires: &[StateField::GeneratedFiles],
            effects: &[StateField::DependencyGraph],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let sources = generated_with_extension(ctx.state, "f90");
        if sources.is_empty() {
            return Ok(StageOutcome::skipped("no generated .f90 sources under build_output"));
        }
        let shared = &*ctx;
        let layout = shared.state.layout();
        let units = parallel_map(&sources, shared.config.jobs, shared.cancel, |path| {
            scan_file(path, layout.relative_to_output(path)).map_err(StageFailure::from)
        })?;
        let ignore = IgnoreSet::new(ctx.project.ignore_modules());
        let graph = analyze(&units, &ignore, ctx.project.root_symbol())?;
        info!(
            root = %graph.root(),
            units = graph.len(),
            excluded = graph.excluded().len(),
            "dependency graph resolved"
        );
        ctx.state.set_dependency_graph(graph)?;
        Ok(StageOutcome::Ran)
    }
}
