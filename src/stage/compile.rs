//! Compile the units reachable from the root, layer by layer.

use super::{
    Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec, workers::parallel_map,
};
use crate::state::StateField;
use crate::tool::{ToolInvocation, ToolKind};
use camino::Utf8Path;
use tracing::{debug, info};

/// Fixed flag that stops the compiler from linking.
const COMPILE_ONLY: &str = "-c";

/// Compiles each dependency layer in parallel.
///
/// A layer starts only once the previous layer's objects and `.mod` files
/// exist. Module files go to `build_output/`, which the module-directory flag
/// also adds to the search path.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileFortran;

impl Stage for CompileFortran {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::CompileFortran,
            requires: &[StateField::DependencyGraph],
            effects: &[StateField::ObjectFiles],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let Some(graph) = ctx.state.dependency_graph() else {
            return Ok(StageOutcome::skipped("no dependency graph"));
        };
        let layers = graph.compile_order();
        let output = ctx.state.layout().build_output();
        let flags = ctx.project.compiler_flags();
        let mut compiled = 0_usize;
        for (depth, layer) in layers.iter().enumerate() {
            ctx.checkpoint()?;
            let shared = &*ctx;
            let objects = parallel_map(layer, shared.config.jobs, shared.cancel, |unit| {
                let source = output.join(unit);
                let object = source.with_extension("o");
                let invocation = compile_invocation(shared, &flags, &output, &source, &object);
                shared.run_tool(&invocation)?;
                Ok(object)
            })?;
            debug!(layer = depth, units = objects.len(), "compiled layer");
            compiled += objects.len();
            ctx.state.extend_object_files(objects);
        }
        info!(units = compiled, "compiled Fortran units");
        Ok(StageOutcome::Ran)
    }
}

/// `<fc> -c <flags> <module-flag> <module-dir> <source> -o <object>`, run in
/// `module_dir`.
fn compile_invocation(
    ctx: &StageContext<'_>,
    flags: &[String],
    module_dir: &Utf8Path,
    source: &Utf8Path,
    object: &Utf8Path,
) -> ToolInvocation {
    let mut invocation = ctx
        .invocation(ToolKind::Compiler, &ctx.tools.compiler)
        .arg(COMPILE_ONLY)
        .args(flags.iter().map(String::as_str))
        .args([ctx.toolchain.module_dir_flag(), module_dir.as_str()])
        .input_arg(source)
        .arg("-o")
        .output(object)
        .arg(object.as_str());
    invocation.cwd = module_dir.to_owned();
    invocation
}
