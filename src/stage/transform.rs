//! PSyclone transformation of `.x90` algorithm sources.

use super::{
    Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec, generated_with_extension,
    workers::parallel_map,
};
use crate::state::StateField;
use crate::tool::ToolKind;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// API passed to the transformer.
const PSYCLONE_API: &str = "dynamo0.3";

/// Splits each preprocessed `.x90` file into an algorithm layer
/// (`<stem>.f90`) and a PSy layer (`<stem>_psy.f90`) next to it.
///
/// Kernels are searched for in `build_output/`. The application's
/// transformation script, when it has one, is passed with `-s`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Psyclone;

impl Stage for Psyclone {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::Psyclone,
            requires: &[StateField::GeneratedFiles],
            effects: &[StateField::GeneratedFiles],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let inputs = generated_with_extension(ctx.state, "x90");
        if inputs.is_empty() {
            return Ok(StageOutcome::skipped("no .x90 sources"));
        }
        let script = ctx.project.transformation_script(ctx.install_root());
        let kernel_root = ctx.state.layout().build_output();
        let shared = &*ctx;
        let produced = parallel_map(&inputs, shared.config.jobs, shared.cancel, |x90| {
            let (algorithm, psy) = layer_paths(x90);
            let mut command = shared
                .invocation(ToolKind::Transformer, &shared.tools.transformer)
                .args(["-api", PSYCLONE_API, "-l", "all"])
                .args(["-opsy", psy.as_str()])
                .args(["-oalg", algorithm.as_str()]);
            if let Some(path) = &script {
                command = command.arg("-s").input_arg(path);
            }
            let invocation = command
                .args(["-d", kernel_root.as_str()])
                .input_arg(x90)
                .output(&algorithm)
                .output(&psy);
            shared.run_tool(&invocation)?;
            Ok([algorithm, psy])
        })?;
        let added = ctx.state.extend_generated_files(produced.into_iter().flatten());
        debug!(added, "transformed algorithm sources");
        Ok(StageOutcome::Ran)
    }
}

/// Algorithm and PSy layer paths for an `.x90` source.
fn layer_paths(x90: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let stem = x90.file_stem().unwrap_or_default();
    let algorithm = x90.with_extension("f90");
    let psy = x90.with_file_name(format!("{stem}_psy.f90"));
    (algorithm, psy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_sit_next_to_the_algorithm_source() {
        let (algorithm, psy) = layer_paths(Utf8Path::new("/ws/build_output/driver/gw_alg.x90"));
        assert_eq!(algorithm, "/ws/build_output/driver/gw_alg.f90");
        assert_eq!(psy, "/ws/build_output/driver/gw_alg_psy.f90");
    }
}
