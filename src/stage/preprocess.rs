//! Preprocess sources into `build_output/`.

use super::{
    Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec, ensure_parent,
    workers::parallel_map,
};
use crate::state::StateField;
use crate::tool::ToolKind;
use camino::Utf8PathBuf;
use std::fs;
use tracing::debug;

/// Preprocesses one family of sources.
///
/// Files with the upper-case extension go through the preprocessor in
/// traditional mode with line markers suppressed; files with the lower-case
/// extension need no preprocessing and are copied. Either way the result
/// lands at the mirrored path under `build_output/` with the lower-case
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocess {
    id: StageId,
    preprocessed: &'static str,
    plain: &'static str,
}

impl Preprocess {
    /// `.F90` and `.f90` sources.
    #[must_use]
    pub const fn fortran() -> Self {
        Self {
            id: StageId::PreprocessFortran,
            preprocessed: "F90",
            plain: "f90",
        }
    }

    /// `.X90` and `.x90` algorithm sources.
    #[must_use]
    pub const fn x90() -> Self {
        Self {
            id: StageId::PreprocessX90,
            preprocessed: "X90",
            plain: "x90",
        }
    }
}

impl Stage for Preprocess {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: self.id,
            requires: &[StateField::SourceFiles],
            effects: &[StateField::GeneratedFiles],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let inputs: Vec<Utf8PathBuf> = ctx
            .state
            .source_files()
            .iter()
            .filter(|path| matches!(path.extension(), Some(ext) if ext == self.preprocessed || ext == self.plain))
            .cloned()
            .collect();
        if inputs.is_empty() {
            return Ok(StageOutcome::skipped(format!(
                "no .{} or .{} sources",
                self.preprocessed, self.plain
            )));
        }
        let flags = ctx.project.preprocessor_flags();
        let shared = &*ctx;
        let outputs = parallel_map(&inputs, shared.config.jobs, shared.cancel, |input| {
            let output = shared.state.layout().output_for(input, self.plain);
            ensure_parent(&output)?;
            if input.extension() == Some(self.preprocessed) {
                let invocation = shared
                    .invocation(ToolKind::Preprocessor, &shared.tools.preprocessor)
                    .args(["-traditional-cpp", "-P"])
                    .args(flags.iter().map(String::as_str))
                    .input_arg(input)
                    .output(&output)
                    .arg(output.as_str());
                shared.run_tool(&invocation)?;
            } else {
                fs::copy(input, &output).map_err(|err| StageFailure::io(input, err))?;
            }
            Ok(output)
        })?;
        let added = ctx.state.extend_generated_files(outputs);
        debug!(stage = %self.id, added, "preprocessed sources");
        Ok(StageOutcome::Ran)
    }
}
