//! Archive compiled objects.

use super::{Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec};
use crate::state::StateField;
use crate::tool::ToolKind;
use camino::Utf8PathBuf;
use std::{fs, io};
use tracing::info;

/// Collects every object except the root unit's into
/// `build_output/<root symbol>.a`.
///
/// The root object is linked directly, so an application with a single unit
/// has nothing to archive and the stage is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveObjects;

impl Stage for ArchiveObjects {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::ArchiveObjects,
            requires: &[StateField::ObjectFiles],
            effects: &[StateField::Archive],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let output = ctx.state.layout().build_output();
        let root_object = ctx
            .state
            .dependency_graph()
            .map(|graph| output.join(graph.root()).with_extension("o"));
        let members: Vec<Utf8PathBuf> = ctx
            .state
            .object_files()
            .iter()
            .filter(|object| Some(*object) != root_object.as_ref())
            .cloned()
            .collect();
        if members.is_empty() {
            return Ok(StageOutcome::skipped("only the root object was compiled"));
        }
        let archive = output.join(format!("{}.a", ctx.project.root_symbol()));
        // `ar cr` only adds members, so start from an empty archive.
        match fs::remove_file(&archive) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(StageFailure::io(&archive, err)),
        }
        let mut invocation = ctx
            .invocation(ToolKind::Archiver, &ctx.tools.archiver)
            .arg("cr")
            .output(&archive)
            .arg(archive.as_str());
        for member in &members {
            invocation = invocation.input_arg(member);
        }
        ctx.run_tool(&invocation)?;
        info!(archive = %archive, members = members.len(), "archived objects");
        ctx.state.set_archive(archive)?;
        Ok(StageOutcome::Ran)
    }
}
