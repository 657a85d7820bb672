//! Generate configuration sources from the application's metadata.

use super::{Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec};
use crate::state::StateField;
use crate::tool::ToolKind;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing::debug;

const METADATA_JSON: &str = "rose-meta.json";
const NAMELIST_INDEX: &str = "config_namelists.txt";
const LOADER_SOURCE: &str = "configuration_mod.f90";
const FEIGN_SOURCE: &str = "feign_config_mod.f90";

/// Runs the metadata picker and the three configuration generators.
///
/// 1. the picker converts the metadata into `rose-meta.json` and lists the
///    namelists in `config_namelists.txt`;
/// 2. the loader generator writes `configuration_mod.f90` for those names;
/// 3. the namelist generator writes one module per namelist;
/// 4. the feign generator writes `feign_config_mod.f90`.
///
/// Everything lands in `source/configuration/`, which is created here and
/// nowhere else. Without a metadata file the stage touches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateConfiguration;

impl Stage for GenerateConfiguration {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::GenerateConfiguration,
            requires: &[],
            effects: &[StateField::GeneratedFiles],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let Some(metadata) = ctx.project.metadata_path(ctx.install_root()) else {
            return Ok(StageOutcome::skipped("no metadata file"));
        };
        let config_dir = ctx.state.layout().configuration();
        fs::create_dir_all(&config_dir).map_err(|err| StageFailure::io(&config_dir, err))?;
        let metadata_json = config_dir.join(METADATA_JSON);
        let namelist_index = config_dir.join(NAMELIST_INDEX);
        let programs = ctx.tools.configurator.clone();

        let picker = ctx
            .invocation(ToolKind::Configurator, &programs.picker)
            .input_arg(&metadata)
            .args(["-directory", config_dir.as_str()])
            .args(["-include_dirs", ctx.install_root().as_str()])
            .output(&metadata_json)
            .output(&namelist_index);
        ctx.run_tool(&picker)?;

        let names = read_namelists(&namelist_index)?;
        debug!(count = names.len(), "configuration namelists");

        let loader_source = config_dir.join(LOADER_SOURCE);
        let loader = ctx
            .invocation(ToolKind::Configurator, &programs.loader)
            .output(&loader_source)
            .arg(loader_source.as_str())
            .args(names.iter().map(String::as_str));
        ctx.run_tool(&loader)?;

        let namelist = ctx
            .invocation(ToolKind::Configurator, &programs.namelist)
            .arg("-verbose")
            .input_arg(&metadata_json)
            .args(["-directory", config_dir.as_str()]);
        ctx.run_tool(&namelist)?;

        let feign_source = config_dir.join(FEIGN_SOURCE);
        let feigns = ctx
            .invocation(ToolKind::Configurator, &programs.feigns)
            .input_arg(&metadata_json)
            .arg("-output")
            .output(&feign_source)
            .arg(feign_source.as_str());
        ctx.run_tool(&feigns)?;

        let generated = fortran_sources(&config_dir)?;
        let added = ctx.state.extend_generated_files(generated);
        debug!(added, "recorded configuration sources");
        Ok(StageOutcome::Ran)
    }
}

fn read_namelists(index: &Utf8Path) -> Result<Vec<String>, StageFailure> {
    let text = fs::read_to_string(index).map_err(|err| StageFailure::io(index, err))?;
    Ok(text.split_whitespace().map(str::to_owned).collect())
}

fn fortran_sources(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StageFailure> {
    let entries = dir.read_dir_utf8().map_err(|err| StageFailure::io(dir, err))?;
    let mut files = Vec::new();
    for listed in entries {
        let entry = listed.map_err(|err| StageFailure::io(dir, err))?;
        let path = entry.path();
        if path.extension() == Some("f90") && path.is_file() {
            files.push(path.to_owned());
        }
    }
    files.sort();
    Ok(files)
}
