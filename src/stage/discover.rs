//! Record the files under `source/` that pass the application's filters.

use super::{Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec};
use crate::project::passes_filters;
use crate::state::StateField;
use camino::Utf8PathBuf;
use tracing::debug;
use walkdir::WalkDir;

/// Walks `source/` in sorted order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverSourceFiles;

impl Stage for DiscoverSourceFiles {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::DiscoverSourceFiles,
            requires: &[],
            effects: &[StateField::SourceFiles],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let root = ctx.state.layout().source();
        let filters = ctx.project.path_filters();
        let mut found = Vec::new();
        let mut filtered = 0_usize;
        for walked in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = walked.map_err(|err| {
                let path = err
                    .path()
                    .and_then(|raw| Utf8PathBuf::from_path_buf(raw.to_path_buf()).ok())
                    .unwrap_or_else(|| root.clone());
                StageFailure::io(path, err.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
                filtered += 1;
                continue;
            };
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            if passes_filters(&filters, relative) {
                found.push(path);
            } else {
                filtered += 1;
            }
        }
        let added = ctx.state.extend_source_files(found);
        debug!(added, filtered, "discovered source files");
        Ok(StageOutcome::Ran)
    }
}
