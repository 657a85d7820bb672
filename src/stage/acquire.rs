//! Copy application source trees into the workspace.

use super::{Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec};
use crate::tool::{ToolKind, run_with_retry};
use std::fs;
use tracing::info;

/// Copies every [`SourceGrab`](crate::project::SourceGrab) into `source/`.
///
/// Copies are incremental (`rsync -u`), so re-running against an existing
/// workspace only transfers changed files. Failures are retried with the
/// acquisition settings from [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireSources;

impl Stage for AcquireSources {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::AcquireSources,
            requires: &[],
            effects: &[],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let grabs = ctx.project.acquire_sources(ctx.install_root());
        if grabs.is_empty() {
            return Ok(StageOutcome::skipped("no source trees to acquire"));
        }
        let source_root = ctx.state.layout().source();
        for grab in &grabs {
            ctx.checkpoint()?;
            let destination = if grab.label.is_empty() {
                source_root.clone()
            } else {
                source_root.join(&grab.label)
            };
            fs::create_dir_all(&destination).map_err(|err| StageFailure::io(&destination, err))?;
            // The trailing slash copies the directory's contents, not the directory.
            let from = format!("{}/", grab.source.as_str().trim_end_matches('/'));
            let invocation = ctx
                .invocation(ToolKind::SourceCopy, &ctx.tools.source_copy)
                .args(["--times", "--links", "--stats", "-ru"])
                .input(&grab.source)
                .arg(from)
                .output(&destination)
                .arg(destination.as_str())
                .timeout(ctx.config.acquire_timeout);
            run_with_retry(ctx.runner, &invocation, ctx.config.acquire_retry())?;
            info!(source = %grab.source, destination = %destination, "acquired source tree");
        }
        Ok(StageOutcome::Ran)
    }
}
