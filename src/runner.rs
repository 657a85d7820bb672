//! CLI execution glue.
//!
//! Keeps `main` minimal: resolves the install root, configuration and
//! toolchain, chooses a progress reporter, wires interrupts to the
//! pipeline's cancel flag and runs the pipeline for one application.

use crate::cli::Cli;
use crate::config::{FabSettings, PipelineConfig};
use crate::pipeline::{Artifact, Pipeline};
use crate::project::{InstallRoot, ProjectSpecialization};
use crate::stage::CancelFlag;
use crate::status::{IndicatifReporter, LogReporter, StatusReporter};
use crate::tool::ToolSet;
use crate::toolchain::Toolchain;
use anyhow::{Context, Result};
use std::io::{self, IsTerminal};
use tracing::{debug, warn};

/// Exit status used when a second interrupt aborts the process.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Build `project` as directed by `cli` and the `FAB_*` `settings`.
///
/// The first SIGINT or SIGTERM cancels the run: running tools are killed and
/// the workspace is closed before this returns. A second one exits at once.
///
/// # Errors
///
/// Returns an error if the install root cannot be located, the `FAB_*`
/// configuration is invalid, the interrupt handler cannot be installed or
/// the pipeline fails.
pub fn run(
    cli: &Cli,
    settings: &FabSettings,
    project: &dyn ProjectSpecialization,
) -> Result<Artifact> {
    let install_root =
        InstallRoot::discover().context("failed to locate the application install root")?;
    let config = PipelineConfig::resolve(settings).context("invalid pipeline configuration")?;
    let toolchain = toolchain(cli);
    let tools = ToolSet::resolve(&toolchain, install_root.as_path(), settings);
    debug!(
        install_root = %install_root.as_path(),
        workspace_base = %config.workspace_base,
        jobs = config.jobs.get(),
        "resolved pipeline settings"
    );
    let cancel = CancelFlag::new();
    cancel_on_interrupt(&cancel)?;
    let pipeline = Pipeline::new(config, toolchain, install_root)
        .with_tools(tools)
        .with_cancel_flag(cancel)
        .with_reporter(reporter());
    pipeline
        .run(project)
        .with_context(|| format!("failed to build {}", project.name()))
}

/// Toolchain named on the command line, or the default one.
#[must_use]
pub fn toolchain(cli: &Cli) -> Toolchain {
    cli.compiler
        .as_deref()
        .map_or_else(Toolchain::default, Toolchain::from_id)
}

fn cancel_on_interrupt(cancel: &CancelFlag) -> Result<()> {
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if flag.is_cancelled() {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        warn!("interrupted; cancelling the build");
        flag.cancel();
    })
    .context("failed to install the interrupt handler")
}

fn reporter() -> Box<dyn StatusReporter> {
    if io::stderr().is_terminal() {
        Box::new(IndicatifReporter::new())
    } else {
        Box::new(LogReporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "gfortran")]
    #[case(Some("ifx"), "ifx")]
    fn toolchain_follows_compiler_flag(#[case] compiler: Option<&str>, #[case] expected: &str) {
        let cli = Cli {
            compiler: compiler.map(str::to_owned),
        };
        assert_eq!(toolchain(&cli).id(), expected);
    }
}
