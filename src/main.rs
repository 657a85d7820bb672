//! Entry point for the gravity-wave mini-application build.
//!
//! Parses command-line arguments, loads the `FAB_*` settings, configures
//! logging once and delegates to [`runner::run`].

use clap::Parser;
use fabline::config::FabSettings;
use fabline::pipeline::BuildError;
use fabline::{cli::Cli, logging, project::GravityWave, runner};
use miette::Diagnostic;
use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match FabSettings::from_env() {
        Ok(loaded) => loaded,
        Err(err) => return startup_failure(err),
    };
    if let Err(err) = logging::parse_level(settings.log.as_deref()).and_then(logging::configure) {
        return startup_failure(err);
    }
    match runner::run(&cli, &settings, &GravityWave::from_settings(&settings)) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            report_build_failure(&err);
            ExitCode::FAILURE
        }
    }
}

fn startup_failure(err: impl Into<anyhow::Error>) -> ExitCode {
    let error = err.into();
    drop(writeln!(io::stderr(), "fab-gravity-wave: {error:#}"));
    ExitCode::FAILURE
}

/// Log the error chain with the diagnostic code and help of a pipeline
/// failure.
fn report_build_failure(err: &anyhow::Error) {
    let diagnostic = err.downcast_ref::<BuildError>();
    let code = diagnostic
        .and_then(Diagnostic::code)
        .map(|value| value.to_string());
    let help = diagnostic
        .and_then(Diagnostic::help)
        .map(|value| value.to_string());
    tracing::error!(
        error = %format!("{err:#}"),
        code = code.as_deref(),
        help = help.as_deref(),
        "build failed"
    );
}
