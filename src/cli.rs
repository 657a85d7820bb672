//! Command line interface definition using clap.
//!
//! Every bundled application exposes the same single option: the toolchain
//! to build with.

use crate::state::check_label_part;
use clap::Parser;

/// Build the application with a staged Fortran pipeline.
#[derive(Debug, Default, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Compiler toolchain to build with (for example `gfortran` or `ifx`).
    ///
    /// Selects the compiler and becomes part of the workspace name, so each
    /// toolchain builds in its own workspace.
    #[arg(long, value_name = "ID", value_parser = parse_toolchain_id)]
    pub compiler: Option<String>,
}

/// Accept a toolchain id only if it can name a workspace directory.
fn parse_toolchain_id(id: &str) -> Result<String, String> {
    check_label_part(id)
        .map(|()| id.to_owned())
        .map_err(|reason| format!("toolchain id {reason}"))
}
