//! Error types for dependency analysis.

use camino::Utf8PathBuf;
use itertools::Itertools;
use std::io;
use thiserror::Error;

/// Errors raised while scanning units or building the dependency graph.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A unit uses a module that is neither local nor ignored.
    #[error("module `{module}` used by {unit} is not provided by any local unit")]
    UnresolvedModule {
        /// Name of the missing module.
        module: String,
        /// Unit that referenced it.
        unit: Utf8PathBuf,
    },
    /// Local units depend on each other in a loop.
    #[error("dependency cycle between local units: {}", .cycle.iter().join(" -> "))]
    DependencyCycle {
        /// Units on the cycle; the first unit is repeated at the end.
        cycle: Vec<Utf8PathBuf>,
    },
    /// No unit provides the root symbol.
    #[error("no unit provides the root symbol `{symbol}`")]
    MissingRoot {
        /// Requested root symbol.
        symbol: String,
    },
    /// Two units provide the same module.
    #[error("module `{module}` is provided by both {first} and {second}")]
    DuplicateModule {
        /// Module name.
        module: String,
        /// First provider seen.
        first: Utf8PathBuf,
        /// Second provider seen.
        second: Utf8PathBuf,
    },
    /// A unit could not be read.
    #[error("failed to read {path}")]
    Read {
        /// Unit path.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}
