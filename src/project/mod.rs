//! Per-application customisation of the pipeline.
//!
//! An application implements [`ProjectSpecialization`] to tell the pipeline
//! where its sources live, which metadata drives configuration generation and
//! which flags each tool receives. Every method is a pure query: the driver
//! alone writes results into the build state. Optional inputs that come back
//! empty make the corresponding stage a no-op.

mod gravity_wave;
mod install_root;

pub use gravity_wave::GravityWave;
pub use install_root::{InstallRoot, InstallRootError};

use camino::{Utf8Path, Utf8PathBuf};

/// Modules supplied prebuilt by external libraries.
pub const DEFAULT_IGNORE_MODULES: &[&str] =
    &["netcdf", "MPI", "yaxt", "pfunit_mod", "xios", "mod_wait"];

/// Path fragments that mark test trees.
const TEST_TREE_MARKERS: &[&str] = &["unit-test", "/test/"];

/// A source tree to copy into the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGrab {
    /// Directory to copy from.
    pub source: Utf8PathBuf,
    /// Sub-directory of `source/` to copy into; empty means `source/` itself.
    pub label: String,
}

impl SourceGrab {
    /// Copy `source` directly into the workspace `source/` directory.
    #[must_use]
    pub fn new(source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            label: String::new(),
        }
    }

    /// Copy into `source/<label>` instead.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Substring rule applied to discovered source paths.
///
/// Paths are matched as `/<path relative to source/>`, so a fragment such as
/// `/test/` also matches a top-level `test` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathFilter {
    /// Drop paths containing any of the fragments.
    Exclude(Vec<String>),
    /// Keep paths containing any of the fragments.
    Include(Vec<String>),
}

impl PathFilter {
    /// Build an exclusion rule.
    #[must_use]
    pub fn exclude<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(fragments.into_iter().map(Into::into).collect())
    }

    /// Build an inclusion rule.
    #[must_use]
    pub fn include<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(fragments.into_iter().map(Into::into).collect())
    }

    /// `Some(keep)` when the rule matches `path`, `None` otherwise.
    fn verdict(&self, path: &str) -> Option<bool> {
        let (fragments, keep) = match self {
            Self::Exclude(fragments) => (fragments, false),
            Self::Include(fragments) => (fragments, true),
        };
        fragments
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
            .then_some(keep)
    }
}

/// Decide whether `relative` (a path below `source/`) survives `filters`.
///
/// The last matching rule wins; unmatched paths are kept.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use fabline::project::{PathFilter, passes_filters};
/// let filters = [
///     PathFilter::exclude(["/test/"]),
///     PathFilter::include(["/test/keep_me"]),
/// ];
/// assert!(!passes_filters(&filters, Utf8Path::new("core/test/a.f90")));
/// assert!(passes_filters(&filters, Utf8Path::new("core/test/keep_me.f90")));
/// assert!(passes_filters(&filters, Utf8Path::new("core/a.f90")));
/// ```
#[must_use]
pub fn passes_filters(filters: &[PathFilter], relative: &Utf8Path) -> bool {
    let candidate = format!("/{relative}");
    filters
        .iter()
        .filter_map(|filter| filter.verdict(&candidate))
        .last()
        .unwrap_or(true)
}

/// Rules used when an application does not override
/// [`ProjectSpecialization::path_filters`].
#[must_use]
pub fn default_path_filters() -> Vec<PathFilter> {
    vec![PathFilter::exclude(TEST_TREE_MARKERS.iter().copied())]
}

/// Customisation contract implemented once per application.
///
/// Only [`name`](Self::name) is required; every other method has a default
/// that either supplies the common LFRic behaviour or disables the stage it
/// feeds.
pub trait ProjectSpecialization: Send + Sync {
    /// Application name; combined with the toolchain id to label the
    /// workspace.
    fn name(&self) -> &str;

    /// Program (or module) the dependency graph is pruned to.
    fn root_symbol(&self) -> &str {
        self.name()
    }

    /// Source trees to copy into the workspace.
    fn acquire_sources(&self, _install_root: &Utf8Path) -> Vec<SourceGrab> {
        Vec::new()
    }

    /// Metadata file that drives configuration generation.
    fn metadata_path(&self, _install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        None
    }

    /// Script passed to the transformer; `None` runs the stock transformation.
    fn transformation_script(&self, _install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        None
    }

    /// Filters applied during source discovery.
    fn path_filters(&self) -> Vec<PathFilter> {
        default_path_filters()
    }

    /// Flags passed to the preprocessor ahead of the input and output paths.
    fn preprocessor_flags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Flags passed to the compiler after `-c`.
    fn compiler_flags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Flags appended to the link line.
    fn link_flags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Modules assumed to be supplied by prebuilt libraries.
    fn ignore_modules(&self) -> Vec<String> {
        DEFAULT_IGNORE_MODULES
            .iter()
            .map(|name| (*name).to_owned())
            .collect()
    }
}
