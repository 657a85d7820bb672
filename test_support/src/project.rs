//! Configurable application for driving the pipeline in tests.

use camino::{Utf8Path, Utf8PathBuf};
use fabline::project::{PathFilter, ProjectSpecialization, SourceGrab, default_path_filters};

/// Application whose every customisation point is a plain field.
#[derive(Debug, Clone)]
pub struct TestProject {
    /// Application name.
    pub name: String,
    /// Root symbol; defaults to the name.
    pub root: Option<String>,
    /// Source trees to acquire.
    pub grabs: Vec<SourceGrab>,
    /// Metadata file for configuration generation.
    pub metadata: Option<Utf8PathBuf>,
    /// Transformation script.
    pub script: Option<Utf8PathBuf>,
    /// Discovery filters.
    pub filters: Vec<PathFilter>,
    /// Compiler flags.
    pub compiler_flags: Vec<String>,
    /// Link flags.
    pub link_flags: Vec<String>,
    /// Ignored modules.
    pub ignore: Vec<String>,
}

impl TestProject {
    /// A project called `name` with no inputs and the default filters.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            root: None,
            grabs: Vec::new(),
            metadata: None,
            script: None,
            filters: default_path_filters(),
            compiler_flags: Vec::new(),
            link_flags: Vec::new(),
            ignore: vec!["mpi".to_owned()],
        }
    }

    /// Copy `tree` straight into `source/`.
    #[must_use]
    pub fn with_grab(mut self, tree: &Utf8Path) -> Self {
        self.grabs.push(SourceGrab::new(tree));
        self
    }

    /// Use `path` as the configuration metadata.
    #[must_use]
    pub fn with_metadata(mut self, path: &Utf8Path) -> Self {
        self.metadata = Some(path.to_owned());
        self
    }

    /// Prune the graph to `symbol` instead of the name.
    #[must_use]
    pub fn with_root(mut self, symbol: &str) -> Self {
        self.root = Some(symbol.to_owned());
        self
    }
}

impl ProjectSpecialization for TestProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn root_symbol(&self) -> &str {
        self.root.as_deref().unwrap_or(&self.name)
    }

    fn acquire_sources(&self, _install_root: &Utf8Path) -> Vec<SourceGrab> {
        self.grabs.clone()
    }

    fn metadata_path(&self, _install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        self.metadata.clone()
    }

    fn transformation_script(&self, _install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        self.script.clone()
    }

    fn path_filters(&self) -> Vec<PathFilter> {
        self.filters.clone()
    }

    fn compiler_flags(&self) -> Vec<String> {
        self.compiler_flags.clone()
    }

    fn link_flags(&self) -> Vec<String> {
        self.link_flags.clone()
    }

    fn ignore_modules(&self) -> Vec<String> {
        self.ignore.clone()
    }
}
