//! Directory layout of a build workspace.

use camino::{Utf8Path, Utf8PathBuf};

const SOURCE_DIR: &str = "source";
const CONFIGURATION_DIR: &str = "configuration";
const BUILD_OUTPUT_DIR: &str = "build_output";
const STATE_FILE: &str = "build-state.json";
const LOCK_FILE: &str = ".fabline.lock";

/// Paths inside one workspace root.
///
/// # Examples
///
/// ```
/// use fabline::state::WorkspaceLayout;
/// let layout = WorkspaceLayout::new("/ws/gravity_wave-gfortran".into());
/// assert_eq!(layout.configuration(), "/ws/gravity_wave-gfortran/source/configuration");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: Utf8PathBuf,
}

impl WorkspaceLayout {
    /// Describe the workspace rooted at `root`.
    #[must_use]
    pub const fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// Workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding acquired and generated sources.
    #[must_use]
    pub fn source(&self) -> Utf8PathBuf {
        self.root.join(SOURCE_DIR)
    }

    /// Directory holding generated configuration sources.
    #[must_use]
    pub fn configuration(&self) -> Utf8PathBuf {
        self.source().join(CONFIGURATION_DIR)
    }

    /// Directory holding intermediate and final build artefacts.
    #[must_use]
    pub fn build_output(&self) -> Utf8PathBuf {
        self.root.join(BUILD_OUTPUT_DIR)
    }

    /// Snapshot written when the state closes.
    #[must_use]
    pub fn state_file(&self) -> Utf8PathBuf {
        self.root.join(STATE_FILE)
    }

    pub(crate) fn lock_file(&self) -> Utf8PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Map a file under `source/` to its counterpart under `build_output/`,
    /// replacing the extension with `extension`.
    ///
    /// Files outside `source/` keep only their file name.
    #[must_use]
    pub fn output_for(&self, source: &Utf8Path, extension: &str) -> Utf8PathBuf {
        let source_root = self.source();
        let relative = source.strip_prefix(&source_root).map_or_else(
            |_| Utf8Path::new(source.file_name().unwrap_or_default()),
            |rel| rel,
        );
        self.build_output().join(relative).with_extension(extension)
    }

    /// Express `path` relative to `build_output/` when it lives there.
    #[must_use]
    pub fn relative_to_output(&self, path: &Utf8Path) -> Utf8PathBuf {
        path.strip_prefix(self.build_output())
            .map_or_else(|_| path.to_owned(), Utf8Path::to_owned)
    }
}
