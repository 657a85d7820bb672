//! Discovery of the application installation root.

use camino::{Utf8Path, Utf8PathBuf};
use std::{env, io, path::PathBuf};
use thiserror::Error;

/// Directory whose presence marks an installation root.
const ROOT_MARKER: &str = "infrastructure";

/// Errors raised while locating the installation root.
#[derive(Debug, Error)]
pub enum InstallRootError {
    /// The running executable could not be located.
    #[error("failed to locate the running executable")]
    CurrentExe(#[source] io::Error),
    /// The executable path is not valid UTF-8.
    #[error("executable path {} is not valid UTF-8", .0.display())]
    NonUtf8(PathBuf),
    /// No ancestor of the executable looks like an installation.
    #[error("no ancestor of {exe} contains an `{ROOT_MARKER}` directory")]
    NotFound {
        /// Executable whose ancestors were searched.
        exe: Utf8PathBuf,
    },
}

/// Root of the application source installation.
///
/// Derived from the location of the running executable so the build always
/// uses the tree it was installed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot(Utf8PathBuf);

impl InstallRoot {
    /// Use `path` as the installation root without checking it.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    /// Locate the root from the running executable.
    ///
    /// # Errors
    ///
    /// Returns an [`InstallRootError`] if the executable cannot be located or
    /// no ancestor contains an `infrastructure/` directory.
    pub fn discover() -> Result<Self, InstallRootError> {
        let current = env::current_exe().map_err(InstallRootError::CurrentExe)?;
        let exe = Utf8PathBuf::from_path_buf(current).map_err(InstallRootError::NonUtf8)?;
        Self::from_exe_path(&exe)
    }

    /// Locate the root from an executable path.
    ///
    /// # Errors
    ///
    /// Returns [`InstallRootError::NotFound`] when no ancestor of `exe`
    /// contains an `infrastructure/` directory.
    pub fn from_exe_path(exe: &Utf8Path) -> Result<Self, InstallRootError> {
        exe.ancestors()
            .skip(1)
            .find(|dir| dir.join(ROOT_MARKER).is_dir())
            .map(|dir| Self(dir.to_owned()))
            .ok_or_else(|| InstallRootError::NotFound {
                exe: exe.to_owned(),
            })
    }

    /// Borrow the root path.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }
}

impl AsRef<Utf8Path> for InstallRoot {
    fn as_ref(&self) -> &Utf8Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    #[rstest]
    fn finds_nearest_ancestor_with_marker() {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        fs::create_dir_all(root.join("infrastructure/build")).expect("marker");
        fs::create_dir_all(root.join("bin")).expect("bin");
        let found = InstallRoot::from_exe_path(&root.join("bin/fab-gravity-wave")).expect("root");
        assert_eq!(found.as_path(), root);
    }

    #[rstest]
    fn reports_missing_marker() {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        let err = InstallRoot::from_exe_path(&root.join("fab")).expect_err("no marker");
        assert!(matches!(err, InstallRootError::NotFound { .. }));
    }
}
