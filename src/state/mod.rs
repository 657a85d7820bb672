//! Scoped build state shared by every pipeline stage.
//!
//! A [`BuildState`] owns the workspace of one `(application, toolchain)` pair
//! for the duration of a pipeline run. Opening it creates the workspace
//! directories and takes an exclusive lock; [`BuildState::close`] flushes a
//! `build-state.json` snapshot and releases the lock. Stages only ever append
//! to the file sets, so no stage can discard another stage's output.

mod error;
mod layout;

pub use error::StateError;
pub use layout::WorkspaceLayout;

use crate::deps::DependencyGraph;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Workspace roots currently held by this process.
static OPEN_WORKSPACES: Mutex<BTreeSet<Utf8PathBuf>> = Mutex::new(BTreeSet::new());

/// Identity of a build: `<application>-<toolchain>`.
///
/// The label names a single directory under the workspace base, so neither
/// part may contain a path separator, `..` or NUL.
///
/// # Examples
///
/// ```
/// use fabline::state::WorkspaceLabel;
/// let label = WorkspaceLabel::new("gravity_wave", "gfortran").expect("valid label");
/// assert_eq!(label.as_str(), "gravity_wave-gfortran");
/// assert!(WorkspaceLabel::new("gravity_wave", "../escaped").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkspaceLabel(String);

impl WorkspaceLabel {
    /// Combine the application name with the active toolchain id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidLabel`] if either part is rejected by
    /// [`check_label_part`].
    pub fn new(application: &str, toolchain: &str) -> Result<Self, StateError> {
        for part in [application, toolchain] {
            check_label_part(part).map_err(|reason| StateError::InvalidLabel {
                part: part.to_owned(),
                reason,
            })?;
        }
        Ok(Self(format!("{application}-{toolchain}")))
    }

    /// Borrow the label text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `part` can form part of a workspace directory name.
///
/// # Errors
///
/// Returns the reason `part` is rejected.
pub fn check_label_part(part: &str) -> Result<(), &'static str> {
    if part.is_empty() {
        Err("must not be empty")
    } else if part.contains(['/', '\\']) {
        Err("must not contain a path separator")
    } else if part.contains("..") {
        Err("must not contain `..`")
    } else if part.contains('\0') {
        Err("must not contain NUL")
    } else {
        Ok(())
    }
}

/// Fields of [`BuildState`] that stages declare as prerequisites or effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateField {
    /// Files discovered under `source/`.
    SourceFiles,
    /// Files produced by generators, preprocessors and transformers.
    GeneratedFiles,
    /// Compiled object files.
    ObjectFiles,
    /// The resolved module dependency graph.
    DependencyGraph,
    /// The object archive.
    Archive,
    /// The linked executable.
    Executable,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceFiles => "source files",
            Self::GeneratedFiles => "generated files",
            Self::ObjectFiles => "object files",
            Self::DependencyGraph => "dependency graph",
            Self::Archive => "archive",
            Self::Executable => "executable",
        };
        f.write_str(name)
    }
}

/// Releases the workspace lock when dropped.
#[derive(Debug)]
struct WorkspaceLock {
    root: Utf8PathBuf,
    file: Utf8PathBuf,
}

impl WorkspaceLock {
    fn acquire(label: &WorkspaceLabel, layout: &WorkspaceLayout) -> Result<Self, StateError> {
        let conflict = || StateError::WorkspaceConflict {
            label: label.clone(),
            path: layout.root().to_owned(),
        };
        let key = registry_key(layout.root());
        let mut open = OPEN_WORKSPACES
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !open.insert(key.clone()) {
            return Err(conflict());
        }
        let file = layout.lock_file();
        let mut created = create_lock_file(&file);
        if matches!(&created, Err(err) if err.kind() == io::ErrorKind::AlreadyExists)
            && owner_is_gone(&file)
        {
            warn!(lock = %file, "taking over a lock left by a process that is no longer running");
            created = fs::remove_file(file.as_std_path()).and_then(|()| create_lock_file(&file));
        }
        match created {
            Ok(()) => Ok(Self { root: key, file }),
            Err(err) => {
                open.remove(&key);
                if err.kind() == io::ErrorKind::AlreadyExists {
                    Err(conflict())
                } else {
                    Err(StateError::io(file, err))
                }
            }
        }
    }

    fn release(self) -> Result<(), StateError> {
        let result = fs::remove_file(self.file.as_std_path())
            .map_err(|err| StateError::io(self.file.clone(), err));
        // Drop removes the registry entry.
        drop(self);
        result
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if self.file.exists() {
            drop(fs::remove_file(self.file.as_std_path()));
        }
        OPEN_WORKSPACES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.root);
    }
}

/// Canonical form of `root`, so equivalent spellings share one entry.
fn registry_key(root: &Utf8Path) -> Utf8PathBuf {
    root.canonicalize_utf8().unwrap_or_else(|_| root.to_owned())
}

fn create_lock_file(file: &Utf8Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(file.as_std_path())
        .and_then(|mut handle| writeln!(handle, "{}", std::process::id()))
}

/// Whether the process recorded in the lock file has exited.
///
/// Unreadable or foreign lock contents count as a live owner.
#[cfg(unix)]
fn owner_is_gone(file: &Utf8Path) -> bool {
    use rustix::io::Errno;
    use rustix::process::{Pid, test_kill_process};

    let Ok(text) = fs::read_to_string(file.as_std_path()) else {
        return false;
    };
    let Some(pid) = text.trim().parse::<i32>().ok().and_then(Pid::from_raw) else {
        return false;
    };
    matches!(test_kill_process(pid), Err(Errno::SRCH))
}

#[cfg(not(unix))]
const fn owner_is_gone(_file: &Utf8Path) -> bool {
    false
}

#[derive(Serialize)]
struct StateSnapshot<'a> {
    label: &'a WorkspaceLabel,
    install_root: &'a Utf8Path,
    workspace: &'a Utf8Path,
    source_files: &'a IndexSet<Utf8PathBuf>,
    generated_files: &'a IndexSet<Utf8PathBuf>,
    object_files: &'a IndexSet<Utf8PathBuf>,
    dependency_graph: Option<&'a DependencyGraph>,
    archive: Option<&'a Utf8PathBuf>,
    executable: Option<&'a Utf8PathBuf>,
}

/// Mutable record of workspace paths and accumulated build artefacts.
#[derive(Debug)]
pub struct BuildState {
    label: WorkspaceLabel,
    install_root: Utf8PathBuf,
    layout: WorkspaceLayout,
    source_files: IndexSet<Utf8PathBuf>,
    generated_files: IndexSet<Utf8PathBuf>,
    object_files: IndexSet<Utf8PathBuf>,
    dependency_graph: Option<DependencyGraph>,
    archive: Option<Utf8PathBuf>,
    executable: Option<Utf8PathBuf>,
    lock: Option<WorkspaceLock>,
}

impl BuildState {
    /// Create the workspace for `label` under `workspace_base` and lock it.
    ///
    /// `source/` and `build_output/` are created eagerly; the configuration
    /// directory is left to the stage that generates it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::WorkspaceConflict`] when the workspace is already
    /// open, or [`StateError::Io`] if the directories cannot be created.
    pub fn open(
        label: WorkspaceLabel,
        workspace_base: &Utf8Path,
        install_root: &Utf8Path,
    ) -> Result<Self, StateError> {
        let layout = WorkspaceLayout::new(workspace_base.join(label.as_str()));
        for dir in [layout.source(), layout.build_output()] {
            fs::create_dir_all(dir.as_std_path()).map_err(|err| StateError::io(dir, err))?;
        }
        let lock = WorkspaceLock::acquire(&label, &layout)?;
        debug!(workspace = %layout.root(), "opened build state");
        Ok(Self {
            label,
            install_root: install_root.to_owned(),
            layout,
            source_files: IndexSet::new(),
            generated_files: IndexSet::new(),
            object_files: IndexSet::new(),
            dependency_graph: None,
            archive: None,
            executable: None,
            lock: Some(lock),
        })
    }

    /// Flush the state snapshot and release the workspace lock.
    ///
    /// Consuming `self` means a state can only be closed once.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written or the lock file
    /// cannot be removed. The lock is released in either case.
    pub fn close(mut self) -> Result<(), StateError> {
        let flushed = self.flush();
        let released = self.lock.take().map_or(Ok(()), WorkspaceLock::release);
        debug!(workspace = %self.layout.root(), "closed build state");
        flushed.and(released)
    }

    fn flush(&self) -> Result<(), StateError> {
        let path = self.layout.state_file();
        let snapshot = StateSnapshot {
            label: &self.label,
            install_root: &self.install_root,
            workspace: self.layout.root(),
            source_files: &self.source_files,
            generated_files: &self.generated_files,
            object_files: &self.object_files,
            dependency_graph: self.dependency_graph.as_ref(),
            archive: self.archive.as_ref(),
            executable: self.executable.as_ref(),
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(|source| {
            StateError::Serialise {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(path.as_std_path(), json).map_err(|err| StateError::io(path, err))
    }

    /// Identity of this build.
    #[must_use]
    pub const fn label(&self) -> &WorkspaceLabel {
        &self.label
    }

    /// Root of the application installation.
    #[must_use]
    pub fn install_root(&self) -> &Utf8Path {
        &self.install_root
    }

    /// Directory layout of the workspace.
    #[must_use]
    pub const fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Files discovered under `source/`, in discovery order.
    #[must_use]
    pub const fn source_files(&self) -> &IndexSet<Utf8PathBuf> {
        &self.source_files
    }

    /// Files written by generation, preprocessing and transformation stages.
    #[must_use]
    pub const fn generated_files(&self) -> &IndexSet<Utf8PathBuf> {
        &self.generated_files
    }

    /// Object files produced by compilation.
    #[must_use]
    pub const fn object_files(&self) -> &IndexSet<Utf8PathBuf> {
        &self.object_files
    }

    /// The dependency graph, once analysis has run.
    #[must_use]
    pub const fn dependency_graph(&self) -> Option<&DependencyGraph> {
        self.dependency_graph.as_ref()
    }

    /// The object archive, once archiving has run.
    #[must_use]
    pub fn archive(&self) -> Option<&Utf8Path> {
        self.archive.as_deref()
    }

    /// The linked executable, once linking has run.
    #[must_use]
    pub fn executable(&self) -> Option<&Utf8Path> {
        self.executable.as_deref()
    }

    /// Append discovered source files, returning how many were new.
    pub fn extend_source_files(&mut self, files: impl IntoIterator<Item = Utf8PathBuf>) -> usize {
        append(&mut self.source_files, files)
    }

    /// Append generated files, returning how many were new.
    pub fn extend_generated_files(
        &mut self,
        files: impl IntoIterator<Item = Utf8PathBuf>,
    ) -> usize {
        append(&mut self.generated_files, files)
    }

    /// Append object files, returning how many were new.
    pub fn extend_object_files(&mut self, files: impl IntoIterator<Item = Utf8PathBuf>) -> usize {
        append(&mut self.object_files, files)
    }

    /// Record the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AlreadySet`] if a graph was already recorded.
    pub fn set_dependency_graph(&mut self, graph: DependencyGraph) -> Result<(), StateError> {
        set_once(&mut self.dependency_graph, graph, StateField::DependencyGraph)
    }

    /// Record the object archive.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AlreadySet`] if an archive was already recorded.
    pub fn set_archive(&mut self, archive: Utf8PathBuf) -> Result<(), StateError> {
        set_once(&mut self.archive, archive, StateField::Archive)
    }

    /// Record the linked executable.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AlreadySet`] if an executable was already
    /// recorded.
    pub fn set_executable(&mut self, executable: Utf8PathBuf) -> Result<(), StateError> {
        set_once(&mut self.executable, executable, StateField::Executable)
    }

    /// Report whether `field` holds at least one value.
    #[must_use]
    pub fn is_populated(&self, field: StateField) -> bool {
        match field {
            StateField::SourceFiles => !self.source_files.is_empty(),
            StateField::GeneratedFiles => !self.generated_files.is_empty(),
            StateField::ObjectFiles => !self.object_files.is_empty(),
            StateField::DependencyGraph => self.dependency_graph.is_some(),
            StateField::Archive => self.archive.is_some(),
            StateField::Executable => self.executable.is_some(),
        }
    }
}

impl Drop for BuildState {
    fn drop(&mut self) {
        if self.lock.is_none() {
            return;
        }
        warn!(workspace = %self.layout.root(), "build state dropped without close");
        if let Err(err) = self.flush() {
            warn!(error = %err, "failed to flush build state during drop");
        }
        drop(self.lock.take());
    }
}

fn append(set: &mut IndexSet<Utf8PathBuf>, files: impl IntoIterator<Item = Utf8PathBuf>) -> usize {
    files
        .into_iter()
        .map(|file| usize::from(set.insert(file)))
        .sum()
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: StateField) -> Result<(), StateError> {
    if slot.is_some() {
        return Err(StateError::AlreadySet { field });
    }
    *slot = Some(value);
    Ok(())
}
