//! Test utilities for pipeline integration tests.
//!
//! Provides an in-process stand-in for every external tool, a reporter that
//! records what the driver announced, a configurable application and helpers
//! for creating workspaces and fake executables.

pub mod project;
pub mod reporter;
pub mod tools;

pub use project::TestProject;
pub use reporter::{Event, RecordingReporter};
pub use tools::FakeTools;

use camino::{Utf8Path, Utf8PathBuf};
use fabline::stage::{Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec};
use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory and return it with its UTF-8 path.
pub fn utf8_temp_dir() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path");
    (dir, path)
}

/// Write `text` to `path`, creating parent directories.
pub fn write_source(path: &Utf8Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir");
    }
    fs::write(path, text).expect("write source");
}

/// Write an executable shell script called `name` into `dir`.
pub fn fake_tool(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).expect("script");
    writeln!(file, "#!/bin/sh\n{body}").expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("perms");
    }
    path
}

/// Create a fake tool that exits with `exit_code`.
///
/// Returns the temporary directory and the path to the executable.
pub fn fake_exit_tool(exit_code: i32) -> (TempDir, Utf8PathBuf) {
    let (dir, path) = utf8_temp_dir();
    let tool = fake_tool(&path, "tool", &format!("exit {exit_code}"));
    (dir, tool)
}

/// Stage wrapper that fails instead of running the stage it wraps.
pub struct FailingStage {
    inner: Box<dyn Stage>,
}

impl FailingStage {
    /// Wrap `inner` so it always fails.
    pub const fn new(inner: Box<dyn Stage>) -> Self {
        Self { inner }
    }
}

impl Stage for FailingStage {
    fn spec(&self) -> StageSpec {
        self.inner.spec()
    }

    fn run(&self, _ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        Err(StageFailure::Io {
            path: Utf8PathBuf::from("injected"),
            source: io::Error::other("injected failure"),
        })
    }
}

/// Stage wrapper that records its id into `log` before delegating.
pub struct RecordingStage {
    inner: Box<dyn Stage>,
    log: Arc<Mutex<Vec<StageId>>>,
}

impl RecordingStage {
    /// Wrap `inner`, appending its id to `log` whenever it runs.
    pub const fn new(inner: Box<dyn Stage>, log: Arc<Mutex<Vec<StageId>>>) -> Self {
        Self { inner, log }
    }
}

impl Stage for RecordingStage {
    fn spec(&self) -> StageSpec {
        self.inner.spec()
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        self.log
            .lock()
            .expect("stage log lock")
            .push(self.inner.spec().id);
        self.inner.run(ctx)
    }
}
