//! In-process stand-ins for the external tools.

use camino::{Utf8Path, Utf8PathBuf};
use fabline::tool::{ToolError, ToolInvocation, ToolKind, ToolRunner};
use std::fs;
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// [`ToolRunner`] that imitates each tool role and records every call.
///
/// - the source copier copies its input tree into its output directory;
/// - the preprocessor copies its input to its output;
/// - the picker writes an empty namelist index and an empty JSON document;
/// - the transformer copies the algorithm source and writes an empty PSy
///   module named after the output file;
/// - configuration generators write empty modules named after their outputs;
/// - the compiler, archiver and linker write placeholder outputs.
#[derive(Clone, Default)]
pub struct FakeTools {
    calls: Arc<Mutex<Vec<ToolInvocation>>>,
    failing: Option<ToolKind>,
}

impl FakeTools {
    /// Create a runner where every tool succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `kind` exit with status 1.
    #[must_use]
    pub fn failing(mut self, kind: ToolKind) -> Self {
        self.failing = Some(kind);
        self
    }

    /// Invocations received so far, in call order.
    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Invocations of `kind` received so far.
    pub fn calls_of(&self, kind: ToolKind) -> Vec<ToolInvocation> {
        self.calls()
            .into_iter()
            .filter(|call| call.kind == kind)
            .collect()
    }

    fn imitate(invocation: &ToolInvocation) {
        let first_input = invocation.inputs.first();
        match invocation.kind {
            ToolKind::SourceCopy => {
                if let (Some(from), Some(to)) = (first_input, invocation.outputs.first()) {
                    copy_tree(from, to);
                }
            }
            ToolKind::Preprocessor => {
                if let (Some(from), Some(to)) = (first_input, invocation.outputs.first()) {
                    ensure_parent(to);
                    fs::copy(from, to).expect("copy preprocessed source");
                }
            }
            ToolKind::Transformer => {
                let mut outputs = invocation.outputs.iter();
                if let (Some(from), Some(algorithm)) = (
                    invocation.inputs.iter().find(|p| p.extension() == Some("x90")),
                    outputs.next(),
                ) {
                    ensure_parent(algorithm);
                    fs::copy(from, algorithm).expect("copy algorithm source");
                }
                outputs.for_each(|psy| write_module(psy));
            }
            ToolKind::Configurator => {
                for output in &invocation.outputs {
                    match output.extension() {
                        Some("f90") => write_module(output),
                        Some("json") => write(output, "{}\n"),
                        _ => write(output, ""),
                    }
                }
            }
            ToolKind::Compiler | ToolKind::Archiver | ToolKind::Linker => {
                for output in &invocation.outputs {
                    write(output, &format!("fake {}\n", invocation.kind));
                }
            }
        }
    }
}

impl ToolRunner for FakeTools {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), ToolError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(invocation.clone());
        if self.failing == Some(invocation.kind) {
            return Err(ToolError::Exit {
                tool: invocation.kind,
                program: invocation.program.clone(),
                status: Some(1),
                stderr: "injected failure".to_owned(),
            });
        }
        Self::imitate(invocation);
        Ok(())
    }
}

fn ensure_parent(path: &Utf8Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir");
    }
}

fn write(path: &Utf8Path, text: &str) {
    ensure_parent(path);
    fs::write(path, text).expect("write tool output");
}

fn write_module(path: &Utf8Path) {
    let name = path.file_stem().unwrap_or("generated");
    write(path, &format!("module {name}\nend module {name}\n"));
}

fn copy_tree(from: &Utf8Path, to: &Utf8Path) {
    for walked in WalkDir::new(from).sort_by_file_name() {
        let entry = walked.expect("walk source tree");
        let path = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()).expect("utf8 path");
        let relative = path.strip_prefix(from).expect("path below tree");
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).expect("create dir");
        } else {
            ensure_parent(&target);
            fs::copy(&path, &target).expect("copy file");
        }
    }
}
