//! Unit tests for the stage catalogue and individual stage behaviour.

use super::*;
use crate::deps::{IgnoreSet, analyze, scan_source};
use crate::state::WorkspaceLabel;
use rstest::{fixture, rstest};
use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::tool::MockToolRunner;

struct DemoApp {
    metadata: Option<Utf8PathBuf>,
    script: Option<Utf8PathBuf>,
}

impl ProjectSpecialization for DemoApp {
    fn name(&self) -> &str {
        "demo"
    }

    fn metadata_path(&self, _install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        self.metadata.clone()
    }

    fn transformation_script(&self, _install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        self.script.clone()
    }

    fn preprocessor_flags(&self) -> Vec<String> {
        vec!["-DDEMO_APP=1".to_owned()]
    }

    fn compiler_flags(&self) -> Vec<String> {
        vec!["-O2".to_owned()]
    }

    fn link_flags(&self) -> Vec<String> {
        vec!["-lm".to_owned()]
    }
}

const PLAIN: DemoApp = DemoApp {
    metadata: None,
    script: None,
};

struct Harness {
    state: BuildState,
    toolchain: Toolchain,
    tools: ToolSet,
    config: PipelineConfig,
    cancel: CancelFlag,
    _dir: TempDir,
}

impl Harness {
    fn run(
        &mut self,
        stage: &dyn Stage,
        project: &dyn ProjectSpecialization,
        runner: &dyn ToolRunner,
    ) -> Result<StageOutcome, StageFailure> {
        let mut ctx = StageContext {
            state: &mut self.state,
            project,
            toolchain: &self.toolchain,
            tools: &self.tools,
            runner,
            config: &self.config,
            cancel: &self.cancel,
        };
        stage.run(&mut ctx)
    }

    fn source(&self, relative: &str, text: &str) -> Utf8PathBuf {
        let path = self.state.layout().source().join(relative);
        write(&path, text);
        path
    }

    fn output(&self, relative: &str) -> Utf8PathBuf {
        self.state.layout().build_output().join(relative)
    }
}

fn write(path: &Utf8Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir");
    }
    fs::write(path, text).expect("write file");
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    let install = base.join("lfric");
    let state = BuildState::open(
        WorkspaceLabel::new("demo", "gfortran").expect("label"),
        &base.join("ws"),
        &install,
    )
    .expect("open state");
    let toolchain = Toolchain::default();
    let tools = ToolSet::defaults(&toolchain, &install);
    let config = PipelineConfig {
        workspace_base: base.join("ws"),
        ..PipelineConfig::default()
    };
    Harness {
        state,
        toolchain,
        tools,
        config,
        cancel: CancelFlag::new(),
        _dir: dir,
    }
}

/// Create every declared output the tool did not already write.
fn create_outputs(inv: &ToolInvocation) {
    for output in inv.outputs.iter().filter(|output| !output.exists()) {
        if output.extension().is_some() {
            write(output, "! generated\n");
        } else {
            fs::create_dir_all(output).expect("output dir");
        }
    }
}

type Calls = Arc<Mutex<Vec<ToolInvocation>>>;

/// A mock runner that records every call and creates the declared outputs.
fn recording_runner() -> (MockToolRunner, Calls) {
    let calls: Calls = Arc::default();
    let sink = Arc::clone(&calls);
    let mut runner = MockToolRunner::new();
    runner.expect_run().returning(move |inv| {
        create_outputs(inv);
        sink.lock().expect("calls lock").push(inv.clone());
        Ok(())
    });
    (runner, calls)
}

fn taken(calls: &Calls) -> Vec<ToolInvocation> {
    calls.lock().expect("calls lock").clone()
}

#[rstest]
fn registry_runs_in_canonical_order() {
    let ids: Vec<StageId> = StageRegistry::standard()
        .specs()
        .iter()
        .map(|spec| spec.id)
        .collect();
    assert_eq!(ids, StageId::ALL);
    let ordinals: Vec<u32> = StageRegistry::standard()
        .specs()
        .iter()
        .map(StageSpec::ordinal)
        .collect();
    assert_eq!(ordinals, (1..=STAGE_COUNT).collect::<Vec<_>>());
}

#[rstest]
fn every_requirement_is_an_earlier_effect() {
    let mut available = BTreeSet::new();
    for spec in StageRegistry::standard().specs() {
        for field in spec.requires {
            assert!(
                available.contains(field),
                "{} requires {field} before any stage produces it",
                spec.id
            );
        }
        available.extend(spec.effects.iter().copied());
    }
}

#[rstest]
fn configuration_without_metadata_touches_nothing(mut harness: Harness) {
    let mut runner = MockToolRunner::new();
    runner.expect_run().never();
    let outcome = harness
        .run(&GenerateConfiguration, &PLAIN, &runner)
        .expect("skip");
    assert!(matches!(outcome, StageOutcome::Skipped(_)));
    assert!(!harness.state.layout().configuration().exists());
    assert!(harness.state.generated_files().is_empty());
}

#[rstest]
fn configuration_runs_picker_and_generators(mut harness: Harness) {
    let meta = harness.state.install_root().join("app/rose-meta.conf");
    let project = DemoApp {
        metadata: Some(meta.clone()),
        script: None,
    };
    let config_dir = harness.state.layout().configuration();
    let calls: Calls = Arc::default();
    let sink = Arc::clone(&calls);
    let dir = config_dir.clone();
    let mut runner = MockToolRunner::new();
    runner.expect_run().returning(move |inv| {
        if inv.program.ends_with("rose_picker") {
            write(&dir.join("rose-meta.json"), "{}");
            write(&dir.join("config_namelists.txt"), "base_mesh\nplanet\n");
        }
        if inv.program.ends_with("GenerateNamelist") {
            write(&dir.join("base_mesh_config_mod.f90"), "module base_mesh_config_mod\nend module\n");
        }
        create_outputs(inv);
        sink.lock().expect("calls lock").push(inv.clone());
        Ok(())
    });

    harness.run(&GenerateConfiguration, &project, &runner).expect("configure");

    let recorded = taken(&calls);
    let programs: Vec<&str> = recorded
        .iter()
        .filter_map(|inv| Utf8Path::new(&inv.program).file_name())
        .collect();
    assert_eq!(
        programs,
        ["rose_picker", "GenerateLoader", "GenerateNamelist", "GenerateFeigns"]
    );
    let loader = recorded.get(1).expect("loader call");
    assert_eq!(
        loader.args,
        [config_dir.join("configuration_mod.f90").into_string(), "base_mesh".to_owned(), "planet".to_owned()]
    );
    let picker = recorded.first().expect("picker call");
    assert_eq!(picker.args.first().map(String::as_str), Some(meta.as_str()));
    let generated: Vec<&str> = harness
        .state
        .generated_files()
        .iter()
        .filter_map(|path| path.file_name())
        .collect();
    assert_eq!(
        generated,
        ["base_mesh_config_mod.f90", "configuration_mod.f90", "feign_config_mod.f90"]
    );
}

#[rstest]
fn discovery_applies_default_filters(mut harness: Harness) {
    let kept = harness.source("driver/driver_mod.F90", "");
    harness.source("driver/unit-test/driver_mod_test.pf", "");
    harness.source("test/harness.f90", "");
    let alg = harness.source("gw/gw_alg.x90", "");
    let runner = MockToolRunner::new();
    harness
        .run(&DiscoverSourceFiles, &PLAIN, &runner)
        .expect("discover");
    let found: Vec<&Utf8PathBuf> = harness.state.source_files().iter().collect();
    assert_eq!(found, [&kept, &alg]);
}

#[rstest]
fn fortran_preprocessing_runs_cpp_and_copies_plain_sources(mut harness: Harness) {
    let upper = harness.source("a/alpha_mod.F90", "module alpha_mod\nend module\n");
    let lower = harness.source("a/beta_mod.f90", "module beta_mod\nend module\n");
    harness.source("a/gamma_alg.X90", "");
    let files = harness.state.layout().source();
    harness.state.extend_source_files([upper.clone(), lower, files.join("a/gamma_alg.X90")]);
    let (runner, calls) = recording_runner();

    harness
        .run(&Preprocess::fortran(), &PLAIN, &runner)
        .expect("preprocess");

    let recorded = taken(&calls);
    assert_eq!(recorded.len(), 1);
    let alpha = harness.output("a/alpha_mod.f90");
    assert_eq!(
        recorded.first().map(|inv| inv.args.clone()),
        Some(vec![
            "-traditional-cpp".to_owned(),
            "-P".to_owned(),
            "-DDEMO_APP=1".to_owned(),
            upper.into_string(),
            alpha.clone().into_string(),
        ])
    );
    let beta = harness.output("a/beta_mod.f90");
    assert_eq!(
        fs::read_to_string(&beta).expect("copied"),
        "module beta_mod\nend module\n"
    );
    let generated: Vec<&Utf8PathBuf> = harness.state.generated_files().iter().collect();
    assert_eq!(generated, [&alpha, &beta]);
}

#[rstest]
fn x90_stage_skips_without_algorithm_sources(mut harness: Harness) {
    let only = harness.source("a/beta_mod.f90", "");
    harness.state.extend_source_files([only]);
    let mut runner = MockToolRunner::new();
    runner.expect_run().never();
    let outcome = harness.run(&Preprocess::x90(), &PLAIN, &runner).expect("skip");
    assert!(matches!(outcome, StageOutcome::Skipped(_)));
}

#[rstest]
#[case::stock(None)]
#[case::scripted(Some("/lfric/optimisation/global.py"))]
fn psyclone_passes_kernel_root_and_optional_script(mut harness: Harness, #[case] script: Option<&str>) {
    let x90 = harness.output("gw/gw_alg.x90");
    write(&x90, "");
    harness.state.extend_generated_files([x90.clone()]);
    let project = DemoApp {
        metadata: None,
        script: script.map(Utf8PathBuf::from),
    };
    let (runner, calls) = recording_runner();

    harness.run(&Psyclone, &project, &runner).expect("psyclone");

    let alg = harness.output("gw/gw_alg.f90");
    let psy = harness.output("gw/gw_alg_psy.f90");
    let mut expected: Vec<String> = ["-api", "dynamo0.3", "-l", "all", "-opsy", psy.as_str(), "-oalg", alg.as_str()]
        .map(str::to_owned)
        .to_vec();
    if let Some(path) = script {
        expected.extend(["-s".to_owned(), path.to_owned()]);
    }
    let build_output = harness.state.layout().build_output();
    expected.extend(["-d".to_owned(), build_output.into_string(), x90.into_string()]);
    let recorded = taken(&calls);
    assert_eq!(recorded.first().map(|inv| inv.args.clone()), Some(expected));
    assert!(harness.state.generated_files().contains(&alg));
    assert!(harness.state.generated_files().contains(&psy));
}

#[rstest]
fn workaround_rewrites_generated_sources_in_place(mut harness: Harness) {
    let feign = harness.output("configuration/feign_config_mod.f90");
    write(&feign, "stop 'feign: ' // &\n  'Unable to close temporary file'\n");
    harness.state.extend_generated_files([feign.clone()]);
    let runner = MockToolRunner::new();
    harness
        .run(&StopConcatenationWorkaround, &PLAIN, &runner)
        .expect("workaround");
    assert_eq!(
        fs::read_to_string(&feign).expect("read"),
        "stop 'feign: Unable to close temporary file'\n"
    );
}

fn seed_graph(harness: &mut Harness, units: &[(&str, &str)]) {
    let scanned: Vec<_> = units
        .iter()
        .map(|(path, text)| scan_source(Utf8PathBuf::from(*path), text))
        .collect();
    let graph = analyze(&scanned, &IgnoreSet::new(["mpi"]), "demo").expect("graph");
    harness.state.set_dependency_graph(graph).expect("set graph");
}

#[rstest]
fn analysis_records_graph_relative_to_build_output(mut harness: Harness) {
    let main = harness.output("demo.f90");
    let util = harness.output("lib/util_mod.f90");
    write(&main, "program demo\n  use util_mod\n  use mpi\nend program\n");
    write(&util, "module util_mod\nend module\n");
    harness.state.extend_generated_files([main, util]);
    let runner = MockToolRunner::new();
    harness
        .run(&AnalyseDependencies, &PLAIN, &runner)
        .expect("analyse");
    let graph = harness.state.dependency_graph().expect("graph recorded");
    assert_eq!(graph.root(), "demo.f90");
    assert_eq!(graph.dependencies(Utf8Path::new("demo.f90")), [Utf8PathBuf::from("lib/util_mod.f90")]);
}

#[rstest]
fn analysis_surfaces_unresolved_modules(mut harness: Harness) {
    let main = harness.output("demo.f90");
    write(&main, "program demo\n  use missing_mod\nend program\n");
    harness.state.extend_generated_files([main]);
    let runner = MockToolRunner::new();
    let err = harness
        .run(&AnalyseDependencies, &PLAIN, &runner)
        .expect_err("unresolved");
    assert!(matches!(
        err,
        StageFailure::Analysis(crate::deps::AnalysisError::UnresolvedModule { .. })
    ));
}

#[rstest]
fn compilation_follows_dependency_layers(mut harness: Harness) {
    seed_graph(
        &mut harness,
        &[
            ("demo.f90", "program demo\nuse util_mod\nend program\n"),
            ("util_mod.f90", "module util_mod\nend module\n"),
        ],
    );
    let (runner, calls) = recording_runner();

    harness
        .run(&CompileFortran, &PLAIN, &runner)
        .expect("compile");

    let recorded = taken(&calls);
    let output = harness.state.layout().build_output();
    let util = output.join("util_mod.f90");
    assert_eq!(
        recorded.first().map(|inv| inv.args.clone()),
        Some(vec![
            "-c".to_owned(),
            "-O2".to_owned(),
            "-J".to_owned(),
            output.clone().into_string(),
            util.into_string(),
            "-o".to_owned(),
            output.join("util_mod.o").into_string(),
        ])
    );
    assert_eq!(recorded.first().map(|inv| inv.cwd.clone()), Some(output.clone()));
    let objects: Vec<&Utf8PathBuf> = harness.state.object_files().iter().collect();
    assert_eq!(
        objects,
        [&output.join("util_mod.o"), &output.join("demo.o")]
    );
}

#[rstest]
fn archive_and_link_keep_the_root_object_out_of_the_archive(mut harness: Harness) {
    seed_graph(
        &mut harness,
        &[
            ("demo.f90", "program demo\nuse util_mod\nend program\n"),
            ("util_mod.f90", "module util_mod\nend module\n"),
        ],
    );
    let output = harness.state.layout().build_output();
    harness
        .state
        .extend_object_files([output.join("util_mod.o"), output.join("demo.o")]);
    let (runner, calls) = recording_runner();

    harness
        .run(&ArchiveObjects, &PLAIN, &runner)
        .expect("archive");
    harness
        .run(&LinkExecutable, &PLAIN, &runner)
        .expect("link");

    let recorded = taken(&calls);
    let archive = output.join("demo.a");
    let executable = output.join("demo");
    assert_eq!(
        recorded.first().map(|inv| inv.args.clone()),
        Some(vec![
            "cr".to_owned(),
            archive.clone().into_string(),
            output.join("util_mod.o").into_string(),
        ])
    );
    assert_eq!(
        recorded.get(1).map(|inv| inv.args.clone()),
        Some(vec![
            "-o".to_owned(),
            executable.clone().into_string(),
            output.join("demo.o").into_string(),
            archive.clone().into_string(),
            "-lm".to_owned(),
        ])
    );
    assert_eq!(harness.state.archive(), Some(archive.as_path()));
    assert_eq!(harness.state.executable(), Some(executable.as_path()));
}

#[rstest]
fn single_object_builds_link_without_archive(mut harness: Harness) {
    seed_graph(&mut harness, &[("demo.f90", "program demo\nend program\n")]);
    let output = harness.state.layout().build_output();
    harness.state.extend_object_files([output.join("demo.o")]);
    let (runner, calls) = recording_runner();

    let archived = harness
        .run(&ArchiveObjects, &PLAIN, &runner)
        .expect("archive");
    harness
        .run(&LinkExecutable, &PLAIN, &runner)
        .expect("link");

    assert!(matches!(archived, StageOutcome::Skipped(_)));
    let recorded = taken(&calls);
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded.first().map(|inv| inv.args.len()),
        Some(4),
        "-o <exe> <root object> -lm"
    );
}

#[rstest]
fn cancelled_context_refuses_new_tools(mut harness: Harness) {
    seed_graph(&mut harness, &[("demo.f90", "program demo\nend program\n")]);
    harness.cancel.cancel();
    let mut runner = MockToolRunner::new();
    runner.expect_run().never();
    let err = harness
        .run(&CompileFortran, &PLAIN, &runner)
        .expect_err("cancelled");
    assert!(matches!(err, StageFailure::Cancelled));
}

#[rstest]
fn tool_killed_by_cancellation_fails_the_stage_as_cancelled(mut harness: Harness) {
    seed_graph(&mut harness, &[("demo.f90", "program demo\nend program\n")]);
    let mut runner = MockToolRunner::new();
    runner.expect_run().times(1).returning(|inv| {
        Err(crate::tool::ToolError::Cancelled {
            tool: inv.kind,
            program: inv.program.clone(),
        })
    });
    let err = harness
        .run(&CompileFortran, &PLAIN, &runner)
        .expect_err("cancelled");
    assert!(matches!(err, StageFailure::Cancelled));
}

#[rstest]
fn other_tool_failures_stay_tool_failures() {
    let failure = StageFailure::from(crate::tool::ToolError::Timeout {
        tool: crate::tool::ToolKind::Compiler,
        program: "gfortran".to_owned(),
        timeout: std::time::Duration::from_secs(1),
    });
    assert!(matches!(failure, StageFailure::Tool(_)));
}
