//! End-to-end tests of the pipeline driver with in-process fake tools.

use camino::{Utf8Path, Utf8PathBuf};
use fabline::config::PipelineConfig;
use fabline::pipeline::{Artifact, BuildError, Pipeline};
use fabline::project::InstallRoot;
use fabline::stage::{
    CancelFlag, Stage, StageContext, StageFailure, StageId, StageOutcome, StageRegistry, StageSpec,
};
use fabline::state::{BuildState, WorkspaceLabel};
use fabline::tool::{ToolError, ToolKind, ToolSet};
use fabline::toolchain::Toolchain;
use rstest::{fixture, rstest};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use test_support::{
    FailingStage, FakeTools, RecordingReporter, RecordingStage, TestProject, utf8_temp_dir,
    write_source,
};

struct World {
    base: Utf8PathBuf,
    app: Utf8PathBuf,
    tools: FakeTools,
    reporter: RecordingReporter,
    _dir: TempDir,
}

impl World {
    fn pipeline(&self, id: &str) -> Pipeline {
        let config = PipelineConfig {
            workspace_base: self.base.join("ws"),
            ..PipelineConfig::default()
        };
        let toolchain = Toolchain::from_id(id);
        let install_root = InstallRoot::new(self.base.join("lfric"));
        let tools = ToolSet::defaults(&toolchain, install_root.as_path());
        Pipeline::new(config, toolchain, install_root)
            .with_tools(tools)
            .with_runner(self.tools.clone())
            .with_reporter(Box::new(self.reporter.clone()))
    }

    fn project(&self) -> TestProject {
        TestProject::new("gw").with_grab(&self.app)
    }

    fn workspace(&self, label: &str) -> Utf8PathBuf {
        self.base.join("ws").join(label)
    }
}

/// A small application tree:
///
/// `gw` uses `solver_mod` (and the ignored `mpi`); `solver_mod` uses
/// `kinds_mod` and the algorithm module `gw_alg`, which uses its generated
/// PSy layer. `unused_mod` references a module nobody provides and a test
/// tree holds a file that discovery must drop.
#[fixture]
fn world() -> World {
    let (dir, base) = utf8_temp_dir();
    let app = base.join("app");
    write_source(
        &app.join("main.F90"),
        "program gw\nuse mpi\nuse solver_mod\nend program gw\n",
    );
    write_source(
        &app.join("solver/solver_mod.f90"),
        "module solver_mod\nuse kinds_mod\nuse gw_alg\nend module solver_mod\n",
    );
    write_source(
        &app.join("solver/kinds_mod.f90"),
        "module kinds_mod\nend module kinds_mod\n",
    );
    write_source(
        &app.join("algorithm/gw_alg.x90"),
        "module gw_alg\nuse gw_alg_psy\nend module gw_alg\n",
    );
    write_source(
        &app.join("extra/unused_mod.f90"),
        "module unused_mod\nuse missing_mod\nend module unused_mod\n",
    );
    write_source(
        &app.join("solver/unit-test/kinds_mod_test.f90"),
        "module kinds_mod_test\nuse pfunit_mod\nend module kinds_mod_test\n",
    );
    World {
        base,
        app,
        tools: FakeTools::new(),
        reporter: RecordingReporter::new(),
        _dir: dir,
    }
}

fn relative_objects(artifact: &Artifact) -> Vec<Utf8PathBuf> {
    let mut objects: Vec<Utf8PathBuf> = artifact
        .objects
        .iter()
        .map(|object| {
            object
                .strip_prefix(&artifact.workspace)
                .expect("object inside workspace")
                .to_owned()
        })
        .collect();
    objects.sort();
    objects
}

#[rstest]
fn full_build_links_the_root_program(world: World) {
    let artifact = world.pipeline("gfortran").run(&world.project()).expect("build");
    let output = world.workspace("gw-gfortran").join("build_output");

    assert_eq!(artifact.workspace, world.workspace("gw-gfortran"));
    assert_eq!(artifact.executable, output.join("gw"));
    assert!(artifact.executable.is_file());
    assert_eq!(artifact.archive.as_deref(), Some(output.join("gw.a").as_path()));
    assert_eq!(
        relative_objects(&artifact),
        [
            "build_output/algorithm/gw_alg.o",
            "build_output/algorithm/gw_alg_psy.o",
            "build_output/main.o",
            "build_output/solver/kinds_mod.o",
            "build_output/solver/solver_mod.o",
        ]
    );
    assert_eq!(artifact.graph_digest.len(), 64);
    assert_eq!(world.reporter.teardowns(), 1);
}

#[rstest]
fn discovery_drops_test_trees_and_pruning_drops_unreachable_units(world: World) {
    world.pipeline("gfortran").run(&world.project()).expect("build");
    let output = world.workspace("gw-gfortran").join("build_output");

    assert!(!output.join("solver/unit-test").exists());
    assert!(output.join("extra/unused_mod.f90").is_file());
    let compiled: Vec<Utf8PathBuf> = world
        .tools
        .calls_of(ToolKind::Compiler)
        .iter()
        .flat_map(|call| call.inputs.clone())
        .collect();
    assert!(!compiled.contains(&output.join("extra/unused_mod.f90")));
}

#[rstest]
fn compile_respects_dependency_layers(world: World) {
    world.pipeline("gfortran").run(&world.project()).expect("build");
    let order: Vec<String> = world
        .tools
        .calls_of(ToolKind::Compiler)
        .iter()
        .filter_map(|call| call.inputs.first().and_then(|p| p.file_stem()).map(str::to_owned))
        .collect();
    let position = |stem: &str| order.iter().position(|s| s == stem).expect("compiled");
    assert!(position("kinds_mod") < position("solver_mod"));
    assert!(position("gw_alg_psy") < position("gw_alg"));
    assert!(position("gw_alg") < position("solver_mod"));
    assert!(position("solver_mod") < position("main"));
}

#[rstest]
fn stages_run_in_canonical_order(world: World) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = StageRegistry::standard()
        .instrument(|stage| Box::new(RecordingStage::new(stage, Arc::clone(&log))));
    world
        .pipeline("gfortran")
        .with_registry(registry)
        .run(&world.project().with_metadata(&world.base.join("rose-meta.conf")))
        .expect("build");
    assert_eq!(*log.lock().expect("log"), StageId::ALL);
    assert_eq!(world.reporter.started(), StageId::ALL);
}

#[rstest]
fn missing_metadata_skips_configuration_without_writes(world: World) {
    world.pipeline("gfortran").run(&world.project()).expect("build");
    let workspace = world.workspace("gw-gfortran");

    assert!(matches!(
        world.reporter.outcome(StageId::GenerateConfiguration),
        Some(StageOutcome::Skipped(_))
    ));
    assert!(world.tools.calls_of(ToolKind::Configurator).is_empty());
    assert!(!workspace.join("source/configuration").exists());
    assert!(!world.tools.calls_of(ToolKind::Compiler).is_empty());
}

#[rstest]
fn metadata_drives_the_configuration_generators(world: World) {
    let project = world.project().with_metadata(&world.base.join("rose-meta.conf"));
    world.pipeline("gfortran").run(&project).expect("build");
    let config_dir = world.workspace("gw-gfortran").join("source/configuration");

    assert_eq!(world.tools.calls_of(ToolKind::Configurator).len(), 4);
    assert!(config_dir.join("configuration_mod.f90").is_file());
    assert!(config_dir.join("feign_config_mod.f90").is_file());
}

#[rstest]
fn teardown_happens_once_whichever_stage_fails(world: World) {
    for failing in StageId::ALL {
        let reporter = RecordingReporter::new();
        let registry = StageRegistry::standard().instrument(|stage| {
            if stage.spec().id == failing {
                Box::new(FailingStage::new(stage))
            } else {
                stage
            }
        });
        let project = world.project().with_metadata(&world.base.join("rose-meta.conf"));
        let err = world
            .pipeline("gfortran")
            .with_reporter(Box::new(reporter.clone()))
            .with_registry(registry)
            .run(&project)
            .expect_err("injected failure");

        assert_eq!(err.stage(), Some(failing), "failure injected at {failing}");
        assert_eq!(reporter.teardowns(), 1, "failure injected at {failing}");
        let workspace = world.workspace("gw-gfortran");
        assert!(!workspace.join(".fabline.lock").exists());
        assert!(workspace.join("build-state.json").is_file());
    }
}

#[rstest]
fn tool_failure_names_the_stage_and_workspace(world: World) {
    let failing = World {
        tools: FakeTools::new().failing(ToolKind::Archiver),
        ..world
    };
    let err = failing.pipeline("gfortran").run(&failing.project()).expect_err("archive fails");

    let BuildError::Stage {
        stage,
        workspace,
        source,
    } = &err
    else {
        panic!("expected a stage failure, got {err:?}");
    };
    assert_eq!(*stage, StageId::ArchiveObjects);
    assert_eq!(workspace, &failing.workspace("gw-gfortran"));
    assert!(matches!(
        source,
        StageFailure::Tool(ToolError::Exit {
            tool: ToolKind::Archiver,
            status: Some(1),
            ..
        })
    ));
    assert!(failing.tools.calls_of(ToolKind::Linker).is_empty());
}

#[rstest]
fn toolchains_share_graph_and_object_names(world: World) {
    let project = world.project();
    let gnu = world.pipeline("gfortran").run(&project).expect("gfortran build");
    let intel = world.pipeline("ifx").run(&project).expect("ifx build");

    assert_ne!(gnu.workspace, intel.workspace);
    assert_eq!(intel.workspace, world.workspace("gw-ifx"));
    assert_eq!(gnu.graph_digest, intel.graph_digest);
    assert_eq!(relative_objects(&gnu), relative_objects(&intel));
}

#[rstest]
fn rebuilding_in_the_same_workspace_is_stable(world: World) {
    let project = world.project();
    let first = world.pipeline("gfortran").run(&project).expect("first build");
    let second = world.pipeline("gfortran").run(&project).expect("second build");
    assert_eq!(first, second);
}

#[rstest]
fn single_unit_application_links_without_archive(world: World) {
    let project = TestProject::new("unit");
    let workspace = world.workspace("unit-gfortran");
    write_source(
        &workspace.join("source/unit.f90"),
        "program unit\nimplicit none\nend program unit\n",
    );

    let artifact = world.pipeline("gfortran").run(&project).expect("build");

    assert_eq!(artifact.executable, workspace.join("build_output/unit"));
    assert_eq!(artifact.archive, None);
    assert_eq!(artifact.objects, [workspace.join("build_output/unit.o")]);
    assert!(world.tools.calls_of(ToolKind::Archiver).is_empty());
    assert!(world.tools.calls_of(ToolKind::SourceCopy).is_empty());
    assert!(world.tools.calls_of(ToolKind::Transformer).is_empty());
    let link = world.tools.calls_of(ToolKind::Linker);
    assert_eq!(link.len(), 1);
    assert!(link.iter().all(|call| call.inputs == [workspace.join("build_output/unit.o")]));
}

/// Runs the wrapped stage and then raises the cancel flag.
struct CancelAfter {
    inner: Box<dyn Stage>,
    flag: CancelFlag,
}

impl Stage for CancelAfter {
    fn spec(&self) -> StageSpec {
        self.inner.spec()
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let outcome = self.inner.run(ctx);
        self.flag.cancel();
        outcome
    }
}

#[rstest]
fn cancellation_stops_before_the_next_stage(world: World) {
    let flag = CancelFlag::new();
    let registry = StageRegistry::standard().instrument(|stage| {
        if stage.spec().id == StageId::PreprocessX90 {
            Box::new(CancelAfter {
                inner: stage,
                flag: flag.clone(),
            })
        } else {
            stage
        }
    });
    let err = world
        .pipeline("gfortran")
        .with_cancel_flag(flag)
        .with_registry(registry)
        .run(&world.project())
        .expect_err("cancelled");

    assert!(matches!(
        err,
        BuildError::Cancelled {
            stage: StageId::Psyclone,
            ..
        }
    ));
    assert!(world.tools.calls_of(ToolKind::Transformer).is_empty());
    assert_eq!(world.reporter.teardowns(), 1);
}

#[rstest]
fn concurrent_build_of_the_same_identity_conflicts(world: World) {
    let held = BuildState::open(
        WorkspaceLabel::new("gw", "gfortran").expect("label"),
        &world.base.join("ws"),
        Utf8Path::new("/lfric"),
    )
    .expect("hold workspace");

    let err = world.pipeline("gfortran").run(&world.project()).expect_err("conflict");
    assert!(matches!(err, BuildError::Workspace(_)));
    assert!(world.tools.calls().is_empty());
    assert_eq!(world.reporter.teardowns(), 0);

    held.close().expect("release");
    world.pipeline("gfortran").run(&world.project()).expect("build after release");
}
