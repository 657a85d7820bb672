//! Unit tests for graph construction, pruning and ordering.

use super::*;
use rstest::rstest;

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|&name| name.to_owned()).collect()
}

fn unit(path: &str, modules: &[&str], programs: &[&str], uses: &[&str]) -> SourceUnit {
    SourceUnit {
        path: path.into(),
        modules: owned(modules),
        programs: owned(programs),
        uses: owned(uses),
    }
}

fn paths(names: &[&str]) -> Vec<Utf8PathBuf> {
    names.iter().map(|&name| Utf8PathBuf::from(name)).collect()
}

#[rstest]
fn local_cycle_is_fatal() {
    let units = vec![
        unit("main.f90", &[], &["main"], &["a_mod"]),
        unit("a.f90", &["a_mod"], &[], &["b_mod"]),
        unit("b.f90", &["b_mod"], &[], &["a_mod"]),
    ];
    let err = analyze(&units, &IgnoreSet::default(), "main").expect_err("cycle");
    let AnalysisError::DependencyCycle { cycle } = &err else {
        panic!("expected a dependency cycle, got {err:?}");
    };
    assert_eq!(cycle, &paths(&["a.f90", "b.f90", "a.f90"]));
}

#[rstest]
fn ignored_reference_adds_no_edge_and_no_error() {
    let units = vec![unit("main.f90", &[], &["main"], &["netcdf", "xios"])];
    let graph = analyze(&units, &IgnoreSet::new(["NetCDF", "xios"]), "main").expect("graph");
    assert_eq!(graph.len(), 1);
    assert!(graph.dependencies(Utf8Path::new("main.f90")).is_empty());
}

#[rstest]
fn unknown_reference_is_unresolved() {
    let units = vec![unit("main.f90", &[], &["main"], &["missing_mod"])];
    let err = analyze(&units, &IgnoreSet::default(), "main").expect_err("unresolved");
    assert!(matches!(
        err,
        AnalysisError::UnresolvedModule { ref module, ref unit } if module == "missing_mod" && unit == "main.f90"
    ));
}

#[rstest]
fn unreachable_units_are_pruned() {
    let units = vec![
        unit("r.f90", &[], &["r"], &["x_mod"]),
        unit("x.f90", &["x_mod"], &[], &[]),
        unit("y.f90", &["y_mod"], &[], &["never_defined_mod"]),
    ];
    let graph = analyze(&units, &IgnoreSet::default(), "r").expect("graph");
    let reachable: Vec<_> = graph.units().map(Utf8Path::to_owned).collect();
    assert_eq!(reachable, paths(&["r.f90", "x.f90"]));
    assert_eq!(graph.excluded(), paths(&["y.f90"]).as_slice());
    assert_eq!(graph.root(), "r.f90");
}

#[rstest]
fn intrinsic_modules_are_always_ignored() {
    let units = vec![unit("main.f90", &[], &["main"], &["iso_c_binding", "omp_lib"])];
    analyze(&units, &IgnoreSet::default(), "main").expect("graph");
}

#[rstest]
fn modules_used_within_the_same_unit_add_no_edge() {
    let units = vec![unit("main.f90", &["helper_mod"], &["main"], &["helper_mod"])];
    let graph = analyze(&units, &IgnoreSet::default(), "main").expect("graph");
    assert!(graph.dependencies(Utf8Path::new("main.f90")).is_empty());
}

#[rstest]
fn duplicate_module_definitions_are_rejected() {
    let units = vec![
        unit("main.f90", &[], &["main"], &[]),
        unit("a.f90", &["dup_mod"], &[], &[]),
        unit("b.f90", &["dup_mod"], &[], &[]),
    ];
    let err = analyze(&units, &IgnoreSet::default(), "main").expect_err("duplicate");
    assert!(matches!(err, AnalysisError::DuplicateModule { .. }));
}

#[rstest]
#[case("main")]
#[case("MAIN")]
fn root_symbol_matches_program_case_insensitively(#[case] symbol: &str) {
    let units = vec![unit("main.f90", &[], &["main"], &[])];
    let graph = analyze(&units, &IgnoreSet::default(), symbol).expect("graph");
    assert_eq!(graph.root(), "main.f90");
}

#[rstest]
fn missing_root_is_reported() {
    let units = vec![unit("lib.f90", &["lib_mod"], &[], &[])];
    let err = analyze(&units, &IgnoreSet::default(), "main").expect_err("missing");
    assert!(matches!(err, AnalysisError::MissingRoot { ref symbol } if symbol == "main"));
}

#[rstest]
fn compile_order_places_dependencies_first() {
    let units = vec![
        unit("main.f90", &[], &["main"], &["left_mod", "right_mod"]),
        unit("left.f90", &["left_mod"], &[], &["base_mod"]),
        unit("right.f90", &["right_mod"], &[], &["base_mod"]),
        unit("base.f90", &["base_mod"], &[], &[]),
    ];
    let graph = analyze(&units, &IgnoreSet::default(), "main").expect("graph");
    assert_eq!(
        graph.compile_order(),
        vec![
            paths(&["base.f90"]),
            paths(&["left.f90", "right.f90"]),
            paths(&["main.f90"]),
        ]
    );
}

#[rstest]
fn analysis_is_independent_of_unit_order() {
    let mut units = vec![
        unit("main.f90", &[], &["main"], &["b_mod", "a_mod"]),
        unit("a.f90", &["a_mod"], &[], &[]),
        unit("b.f90", &["b_mod"], &[], &["a_mod"]),
    ];
    let forward = analyze(&units, &IgnoreSet::default(), "main").expect("graph");
    units.reverse();
    let backward = analyze(&units, &IgnoreSet::default(), "main").expect("graph");
    assert_eq!(forward, backward);
}
