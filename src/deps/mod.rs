//! Module dependency analysis for Fortran units.
//!
//! [`analyze`] turns scanned [`SourceUnit`]s into a [`DependencyGraph`]
//! rooted at the program entry unit. Only units reachable from the root are
//! kept; the rest are recorded as excluded. Modules named in the
//! [`IgnoreSet`] are assumed to be supplied prebuilt and never resolve to
//! local units.
//!
//! # Examples
//!
//! ```
//! use fabline::deps::{analyze, scan_source, IgnoreSet};
//!
//! let units = vec![
//!     scan_source("main.f90".into(), "program main\nuse mpi\nuse solver_mod\nend program\n"),
//!     scan_source("solver_mod.f90".into(), "module solver_mod\nend module\n"),
//!     scan_source("unused_mod.f90".into(), "module unused_mod\nend module\n"),
//! ];
//! let graph = analyze(&units, &IgnoreSet::new(["MPI"]), "main").expect("graph");
//! assert_eq!(graph.len(), 2);
//! assert_eq!(graph.excluded(), ["unused_mod.f90"]);
//! ```

mod cycle;
mod error;
mod scan;

pub use error::AnalysisError;
pub use scan::{scan_file, scan_source};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Modules every Fortran compiler supplies, whether or not the `use`
/// statement says `intrinsic`.
pub const INTRINSIC_MODULES: &[&str] = &[
    "iso_c_binding",
    "iso_fortran_env",
    "ieee_arithmetic",
    "ieee_exceptions",
    "ieee_features",
    "omp_lib",
    "omp_lib_kinds",
];

/// Module definitions and references found in one compilable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceUnit {
    /// Path of the unit, relative to the build output directory.
    pub path: Utf8PathBuf,
    /// Modules defined by the unit.
    pub modules: Vec<String>,
    /// Programs defined by the unit.
    pub programs: Vec<String>,
    /// Modules the unit uses.
    pub uses: Vec<String>,
}

impl SourceUnit {
    /// Create an empty unit for `path`.
    #[must_use]
    pub const fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            modules: Vec::new(),
            programs: Vec::new(),
            uses: Vec::new(),
        }
    }
}

/// Module names that are never resolved to local units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet(BTreeSet<String>);

impl IgnoreSet {
    /// Build an ignore set; names are compared case-insensitively.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
        )
    }

    /// Report whether `module` is ignored, either explicitly or because it is
    /// an intrinsic module.
    #[must_use]
    pub fn contains(&self, module: &str) -> bool {
        let lowered = module.to_ascii_lowercase();
        self.0.contains(&lowered) || INTRINSIC_MODULES.contains(&lowered.as_str())
    }
}

/// Acyclic graph of local units reachable from the root unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    root: Utf8PathBuf,
    edges: IndexMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    excluded: Vec<Utf8PathBuf>,
}

impl DependencyGraph {
    /// Unit that provides the root symbol.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Reachable units in path order.
    pub fn units(&self) -> impl Iterator<Item = &Utf8Path> {
        self.edges.keys().map(Utf8PathBuf::as_path)
    }

    /// Number of reachable units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Report whether the graph holds no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Report whether `unit` is reachable from the root.
    #[must_use]
    pub fn contains(&self, unit: &Utf8Path) -> bool {
        self.edges.contains_key(unit)
    }

    /// Local units that `unit` depends on.
    #[must_use]
    pub fn dependencies(&self, unit: &Utf8Path) -> &[Utf8PathBuf] {
        self.edges.get(unit).map_or(&[], Vec::as_slice)
    }

    /// Units that were scanned but are unreachable from the root.
    #[must_use]
    pub fn excluded(&self) -> &[Utf8PathBuf] {
        &self.excluded
    }

    /// Group units into layers so every unit follows its dependencies.
    ///
    /// Units within a layer are independent and may compile concurrently.
    #[must_use]
    pub fn compile_order(&self) -> Vec<Vec<Utf8PathBuf>> {
        let mut placed: HashSet<&Utf8Path> = HashSet::with_capacity(self.edges.len());
        let mut layers = Vec::new();
        while placed.len() < self.edges.len() {
            let layer: Vec<Utf8PathBuf> = self
                .edges
                .iter()
                .filter(|(unit, _)| !placed.contains(unit.as_path()))
                .filter(|(_, deps)| deps.iter().all(|dep| placed.contains(dep.as_path())))
                .map(|(unit, _)| unit.clone())
                .collect();
            if layer.is_empty() {
                break;
            }
            for unit in &layer {
                if let Some((key, _)) = self.edges.get_key_value(unit) {
                    placed.insert(key.as_path());
                }
            }
            layers.push(layer);
        }
        layers
    }
}

/// Build the dependency graph of the units reachable from `root_symbol`.
///
/// `root_symbol` names a program (or, failing that, a module). Units that
/// the root does not reach are excluded without being resolved, so their
/// references cannot fail the analysis.
///
/// # Errors
///
/// Returns [`AnalysisError::MissingRoot`] if no unit provides the root,
/// [`AnalysisError::DuplicateModule`] if two units define the same module,
/// [`AnalysisError::UnresolvedModule`] for a reference that is neither local
/// nor ignored and [`AnalysisError::DependencyCycle`] if reachable units form
/// a cycle.
pub fn analyze(
    units: &[SourceUnit],
    ignore: &IgnoreSet,
    root_symbol: &str,
) -> Result<DependencyGraph, AnalysisError> {
    let providers = module_providers(units)?;
    let root = find_root(units, &providers, root_symbol)?;

    let mut visited = vec![false; units.len()];
    let mut adjacency: Vec<(Utf8PathBuf, Vec<Utf8PathBuf>)> = Vec::new();
    let mut queue = VecDeque::from([root]);
    if let Some(slot) = visited.get_mut(root) {
        *slot = true;
    }
    while let Some(index) = queue.pop_front() {
        let Some(unit) = units.get(index) else {
            continue;
        };
        let mut deps = BTreeSet::new();
        for module in &unit.uses {
            if ignore.contains(module) {
                debug!(module = %module, unit = %unit.path, "ignoring external module");
                continue;
            }
            let Some(&provider) = providers.get(module.as_str()) else {
                return Err(AnalysisError::UnresolvedModule {
                    module: module.clone(),
                    unit: unit.path.clone(),
                });
            };
            if provider == index {
                continue;
            }
            if let Some(dep) = units.get(provider) {
                deps.insert(dep.path.clone());
            }
            if let Some(seen) = visited.get_mut(provider)
                && !*seen
            {
                *seen = true;
                queue.push_back(provider);
            }
        }
        adjacency.push((unit.path.clone(), deps.into_iter().collect()));
    }
    adjacency.sort_by(|(a, _), (b, _)| a.cmp(b));
    let edges: IndexMap<_, _> = adjacency.into_iter().collect();

    if let Some(cycle) = cycle::find_cycle(&edges) {
        return Err(AnalysisError::DependencyCycle { cycle });
    }

    let mut excluded: Vec<Utf8PathBuf> = units
        .iter()
        .zip(&visited)
        .filter(|(_, seen)| !**seen)
        .map(|(unit, _)| unit.path.clone())
        .collect();
    excluded.sort();
    if !excluded.is_empty() {
        debug!(count = excluded.len(), "units unreachable from root excluded");
    }

    let root_path = units
        .get(root)
        .map(|unit| unit.path.clone())
        .unwrap_or_default();
    Ok(DependencyGraph {
        root: root_path,
        edges,
        excluded,
    })
}

fn module_providers(units: &[SourceUnit]) -> Result<HashMap<&str, usize>, AnalysisError> {
    let mut providers: HashMap<&str, usize> = HashMap::new();
    for (index, unit) in units.iter().enumerate() {
        for module in &unit.modules {
            if let Some(&earlier) = providers.get(module.as_str()) {
                if earlier == index {
                    continue;
                }
                let first = units
                    .get(earlier)
                    .map(|other| other.path.clone())
                    .unwrap_or_default();
                return Err(AnalysisError::DuplicateModule {
                    module: module.clone(),
                    first,
                    second: unit.path.clone(),
                });
            }
            providers.insert(module.as_str(), index);
        }
    }
    Ok(providers)
}

fn find_root(
    units: &[SourceUnit],
    providers: &HashMap<&str, usize>,
    root_symbol: &str,
) -> Result<usize, AnalysisError> {
    let symbol = root_symbol.to_ascii_lowercase();
    units
        .iter()
        .position(|unit| unit.programs.iter().any(|program| *program == symbol))
        .or_else(|| providers.get(symbol.as_str()).copied())
        .ok_or(AnalysisError::MissingRoot { symbol })
}

#[cfg(test)]
mod tests;
