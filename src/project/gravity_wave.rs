//! The gravity-wave mini-application.

use super::{ProjectSpecialization, SourceGrab};
use crate::config::FabSettings;
use camino::{Utf8Path, Utf8PathBuf};

const NAME: &str = "gravity_wave";

const SOURCE_TREES: &[&str] = &[
    "infrastructure/source/",
    "components/driver/source/",
    "components/inventory/source/",
    "components/science/source/",
    "components/lfric-xios/source/",
    "miniapps/gravity_wave/source/",
    "gungho/source/",
];

const METADATA: &str = "miniapps/gravity_wave/rose-meta/lfric-gravity_wave/HEAD/rose-meta.conf";

const PREPROCESSOR_FLAGS: &[&str] = &[
    "-DRDEF_PRECISION=64",
    "-DR_SOLVER_PRECISION=64",
    "-DR_TRAN_PRECISION=64",
    "-DUSE_XIOS",
];

const COMPILER_FLAGS: &[&str] = &[
    "-ffree-line-length-none",
    "-fopenmp",
    "-g",
    "-std=f2008",
    "-Wall",
    "-Werror=conversion",
    "-Werror=unused-variable",
    "-Werror=character-truncation",
    "-Werror=unused-value",
    "-Werror=tabs",
];

const LINK_LIBRARIES: &[&str] = &[
    "-lyaxt",
    "-lyaxt_c",
    "-lxios",
    "-lnetcdff",
    "-lnetcdf",
    "-lhdf5",
    "-lstdc++",
];

/// Build definition for `miniapps/gravity_wave`.
///
/// Include and library directories of the prebuilt dependencies (MPI, XIOS,
/// YAXT, netCDF) come from `FAB_DEPS_PREFIX`: `<prefix>/lib` holds libraries
/// and `mpi.mod`, `<prefix>/include` holds `mod_wait.mod`. Without a prefix
/// the compiler and linker search their default paths.
///
/// # Examples
///
/// ```
/// use fabline::project::{GravityWave, ProjectSpecialization};
/// let app = GravityWave::new(Some("/opt/lfric-deps".into()));
/// assert_eq!(app.name(), "gravity_wave");
/// assert!(app.link_flags().contains(&"/opt/lfric-deps/lib".to_owned()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GravityWave {
    deps_prefix: Option<Utf8PathBuf>,
}

impl GravityWave {
    /// Configure the application with an optional dependency prefix.
    #[must_use]
    pub const fn new(deps_prefix: Option<Utf8PathBuf>) -> Self {
        Self { deps_prefix }
    }

    /// Take the dependency prefix from the merged `FAB_*` settings.
    #[must_use]
    pub fn from_settings(settings: &FabSettings) -> Self {
        Self::new(settings.deps_prefix.clone())
    }
}

fn owned(flags: &[&str]) -> Vec<String> {
    flags.iter().map(|flag| (*flag).to_owned()).collect()
}

impl ProjectSpecialization for GravityWave {
    fn name(&self) -> &str {
        NAME
    }

    fn acquire_sources(&self, install_root: &Utf8Path) -> Vec<SourceGrab> {
        SOURCE_TREES
            .iter()
            .map(|dir| SourceGrab::new(install_root.join(dir)))
            .collect()
    }

    fn metadata_path(&self, install_root: &Utf8Path) -> Option<Utf8PathBuf> {
        Some(install_root.join(METADATA))
    }

    fn preprocessor_flags(&self) -> Vec<String> {
        owned(PREPROCESSOR_FLAGS)
    }

    fn compiler_flags(&self) -> Vec<String> {
        let mut flags = owned(COMPILER_FLAGS);
        if let Some(prefix) = &self.deps_prefix {
            for dir in ["lib", "include"] {
                flags.push("-I".to_owned());
                flags.push(prefix.join(dir).into_string());
            }
        }
        flags
    }

    fn link_flags(&self) -> Vec<String> {
        let mut flags = vec!["-fopenmp".to_owned()];
        if let Some(prefix) = &self.deps_prefix {
            flags.push("-L".to_owned());
            flags.push(prefix.join("lib").into_string());
        }
        flags.extend(owned(LINK_LIBRARIES));
        flags
    }
}
