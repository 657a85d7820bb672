//! Resolution of the executables each stage invokes.

use crate::config::FabSettings;
use crate::toolchain::Toolchain;
use camino::Utf8Path;

/// Default Fortran preprocessor.
pub const PREPROCESSOR_PROGRAM: &str = "cpp";
/// Default domain transformer.
pub const TRANSFORMER_PROGRAM: &str = "psyclone";
/// Default archiver.
pub const ARCHIVER_PROGRAM: &str = "ar";
/// Default linker; the MPI wrapper supplies MPI include and library paths.
pub const LINKER_PROGRAM: &str = "mpifort";
/// Default source-tree copier.
pub const SOURCE_COPY_PROGRAM: &str = "rsync";
/// Default metadata picker.
pub const PICKER_PROGRAM: &str = "rose_picker";

/// Location of the configuration generators below the installation root.
const GENERATOR_DIR: &str = "infrastructure/build/tools";

/// Programs used to generate configuration sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguratorPrograms {
    /// Extracts configuration metadata into JSON.
    pub picker: String,
    /// Writes the configuration loader module.
    pub loader: String,
    /// Writes one namelist module per configuration namelist.
    pub namelist: String,
    /// Writes the feign (test double) configuration module.
    pub feigns: String,
}

/// Executables for every tool role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSet {
    /// Source-tree copier.
    pub source_copy: String,
    /// Configuration generators.
    pub configurator: ConfiguratorPrograms,
    /// Fortran preprocessor.
    pub preprocessor: String,
    /// Domain transformer.
    pub transformer: String,
    /// Fortran compiler.
    pub compiler: String,
    /// Archiver.
    pub archiver: String,
    /// Linker.
    pub linker: String,
}

impl ToolSet {
    /// Programs for `toolchain` without any overrides.
    #[must_use]
    pub fn defaults(toolchain: &Toolchain, install_root: &Utf8Path) -> Self {
        Self::resolve(toolchain, install_root, &FabSettings::default())
    }

    /// Programs for `toolchain`, replaced by any overrides in `settings`.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use fabline::{config::FabSettings, tool::ToolSet, toolchain::Toolchain};
    /// let settings = FabSettings { ld: Some("mpif90".to_owned()), ..FabSettings::default() };
    /// let tools = ToolSet::resolve(&Toolchain::from_id("gfortran"), Utf8Path::new("/lfric"), &settings);
    /// assert_eq!(tools.linker, "mpif90");
    /// assert_eq!(tools.compiler, "gfortran");
    /// assert_eq!(tools.configurator.namelist, "/lfric/infrastructure/build/tools/GenerateNamelist");
    /// ```
    #[must_use]
    pub fn resolve(toolchain: &Toolchain, install_root: &Utf8Path, settings: &FabSettings) -> Self {
        let program = |value: Option<&String>, default: &str| {
            value.map_or_else(|| default.to_owned(), Clone::clone)
        };
        let generators = install_root.join(GENERATOR_DIR);
        Self {
            source_copy: program(settings.rsync.as_ref(), SOURCE_COPY_PROGRAM),
            configurator: ConfiguratorPrograms {
                picker: program(settings.rose_picker.as_ref(), PICKER_PROGRAM),
                loader: generators.join("GenerateLoader").into_string(),
                namelist: generators.join("GenerateNamelist").into_string(),
                feigns: generators.join("GenerateFeigns").into_string(),
            },
            preprocessor: program(settings.fpp.as_ref(), PREPROCESSOR_PROGRAM),
            transformer: program(settings.psyclone.as_ref(), TRANSFORMER_PROGRAM),
            compiler: program(settings.fc.as_ref(), toolchain.compiler()),
            archiver: program(settings.ar.as_ref(), ARCHIVER_PROGRAM),
            linker: program(settings.ld.as_ref(), LINKER_PROGRAM),
        }
    }
}
