//! Compiler toolchain selection.
//!
//! The toolchain id is part of the workspace identity, so builds of the same
//! application with different compilers never share a workspace.

use tracing::warn;

/// Toolchain used when the command line does not select one.
pub const DEFAULT_TOOLCHAIN: &str = "gfortran";

/// Fortran compiler and its compiler-specific flags.
///
/// # Examples
///
/// ```
/// use fabline::toolchain::Toolchain;
/// let intel = Toolchain::from_id("ifort");
/// assert_eq!(intel.compiler(), "ifort");
/// assert_eq!(intel.module_dir_flag(), "-module");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    id: String,
    compiler: String,
    module_dir_flag: &'static str,
}

impl Toolchain {
    /// Describe the toolchain called `id`.
    ///
    /// Unknown ids are treated as the name of a gfortran-compatible compiler.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        let module_dir_flag = match id {
            "gfortran" => "-J",
            "ifort" | "ifx" | "nvfortran" | "crayftn" => "-module",
            other => {
                warn!(toolchain = other, "unknown toolchain; assuming gfortran-style flags");
                "-J"
            }
        };
        Self {
            id: id.to_owned(),
            compiler: id.to_owned(),
            module_dir_flag,
        }
    }

    /// Identifier used in workspace labels.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Default compiler executable.
    #[must_use]
    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    /// Flag that directs `.mod` files into a directory.
    #[must_use]
    pub const fn module_dir_flag(&self) -> &'static str {
        self.module_dir_flag
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::from_id(DEFAULT_TOOLCHAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("gfortran", "-J")]
    #[case("ifx", "-module")]
    #[case("nvfortran", "-module")]
    #[case("my-wrapper", "-J")]
    fn module_flag_follows_compiler_family(#[case] id: &str, #[case] flag: &str) {
        let toolchain = Toolchain::from_id(id);
        assert_eq!(toolchain.id(), id);
        assert_eq!(toolchain.module_dir_flag(), flag);
    }
}
