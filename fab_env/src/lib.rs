#![forbid(unsafe_code)]

//! Environment variable names shared across fabline crates (library, tests,
//! and helpers).
//!
//! The installation root is deliberately absent: it is always derived from
//! the location of the running executable.

/// Prefix shared by every variable below; settings are read by stripping it
/// and matching the remainder against setting names.
pub const FAB_ENV_PREFIX: &str = "FAB_";

/// Base directory under which per-application workspaces are created.
///
/// # Examples
///
/// ```
/// use fab_env::FAB_WORKSPACE;
/// assert_eq!(FAB_WORKSPACE, "FAB_WORKSPACE");
/// ```
pub const FAB_WORKSPACE: &str = "FAB_WORKSPACE";

/// Upper bound on worker threads used inside a single stage.
pub const FAB_JOBS: &str = "FAB_JOBS";

/// Timeout, in seconds, applied to every tool invocation except acquisition.
pub const FAB_TOOL_TIMEOUT: &str = "FAB_TOOL_TIMEOUT";

/// Timeout, in seconds, applied to each source acquisition attempt.
pub const FAB_ACQUIRE_TIMEOUT: &str = "FAB_ACQUIRE_TIMEOUT";

/// Number of extra attempts made when source acquisition fails.
pub const FAB_ACQUIRE_RETRIES: &str = "FAB_ACQUIRE_RETRIES";

/// Maximum log level (`error`, `warn`, `info`, `debug`, `trace`).
pub const FAB_LOG: &str = "FAB_LOG";

/// Prefix of the machine-specific dependency tree (MPI, XIOS, YAXT, `NetCDF`).
pub const FAB_DEPS_PREFIX: &str = "FAB_DEPS_PREFIX";

/// Override for the Fortran preprocessor executable.
pub const FAB_FPP: &str = "FAB_FPP";

/// Override for the Fortran compiler executable.
pub const FAB_FC: &str = "FAB_FC";

/// Override for the archiver executable.
pub const FAB_AR: &str = "FAB_AR";

/// Override for the linker executable.
pub const FAB_LD: &str = "FAB_LD";

/// Override for the `PSyclone` executable.
pub const FAB_PSYCLONE: &str = "FAB_PSYCLONE";

/// Override for the `rsync` executable used to acquire source trees.
pub const FAB_RSYNC: &str = "FAB_RSYNC";

/// Override for the `rose_picker` executable.
pub const FAB_ROSE_PICKER: &str = "FAB_ROSE_PICKER";
