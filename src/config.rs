//! Pipeline configuration.
//!
//! `FAB_*` environment variables are layered over built-in defaults with
//! `ortho_config`. The merged [`FabSettings`] then yields the
//! [`PipelineConfig`] shared by every stage, the tool program overrides and
//! the machine-specific dependency prefix.

use crate::tool::RetrySettings;
use camino::{Utf8Path, Utf8PathBuf};
use fab_env::{FAB_ENV_PREFIX, FAB_JOBS};
use ortho_config::figment::{Figment, providers::Env};
use ortho_config::uncased::Uncased;
use ortho_config::{MergeComposer, OrthoConfig, OrthoError, OrthoMergeExt, sanitize_value};
use serde::{Deserialize, Serialize};
use std::{env, io, num::NonZeroUsize, sync::Arc, thread, time::Duration};
use thiserror::Error;

/// Directory created under the current directory when `FAB_WORKSPACE` is unset.
pub const DEFAULT_WORKSPACE_DIR: &str = "fab-workspace";
/// Default timeout for compilers, preprocessors and the like.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default timeout for one source acquisition attempt.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default number of retries for source acquisition.
pub const DEFAULT_ACQUIRE_RETRIES: u32 = 3;
/// Default delay before the first acquisition retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment layer could not be read or merged.
    #[error("failed to load FAB_* settings")]
    Load(#[from] Arc<OrthoError>),
    /// A setting held a value outside its accepted range.
    #[error("{var}={value:?} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: &'static str,
    },
    /// The current directory is not valid UTF-8.
    #[error("the current directory is not valid UTF-8")]
    NonUtf8CurrentDir,
    /// The current directory could not be determined.
    #[error("failed to determine the current directory")]
    CurrentDir(#[source] io::Error),
}

/// Raw settings, one field per `FAB_*` variable.
///
/// Every field is optional; unset fields fall back to the defaults of
/// [`PipelineConfig`], the toolchain and the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "FAB")]
pub struct FabSettings {
    /// Base directory for workspaces (`FAB_WORKSPACE`).
    #[ortho_config(skip_cli)]
    pub workspace: Option<Utf8PathBuf>,
    /// Worker threads per stage (`FAB_JOBS`).
    #[ortho_config(skip_cli)]
    pub jobs: Option<usize>,
    /// Tool timeout in seconds (`FAB_TOOL_TIMEOUT`).
    #[ortho_config(skip_cli)]
    pub tool_timeout: Option<u64>,
    /// Acquisition timeout in seconds (`FAB_ACQUIRE_TIMEOUT`).
    #[ortho_config(skip_cli)]
    pub acquire_timeout: Option<u64>,
    /// Extra acquisition attempts (`FAB_ACQUIRE_RETRIES`).
    #[ortho_config(skip_cli)]
    pub acquire_retries: Option<u32>,
    /// Maximum log level (`FAB_LOG`).
    #[ortho_config(skip_cli)]
    pub log: Option<String>,
    /// Prefix of the prebuilt dependency tree (`FAB_DEPS_PREFIX`).
    #[ortho_config(skip_cli)]
    pub deps_prefix: Option<Utf8PathBuf>,
    /// Preprocessor override (`FAB_FPP`).
    #[ortho_config(skip_cli)]
    pub fpp: Option<String>,
    /// Compiler override (`FAB_FC`).
    #[ortho_config(skip_cli)]
    pub fc: Option<String>,
    /// Archiver override (`FAB_AR`).
    #[ortho_config(skip_cli)]
    pub ar: Option<String>,
    /// Linker override (`FAB_LD`).
    #[ortho_config(skip_cli)]
    pub ld: Option<String>,
    /// Transformer override (`FAB_PSYCLONE`).
    #[ortho_config(skip_cli)]
    pub psyclone: Option<String>,
    /// Source copier override (`FAB_RSYNC`).
    #[ortho_config(skip_cli)]
    pub rsync: Option<String>,
    /// Metadata picker override (`FAB_ROSE_PICKER`).
    #[ortho_config(skip_cli)]
    pub rose_picker: Option<String>,
}

impl FabSettings {
    /// Merge the `FAB_*` variables of the process environment over the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a variable cannot be read or does not
    /// fit its setting's type.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = Env::prefixed(FAB_ENV_PREFIX)
            .map(|key| Uncased::new(key.as_str().to_ascii_uppercase()))
            .split("__");
        let environment = Figment::from(provider)
            .extract::<serde_json::Value>()
            .into_ortho_merge()?;
        Self::from_environment_layer(environment)
    }

    /// Merge an already extracted environment layer over the defaults.
    ///
    /// Blank text values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a value does not fit its setting.
    ///
    /// # Examples
    ///
    /// ```
    /// use fabline::config::FabSettings;
    /// let settings = FabSettings::from_environment_layer(
    ///     serde_json::json!({ "jobs": 4, "ld": "mpif90" }),
    /// )
    /// .expect("settings");
    /// assert_eq!(settings.jobs, Some(4));
    /// assert_eq!(settings.ld.as_deref(), Some("mpif90"));
    /// ```
    pub fn from_environment_layer(environment: serde_json::Value) -> Result<Self, ConfigError> {
        let mut composer = MergeComposer::new();
        composer.push_defaults(sanitize_value(&Self::default())?);
        composer.push_environment(environment);
        let merged = Self::merge_from_layers(composer.layers())?;
        Ok(merged.without_blanks())
    }

    fn without_blanks(self) -> Self {
        Self {
            workspace: self.workspace.filter(|path| !is_blank(path.as_str())),
            log: non_blank(self.log),
            deps_prefix: self.deps_prefix.filter(|path| !is_blank(path.as_str())),
            fpp: non_blank(self.fpp),
            fc: non_blank(self.fc),
            ar: non_blank(self.ar),
            ld: non_blank(self.ld),
            psyclone: non_blank(self.psyclone),
            rsync: non_blank(self.rsync),
            rose_picker: non_blank(self.rose_picker),
            ..self
        }
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !is_blank(text))
}

/// Settings shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upper bound on worker threads inside one stage.
    pub jobs: NonZeroUsize,
    /// Timeout for each non-acquisition tool invocation.
    pub tool_timeout: Duration,
    /// Timeout for each acquisition attempt.
    pub acquire_timeout: Duration,
    /// Extra attempts for failed acquisitions.
    pub acquire_retries: u32,
    /// Delay before the first acquisition retry.
    pub retry_backoff: Duration,
    /// Directory holding per-application workspaces.
    pub workspace_base: Utf8PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jobs: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            acquire_retries: DEFAULT_ACQUIRE_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            workspace_base: Utf8PathBuf::from(DEFAULT_WORKSPACE_DIR),
        }
    }
}

impl PipelineConfig {
    /// Derive the configuration from `settings`, resolving a relative
    /// workspace base against the current directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a setting is out of range or the current
    /// directory is unusable.
    pub fn resolve(settings: &FabSettings) -> Result<Self, ConfigError> {
        let cwd = env::current_dir().map_err(ConfigError::CurrentDir)?;
        let utf8_cwd =
            Utf8PathBuf::from_path_buf(cwd).map_err(|_| ConfigError::NonUtf8CurrentDir)?;
        Self::from_settings(settings, &utf8_cwd)
    }

    /// Derive the configuration from `settings`, resolving a relative
    /// workspace base against `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when `jobs` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use fabline::config::{FabSettings, PipelineConfig};
    /// let settings = FabSettings { jobs: Some(4), ..FabSettings::default() };
    /// let config = PipelineConfig::from_settings(&settings, Utf8Path::new("/home/me"))
    ///     .expect("config");
    /// assert_eq!(config.jobs.get(), 4);
    /// assert_eq!(config.workspace_base, "/home/me/fab-workspace");
    /// ```
    pub fn from_settings(settings: &FabSettings, cwd: &Utf8Path) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let jobs = match settings.jobs {
            None => defaults.jobs,
            Some(requested) => {
                NonZeroUsize::new(requested).ok_or_else(|| ConfigError::InvalidValue {
                    var: FAB_JOBS,
                    value: requested.to_string(),
                    reason: "expected a positive integer",
                })?
            }
        };
        let base = settings
            .workspace
            .clone()
            .unwrap_or(defaults.workspace_base);
        Ok(Self {
            jobs,
            tool_timeout: settings
                .tool_timeout
                .map_or(defaults.tool_timeout, Duration::from_secs),
            acquire_timeout: settings
                .acquire_timeout
                .map_or(defaults.acquire_timeout, Duration::from_secs),
            acquire_retries: settings.acquire_retries.unwrap_or(defaults.acquire_retries),
            retry_backoff: defaults.retry_backoff,
            workspace_base: if base.is_absolute() {
                base
            } else {
                cwd.join(base)
            },
        })
    }

    /// Retry settings for source acquisition.
    #[must_use]
    pub const fn acquire_retry(&self) -> RetrySettings {
        RetrySettings {
            retries: self.acquire_retries,
            backoff: self.retry_backoff,
        }
    }
}
