//! Process-wide diagnostic logging.
//!
//! The subscriber is installed once, before the first pipeline run, and is
//! never reconfigured afterwards. Output goes to standard error so tool output
//! forwarded at debug level never mixes with anything a caller pipes from
//! standard output.

use fab_env::FAB_LOG;
use std::{
    error::Error as StdError,
    io,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt;

/// Level of the subscriber installed by [`configure`], once it succeeded.
static CONFIGURED: Mutex<Option<Level>> = Mutex::new(None);
static RUN_STARTED: AtomicBool = AtomicBool::new(false);

/// Level used when `FAB_LOG` is unset.
pub const DEFAULT_LEVEL: Level = Level::INFO;

/// Errors raised while configuring logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Logging was configured earlier in this process.
    #[error("logging is already configured at level {0}")]
    AlreadyConfigured(Level),
    /// A pipeline run has already started.
    #[error("logging must be configured before the first pipeline run")]
    PipelineRunning,
    /// The log level could not be parsed.
    #[error("{FAB_LOG}={value:?} is not a log level (expected trace, debug, info, warn or error)")]
    InvalidLevel {
        /// Offending value.
        value: String,
    },
    /// Another global subscriber was installed outside this module.
    #[error("failed to install the tracing subscriber")]
    Install(#[source] Box<dyn StdError + Send + Sync>),
}

/// Install the global subscriber at `level`.
///
/// # Errors
///
/// Returns [`LoggingError::PipelineRunning`] once any pipeline has started and
/// [`LoggingError::AlreadyConfigured`] on every call after the first
/// successful one. A failed installation leaves logging unconfigured.
pub fn configure(level: Level) -> Result<(), LoggingError> {
    if RUN_STARTED.load(Ordering::Acquire) {
        return Err(LoggingError::PipelineRunning);
    }
    let mut configured = CONFIGURED.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = *configured {
        return Err(LoggingError::AlreadyConfigured(existing));
    }
    fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .try_init()
        .map_err(LoggingError::Install)?;
    *configured = Some(level);
    Ok(())
}

/// Parse a `FAB_LOG` level name, treating `None` or blank text as
/// [`DEFAULT_LEVEL`].
///
/// # Errors
///
/// Returns [`LoggingError::InvalidLevel`] for unknown names.
pub fn parse_level(value: Option<&str>) -> Result<Level, LoggingError> {
    match value.map(str::trim).filter(|text| !text.is_empty()) {
        None => Ok(DEFAULT_LEVEL),
        Some(text) => text.parse().map_err(|_| LoggingError::InvalidLevel {
            value: text.to_owned(),
        }),
    }
}

/// Report whether [`configure`] has succeeded in this process.
#[must_use]
pub fn is_configured() -> bool {
    CONFIGURED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

pub(crate) fn mark_run_started() {
    RUN_STARTED.store(true, Ordering::Release);
}
