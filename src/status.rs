//! Pipeline progress reporting.
//!
//! The driver announces each stage, its outcome, the workspace teardown and
//! the final artefact through a [`StatusReporter`]. [`IndicatifReporter`]
//! keeps one persistent line per stage on a terminal; [`LogReporter`] emits
//! plain `tracing` events for non-interactive runs; [`SilentReporter`] emits
//! nothing.

use crate::stage::{STAGE_COUNT, StageId, StageOutcome};
use camino::Utf8Path;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use tracing::info;

fn stage_label(stage: StageId) -> String {
    format!(
        "Stage {}/{STAGE_COUNT}: {}",
        stage.ordinal(),
        stage.description()
    )
}

/// Report pipeline progress to the user.
pub trait StatusReporter: Send + Sync {
    /// A stage is about to start.
    fn report_stage(&self, stage: StageId);

    /// A stage finished without error.
    fn report_outcome(&self, stage: StageId, outcome: &StageOutcome);

    /// The workspace was torn down; `clean` is `false` if teardown failed.
    fn report_teardown(&self, workspace: &Utf8Path, clean: bool);

    /// The pipeline produced `executable`.
    fn report_complete(&self, executable: &Utf8Path);
}

/// Reporter that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report_stage(&self, stage: StageId) {
        info!("{}", stage_label(stage));
    }

    fn report_outcome(&self, stage: StageId, outcome: &StageOutcome) {
        if let StageOutcome::Skipped(reason) = outcome {
            info!(stage = %stage, "skipped: {reason}");
        }
    }

    fn report_teardown(&self, workspace: &Utf8Path, clean: bool) {
        info!(workspace = %workspace, clean, "workspace closed");
    }

    fn report_complete(&self, executable: &Utf8Path) {
        info!(executable = %executable, "build complete");
    }
}

/// Silent reporter: emits nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl StatusReporter for SilentReporter {
    fn report_stage(&self, _stage: StageId) {}
    fn report_outcome(&self, _stage: StageId, _outcome: &StageOutcome) {}
    fn report_teardown(&self, _workspace: &Utf8Path, _clean: bool) {}
    fn report_complete(&self, _executable: &Utf8Path) {}
}

#[derive(Debug)]
struct IndicatifState {
    progress: MultiProgress,
    bars: Vec<ProgressBar>,
    running: Option<StageId>,
    completed: bool,
}

/// Terminal reporter backed by `indicatif::MultiProgress`.
pub struct IndicatifReporter {
    state: Mutex<IndicatifState>,
}

impl IndicatifReporter {
    /// Construct a reporter with one persistent line per stage.
    #[must_use]
    pub fn new() -> Self {
        let progress = MultiProgress::with_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        progress.set_move_cursor(false);
        let style = ProgressStyle::with_template("{msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bars = StageId::ALL
            .iter()
            .map(|stage| {
                let bar = progress.add(ProgressBar::new(1));
                bar.set_style(style.clone());
                bar.set_message(format!("[pending] {}", stage_label(*stage)));
                bar
            })
            .collect();
        Self {
            state: Mutex::new(IndicatifState {
                progress,
                bars,
                running: None,
                completed: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndicatifState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_line(state: &IndicatifState, stage: StageId, status: &str, finish: bool) {
        let message = format!("[{status}] {}", stage_label(stage));
        let index = usize::try_from(stage.ordinal().saturating_sub(1)).unwrap_or(usize::MAX);
        if state.progress.is_hidden() {
            drop(writeln!(io::stderr(), "{message}"));
            return;
        }
        if let Some(bar) = state.bars.get(index) {
            if finish {
                bar.finish_with_message(message);
            } else {
                bar.set_message(message);
            }
        }
    }
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IndicatifReporter {
    fn drop(&mut self) {
        let mut state = self.lock();
        if state.completed {
            return;
        }
        if let Some(stage) = state.running.take() {
            Self::set_line(&state, stage, "failed", true);
        }
    }
}

impl StatusReporter for IndicatifReporter {
    fn report_stage(&self, stage: StageId) {
        let mut state = self.lock();
        state.running = Some(stage);
        Self::set_line(&state, stage, "running", false);
    }

    fn report_outcome(&self, stage: StageId, outcome: &StageOutcome) {
        let mut state = self.lock();
        state.running = None;
        let status = match outcome {
            StageOutcome::Ran => "done",
            StageOutcome::Skipped(_) => "skipped",
        };
        Self::set_line(&state, stage, status, true);
    }

    fn report_teardown(&self, workspace: &Utf8Path, clean: bool) {
        let mut state = self.lock();
        if let Some(stage) = state.running.take() {
            Self::set_line(&state, stage, "failed", true);
        }
        if !clean {
            drop(writeln!(io::stderr(), "Workspace {workspace} did not close cleanly"));
        }
    }

    fn report_complete(&self, executable: &Utf8Path) {
        let mut state = self.lock();
        state.completed = true;
        drop(writeln!(io::stderr(), "Build complete: {executable}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StageId::AcquireSources, "Stage 1/11: Acquiring sources")]
    #[case(StageId::LinkExecutable, "Stage 11/11: Linking executable")]
    fn labels_carry_position(#[case] stage: StageId, #[case] expected: &str) {
        assert_eq!(stage_label(stage), expected);
    }

    #[test]
    fn stage_count_matches_stage_array() {
        assert_eq!(usize::try_from(STAGE_COUNT).ok(), Some(StageId::ALL.len()));
    }
}
