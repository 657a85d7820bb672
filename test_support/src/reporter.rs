//! Status reporter that records what the driver announced.

use camino::{Utf8Path, Utf8PathBuf};
use fabline::stage::{StageId, StageOutcome};
use fabline::status::StatusReporter;
use std::sync::{Arc, Mutex};

/// One announcement made by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A stage started.
    Stage(StageId),
    /// A stage finished with `outcome`.
    Outcome(StageId, StageOutcome),
    /// The workspace was closed.
    Teardown {
        /// Workspace root.
        workspace: Utf8PathBuf,
        /// Whether the close succeeded.
        clean: bool,
    },
    /// The build finished.
    Complete(Utf8PathBuf),
}

/// Cloneable reporter; clones share one event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }

    /// Number of teardown announcements.
    pub fn teardowns(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Teardown { .. }))
            .count()
    }

    /// Stages that started, in order.
    pub fn started(&self) -> Vec<StageId> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                Event::Stage(stage) => Some(*stage),
                _ => None,
            })
            .collect()
    }

    /// Outcome reported for `stage`, if it finished.
    pub fn outcome(&self, stage: StageId) -> Option<StageOutcome> {
        self.events().into_iter().find_map(|event| match event {
            Event::Outcome(id, outcome) if id == stage => Some(outcome),
            _ => None,
        })
    }

    fn push(&self, event: Event) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl StatusReporter for RecordingReporter {
    fn report_stage(&self, stage: StageId) {
        self.push(Event::Stage(stage));
    }

    fn report_outcome(&self, stage: StageId, outcome: &StageOutcome) {
        self.push(Event::Outcome(stage, outcome.clone()));
    }

    fn report_teardown(&self, workspace: &Utf8Path, clean: bool) {
        self.push(Event::Teardown {
            workspace: workspace.to_owned(),
            clean,
        });
    }

    fn report_complete(&self, executable: &Utf8Path) {
        self.push(Event::Complete(executable.to_owned()));
    }
}
