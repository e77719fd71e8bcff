//! Per-task observation handle.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

use crate::converter::{ConversionOutcome, ErrorKind, ProgressEvent};

/// Lifecycle state of a conversion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted, converter not yet started.
    Pending,
    /// Converter is executing.
    Running,
    /// Finished with a success outcome.
    Completed,
    /// Finished with a failure outcome.
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Something observed on a task: progress, then exactly one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Progress(ProgressEvent),
    Finished(ConversionOutcome),
}

/// Handle returned by `submit`, used to follow one task to its outcome.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    target_path: PathBuf,
    state: watch::Receiver<TaskState>,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    finished: bool,
}

impl TaskHandle {
    pub(crate) fn new(
        id: String,
        target_path: PathBuf,
        state: watch::Receiver<TaskState>,
        events: mpsc::UnboundedReceiver<TaskEvent>,
    ) -> Self {
        Self {
            id,
            target_path,
            state,
            events,
            finished: false,
        }
    }

    /// Task id (UUID v4).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the output will be written on success.
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Next event, or `None` once the outcome has been delivered.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        if self.finished {
            return None;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            // The runner dropped without an outcome; only possible on runtime
            // shutdown.
            None => TaskEvent::Finished(ConversionOutcome::Failure {
                error_kind: ErrorKind::ConversionFailed,
                message: "conversion task was aborted".to_string(),
            }),
        };
        if matches!(event, TaskEvent::Finished(_)) {
            self.finished = true;
        }
        Some(event)
    }

    /// Drains progress and returns the outcome.
    pub async fn wait(self) -> ConversionOutcome {
        self.collect().await.1
    }

    /// Drains the task, returning every progress event and the outcome.
    pub async fn collect(mut self) -> (Vec<ProgressEvent>, ConversionOutcome) {
        let mut progress = Vec::new();
        while let Some(event) = self.next_event().await {
            match event {
                TaskEvent::Progress(p) => progress.push(p),
                TaskEvent::Finished(outcome) => return (progress, outcome),
            }
        }
        // next_event always ends with Finished before returning None.
        (
            progress,
            ConversionOutcome::Failure {
                error_kind: ErrorKind::ConversionFailed,
                message: "outcome already consumed".to_string(),
            },
        )
    }
}
