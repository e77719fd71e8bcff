//! Conversion engine.
//!
//! Dispatches a [`ConversionRequest`] to the converter registered for its
//! media kind and runs it in the background. The caller follows the task
//! through the returned [`TaskHandle`]: zero or more progress events, then
//! exactly one [`ConversionOutcome`].
//!
//! One task runs at a time per engine; a second `submit` while a task is
//! active is rejected with `EngineBusy`.

mod task;

pub use task::{TaskEvent, TaskHandle, TaskState};

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::MediaKind;
use crate::config::Config;
use crate::converter::{
    AudioConverter, ConversionJob, ConversionOutcome, ConversionRequest, Converter,
    ConverterError, ErrorKind, ImageConverter, ProgressSink, VideoConverter,
};

/// Runs one conversion at a time, dispatching on media kind.
pub struct ConversionEngine {
    converters: HashMap<MediaKind, Arc<dyn Converter>>,
    active: Arc<Mutex<Option<String>>>,
}

impl ConversionEngine {
    /// Creates an engine wired with the image, audio and video converters.
    pub fn new(config: &Config) -> Self {
        Self::builder()
            .with_converter(ImageConverter::new(config.image.clone(), &config.converter))
            .with_converter(AudioConverter::new(&config.converter))
            .with_converter(VideoConverter::new(&config.converter))
            .build()
    }

    /// Starts an empty builder; converters are registered by kind.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Replaces the converter registered for `converter.kind()`.
    pub fn with_converter<C: Converter + 'static>(mut self, converter: C) -> Self {
        self.converters.insert(converter.kind(), Arc::new(converter));
        self
    }

    /// Whether a task is currently running.
    pub fn is_busy(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Checks every registered converter's external dependencies.
    ///
    /// Returns the failures; an empty list means everything is usable.
    pub async fn validate(&self) -> Vec<(MediaKind, ConverterError)> {
        let mut failures = Vec::new();
        for kind in MediaKind::ALL {
            if let Some(converter) = self.converters.get(&kind) {
                if let Err(e) = converter.validate().await {
                    warn!("{} converter is not usable: {}", converter.name(), e);
                    failures.push((kind, e));
                }
            }
        }
        failures
    }

    /// Validates `request` and starts converting it in the background.
    ///
    /// Fails synchronously, without touching the filesystem, when the
    /// target is not producible for the media kind or a task is running.
    pub fn submit(&self, request: ConversionRequest) -> Result<TaskHandle, ConverterError> {
        if !request.media_kind.supports(&request.target_extension) {
            return Err(ConverterError::UnsupportedFormat {
                kind: request.media_kind,
                extension: request.target_extension,
            });
        }

        let converter = self
            .converters
            .get(&request.media_kind)
            .cloned()
            .ok_or_else(|| {
                ConverterError::conversion_failed(
                    format!("no converter registered for {} files", request.media_kind),
                    None,
                )
            })?;
        converter.check_target(&request.target_extension)?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ConverterError::conversion_failed(format!("no async runtime available: {}", e), None)
        })?;

        let task_id = Uuid::new_v4().to_string();
        {
            let mut active = self.lock_active();
            if let Some(running) = active.as_ref() {
                return Err(ConverterError::EngineBusy {
                    task_id: running.clone(),
                });
            }
            *active = Some(task_id.clone());
        }

        let job = ConversionJob::from_request(task_id.clone(), &request);
        info!(
            "Submitted task {}: {} -> {} ({} converter)",
            task_id,
            job.input_path.display(),
            job.output_path.display(),
            converter.name()
        );

        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = TaskHandle::new(task_id, job.output_path.clone(), state_rx, events_rx);

        let active = Arc::clone(&self.active);
        runtime.spawn(run_task(converter, job, state_tx, events_tx, active));

        Ok(handle)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registers converters before building an engine.
#[derive(Default)]
pub struct EngineBuilder {
    converters: HashMap<MediaKind, Arc<dyn Converter>>,
}

impl EngineBuilder {
    /// Registers `converter` for its media kind, replacing any previous one.
    pub fn with_converter<C: Converter + 'static>(mut self, converter: C) -> Self {
        self.converters.insert(converter.kind(), Arc::new(converter));
        self
    }

    pub fn build(self) -> ConversionEngine {
        ConversionEngine {
            converters: self.converters,
            active: Arc::new(Mutex::new(None)),
        }
    }
}

/// Drives one task: relays progress, then publishes the outcome.
async fn run_task(
    converter: Arc<dyn Converter>,
    job: ConversionJob,
    state_tx: watch::Sender<TaskState>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    active: Arc<Mutex<Option<String>>>,
) {
    let task_id = job.job_id.clone();
    let _ = state_tx.send(TaskState::Running);

    let (sink, mut progress_rx) = ProgressSink::channel();
    let mut work = tokio::spawn(async move { converter.convert(job, sink).await });

    let joined = loop {
        tokio::select! {
            biased;
            Some(event) = progress_rx.recv() => {
                debug!("Task {} progress {}%", task_id, event.percent);
                let _ = events_tx.send(TaskEvent::Progress(event));
            }
            joined = &mut work => break joined,
        }
    };
    while let Ok(event) = progress_rx.try_recv() {
        let _ = events_tx.send(TaskEvent::Progress(event));
    }

    let outcome = match joined {
        Ok(Ok(result)) => {
            info!(
                "Task {} completed: {} ({} bytes, {} ms)",
                task_id,
                result.output_path.display(),
                result.output_size_bytes,
                result.duration_ms
            );
            ConversionOutcome::Success {
                resolved_path: result.output_path,
            }
        }
        Ok(Err(e)) => {
            warn!("Task {} failed: {}", task_id, e);
            ConversionOutcome::from_error(&e)
        }
        Err(e) => {
            let message = join_failure_message(e);
            warn!("Task {} aborted: {}", task_id, message);
            ConversionOutcome::Failure {
                error_kind: ErrorKind::ConversionFailed,
                message,
            }
        }
    };

    let state = if outcome.is_success() {
        TaskState::Completed
    } else {
        TaskState::Failed
    };
    let _ = state_tx.send(state);
    {
        let mut guard = active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.as_deref() == Some(task_id.as_str()) {
            *guard = None;
        }
    }
    let _ = events_tx.send(TaskEvent::Finished(outcome));
}

fn join_failure_message(error: JoinError) -> String {
    if !error.is_panic() {
        return format!("Conversion task was cancelled: {}", error);
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Converter panicked: {}", detail)
}
