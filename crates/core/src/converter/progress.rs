//! Progress reporting from converters.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use super::types::ProgressEvent;

/// Cloneable progress reporter handed to a converter.
///
/// Usable from async code and from `spawn_blocking` closures alike. Values
/// lower than the last reported one are dropped so the stream a caller sees
/// never goes backwards, even when clones report concurrently. Reporting
/// after the receiver is gone is a no-op.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    // Held across the comparison and the send.
    last: Arc<Mutex<Option<u8>>>,
}

impl ProgressSink {
    /// Creates a sink and its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                last: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Reports `percent` (clamped to 100).
    pub fn report(&self, percent: u8) {
        let Some(tx) = &self.tx else {
            return;
        };
        let percent = percent.min(100);

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*last, Some(previous) if previous > percent) {
            return;
        }
        *last = Some(percent);
        let _ = tx.send(ProgressEvent::new(percent));
    }
}
