//! Testing utilities for overlay hosts.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! overlay = { path = "../overlay-rs", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use overlay::testing::{ManualFrameScheduler, SequentialIds};
//!
//! let frames = Arc::new(ManualFrameScheduler::new());
//! let host = OverlayHost::<String>::builder("app")
//!     .bus(bus.clone())
//!     .shared_frames(frames.clone())
//!     .mount()?;
//! let overlay = Overlay::<String>::with_bus("app", bus)
//!     .with_id_generator(SequentialIds::new("overlay"));
//!
//! let id = overlay.open(controller, OpenOptions::default())?;
//! host.render();                  // first render in Mounted
//! assert_eq!(frames.advance(), 1); // the deferred open runs here
//! assert_eq!(host.phase(&id), Some(Phase::Open));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{ErrorPolicy, OverlayError};
use crate::frame::{FrameCallback, FrameScheduler};
use crate::id::IdGenerator;

/// Frame scheduler driven by hand.
///
/// Callbacks queue up until [`advance`](Self::advance) runs them.
#[derive(Default)]
pub struct ManualFrameScheduler {
    queue: Mutex<VecDeque<FrameCallback>>,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every callback queued before this call. Returns how many ran.
    ///
    /// Callbacks requested while advancing wait for the next advance.
    pub fn advance(&self) -> usize {
        let due: Vec<FrameCallback> = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = due.len();
        for callback in due {
            callback();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(callback);
    }
}

impl std::fmt::Debug for ManualFrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualFrameScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Deterministic ids: `{prefix}-0`, `{prefix}-1`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicUsize,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicUsize::new(0),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn generate(&self) -> String {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Error policy that records violations and swallows them.
#[derive(Debug, Default)]
pub struct RecordingErrorPolicy {
    seen: Mutex<Vec<OverlayError>>,
}

impl RecordingErrorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Violations handled so far, oldest first.
    pub fn errors(&self) -> Vec<OverlayError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorPolicy for RecordingErrorPolicy {
    fn handle(&self, error: OverlayError) -> Result<(), OverlayError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_advance_runs_queued_callbacks_in_order() {
        let frames = ManualFrameScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            frames.request_frame(Box::new(move || order.lock().unwrap().push(n)));
        }

        assert_eq!(frames.pending(), 3);
        assert_eq!(frames.advance(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(frames.advance(), 0);
    }

    #[test]
    fn test_callbacks_requested_during_advance_wait() {
        let frames = Arc::new(ManualFrameScheduler::new());
        let inner = frames.clone();
        frames.request_frame(Box::new(move || {
            inner.request_frame(Box::new(|| {}));
        }));

        assert_eq!(frames.advance(), 1);
        assert_eq!(frames.pending(), 1);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new("o");
        assert_eq!(ids.generate(), "o-0");
        assert_eq!(ids.generate(), "o-1");
    }

    #[test]
    fn test_recording_policy_swallows_and_records() {
        let policy = RecordingErrorPolicy::new();
        assert!(policy.handle(OverlayError::duplicate("a")).is_ok());
        assert_eq!(policy.errors(), vec![OverlayError::duplicate("a")]);
    }
}
