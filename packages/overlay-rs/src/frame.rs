//! Frame scheduling for the mount synchronizer.
//!
//! A freshly mounted overlay is rendered once in `Mounted` before it is
//! flagged open, so the controller observes a real mounted → open change and
//! enter transitions can fire. The open is deferred to the next frame of the
//! host's paint loop through a [`FrameScheduler`].

use std::fmt;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::OverlayError;

/// Default frame interval (one frame at ~60 Hz).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Callback run on the next frame.
pub type FrameCallback = Box<dyn FnOnce() + Send + 'static>;

/// Single-shot deferral to the host's next frame.
pub trait FrameScheduler: Send + Sync + 'static {
    /// Run `callback` once, on the next frame.
    fn request_frame(&self, callback: FrameCallback);
}

/// Frame scheduler backed by a tokio runtime and a fixed frame interval.
#[derive(Clone)]
pub struct TokioFrameScheduler {
    handle: Handle,
    interval: Duration,
}

impl TokioFrameScheduler {
    pub fn new(handle: Handle, interval: Duration) -> Self {
        Self { handle, interval }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self, OverlayError> {
        let handle = Handle::try_current().map_err(|e| {
            OverlayError::internal(format!("frame scheduler needs a tokio runtime: {e}"))
        })?;
        Ok(Self::new(handle, DEFAULT_FRAME_INTERVAL))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameScheduler for TokioFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) {
        let interval = self.interval;
        self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            callback();
        });
    }
}

impl fmt::Debug for TokioFrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioFrameScheduler")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
