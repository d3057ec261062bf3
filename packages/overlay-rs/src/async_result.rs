//! Awaitable overlay results.
//!
//! `open_async` pairs an overlay with a write-once [`Settlement`]. The
//! controller receives [`AsyncOverlayProps`], whose `close(value)` and
//! `reject(reason)` settle the result and then close the overlay.
//!
//! # Important Semantics
//!
//! - **Settle once**: only the first `close`/`reject` is observed; later
//!   calls still close the overlay but never change the result
//! - **Result before close**: the outcome is handed to the awaiter before
//!   the lifecycle close command is dispatched
//! - **No timeout**: the result stays pending until settled. Race it with
//!   `tokio::time::timeout` if you need one
//! - **Dismissal**: if every handle able to settle the result is dropped
//!   (the overlay was unmounted unsettled, or its open was refused) the
//!   awaiter gets [`Rejection::Dismissed`]
//!
//! # Example
//!
//! ```ignore
//! let confirmed: bool = overlay
//!     .open_async(
//!         |props: AsyncOverlayProps<bool>| ConfirmDialog {
//!             open: props.is_open(),
//!             on_confirm: { let p = props.clone(); move || p.close(true) },
//!             on_cancel: move || props.close(false),
//!         },
//!         OpenOptions::default(),
//!     )?
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::controller::OverlayProps;
use crate::error::Rejection;

type Outcome<T> = Result<T, Rejection>;

/// Write-once cell settling one [`PendingResult`].
pub struct Settlement<T> {
    overlay_id: String,
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
}

impl<T: Send + 'static> Settlement<T> {
    /// Create a settlement cell and the future it settles.
    pub fn new(overlay_id: impl Into<String>) -> (Arc<Self>, PendingResult<T>) {
        let overlay_id = overlay_id.into();
        let (sender, receiver) = oneshot::channel();
        let settlement = Arc::new(Self {
            overlay_id: overlay_id.clone(),
            sender: Mutex::new(Some(sender)),
        });
        (
            settlement,
            PendingResult {
                overlay_id,
                receiver,
            },
        )
    }

    /// Settle with `outcome`. Returns false if already settled.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    trace!(overlay_id = %self.overlay_id, "overlay result awaiter already dropped");
                }
                true
            }
            None => {
                debug!(overlay_id = %self.overlay_id, "overlay result already settled, ignoring");
                false
            }
        }
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: anyhow::Error) -> bool {
        self.settle(Err(Rejection::Rejected(reason)))
    }

    pub fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn overlay_id(&self) -> &str {
        &self.overlay_id
    }
}

impl<T> fmt::Debug for Settlement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settlement")
            .field("overlay_id", &self.overlay_id)
            .finish_non_exhaustive()
    }
}

/// Future resolving to the outcome of an `open_async` overlay.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct PendingResult<T> {
    overlay_id: String,
    receiver: oneshot::Receiver<Outcome<T>>,
}

impl<T> PendingResult<T> {
    /// Id of the overlay this result belongs to.
    pub fn overlay_id(&self) -> &str {
        &self.overlay_id
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Rejection::Dismissed {
                overlay_id: self.overlay_id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("overlay_id", &self.overlay_id)
            .finish_non_exhaustive()
    }
}

/// Capabilities passed to an async controller on each render.
///
/// Same as [`OverlayProps`] except `close` carries the result value and
/// `reject` fails the result.
pub struct AsyncOverlayProps<T> {
    base: OverlayProps,
    settlement: Arc<Settlement<T>>,
}

impl<T: Send + 'static> AsyncOverlayProps<T> {
    pub(crate) fn new(base: OverlayProps, settlement: Arc<Settlement<T>>) -> Self {
        Self { base, settlement }
    }

    pub fn overlay_id(&self) -> &str {
        self.base.overlay_id()
    }

    pub fn is_open(&self) -> bool {
        self.base.is_open()
    }

    /// Resolve the result with `value`, then close the overlay.
    pub fn close(&self, value: T) {
        self.settlement.resolve(value);
        self.base.close();
    }

    /// Fail the result with `reason`, then close the overlay.
    pub fn reject(&self, reason: impl Into<anyhow::Error>) {
        self.settlement.reject(reason.into());
        self.base.close();
    }

    /// Remove the overlay without settling. The awaiter is dismissed once
    /// the overlay is gone.
    pub fn unmount(&self) {
        self.base.unmount();
    }
}

impl<T> Clone for AsyncOverlayProps<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            settlement: self.settlement.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncOverlayProps<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOverlayProps")
            .field("overlay_id", &self.base.overlay_id())
            .field("is_open", &self.base.is_open())
            .finish_non_exhaustive()
    }
}

/// Controller of an overlay opened with `open_async`.
pub trait AsyncController<T, V>: Send + Sync + 'static {
    fn render(&self, props: AsyncOverlayProps<T>) -> V;
}

impl<T, V, F> AsyncController<T, V> for F
where
    F: Fn(AsyncOverlayProps<T>) -> V + Send + Sync + 'static,
{
    fn render(&self, props: AsyncOverlayProps<T>) -> V {
        self(props)
    }
}
