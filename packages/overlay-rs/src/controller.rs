//! Controllers and the lifecycle capabilities they receive.
//!
//! A controller is the caller-supplied function that produces an overlay's
//! content. The host calls it on every render with [`OverlayProps`]: the
//! overlay id, whether it is open, and `close`/`unmount` capabilities.
//!
//! `close` flags the overlay closed so exit transitions can run; `unmount`
//! removes it from the registry.

use std::fmt;
use std::sync::Arc;

/// Lifecycle command issued by a rendered overlay on itself.
///
/// Carries the component key of the mount that issued it, so a handle kept
/// past its overlay's removal cannot touch a later mount under the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelfCommand {
    Close {
        overlay_id: String,
        component_key: String,
    },
    Remove {
        overlay_id: String,
        component_key: String,
    },
}

pub(crate) type Dispatch = Arc<dyn Fn(SelfCommand) + Send + Sync>;

/// Capabilities passed to a controller on each render.
#[derive(Clone)]
pub struct OverlayProps {
    overlay_id: String,
    component_key: String,
    is_open: bool,
    dispatch: Dispatch,
}

impl OverlayProps {
    pub(crate) fn new(
        overlay_id: String,
        component_key: String,
        is_open: bool,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            overlay_id,
            component_key,
            is_open,
            dispatch,
        }
    }

    pub fn overlay_id(&self) -> &str {
        &self.overlay_id
    }

    /// Key of the mount these props were rendered for.
    pub fn component_key(&self) -> &str {
        &self.component_key
    }

    /// True once the overlay has been flagged open and until it is closed.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Flag this overlay closed. Idempotent, and a no-op once this mount
    /// has been removed.
    pub fn close(&self) {
        (self.dispatch)(SelfCommand::Close {
            overlay_id: self.overlay_id.clone(),
            component_key: self.component_key.clone(),
        });
    }

    /// Remove this overlay from the registry. Idempotent, and a no-op once
    /// this mount has been removed.
    pub fn unmount(&self) {
        (self.dispatch)(SelfCommand::Remove {
            overlay_id: self.overlay_id.clone(),
            component_key: self.component_key.clone(),
        });
    }
}

impl fmt::Debug for OverlayProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayProps")
            .field("overlay_id", &self.overlay_id)
            .field("component_key", &self.component_key)
            .field("is_open", &self.is_open)
            .finish_non_exhaustive()
    }
}

/// Produces the view of an overlay from its lifecycle capabilities.
///
/// Any `Fn(OverlayProps) -> V` closure is a controller:
///
/// ```ignore
/// overlay.open(
///     |props: OverlayProps| format!("<Dialog open={}>", props.is_open()),
///     OpenOptions::default(),
/// )?;
/// ```
pub trait Controller<V>: Send + Sync + 'static {
    fn render(&self, props: OverlayProps) -> V;
}

impl<V, F> Controller<V> for F
where
    F: Fn(OverlayProps) -> V + Send + Sync + 'static,
{
    fn render(&self, props: OverlayProps) -> V {
        self(props)
    }
}
