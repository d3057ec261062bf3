//! Command facade: the entry point for imperative callers.
//!
//! [`Overlay`] never touches the registry. Every operation is published on
//! the event bus under the facade's scope; the host mounted for that scope
//! applies it.
//!
//! # Example
//!
//! ```ignore
//! use overlay::{OpenOptions, Overlay, OverlayProps};
//!
//! let overlay = Overlay::<String>::new("app");
//!
//! let id = overlay.open(
//!     |props: OverlayProps| format!("<Toast open={}>Saved</Toast>", props.is_open()),
//!     OpenOptions::default(),
//! )?;
//!
//! overlay.close(&id);
//! overlay.unmount(&id);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, error};

use crate::async_result::{AsyncController, AsyncOverlayProps, PendingResult, Settlement};
use crate::bus::EventBus;
use crate::controller::{Controller, OverlayProps};
use crate::error::OverlayError;
use crate::id::{IdGenerator, UuidGenerator};

/// Event name for open requests.
pub const EVENT_OPEN: &str = "open";
/// Event name for closing one overlay.
pub const EVENT_CLOSE: &str = "close";
/// Event name for removing one overlay.
pub const EVENT_UNMOUNT: &str = "unmount";
/// Event name for closing every overlay.
pub const EVENT_CLOSE_ALL: &str = "closeAll";
/// Event name for removing every overlay.
pub const EVENT_UNMOUNT_ALL: &str = "unmountAll";

/// Bus namespace for an overlay scope.
pub fn channel_scope(scope: &str) -> String {
    format!("{scope}/overlay")
}

/// Payload of an `open` event.
pub struct OpenRequest<V> {
    pub overlay_id: String,
    pub component_key: String,
    pub controller: Arc<dyn Controller<V>>,
}

impl<V> fmt::Debug for OpenRequest<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("overlay_id", &self.overlay_id)
            .field("component_key", &self.component_key)
            .finish_non_exhaustive()
    }
}

/// Options for `open` and `open_async`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Explicit overlay id. Generated when `None`.
    pub overlay_id: Option<String>,
}

impl OpenOptions {
    pub fn with_id(overlay_id: impl Into<String>) -> Self {
        Self {
            overlay_id: Some(overlay_id.into()),
        }
    }
}

/// Imperative overlay commands for one scope.
///
/// `V` is the view type the scope's host renders.
pub struct Overlay<V> {
    scope: String,
    channel: String,
    bus: EventBus,
    ids: Arc<dyn IdGenerator>,
    _view: PhantomData<fn() -> V>,
}

impl<V: 'static> Overlay<V> {
    /// Facade on the process-wide bus.
    pub fn new(scope: impl Into<String>) -> Self {
        Self::with_bus(scope, EventBus::global())
    }

    /// Facade on an explicit bus.
    pub fn with_bus(scope: impl Into<String>, bus: EventBus) -> Self {
        let scope = scope.into();
        Self {
            channel: channel_scope(&scope),
            scope,
            bus,
            ids: Arc::new(UuidGenerator),
            _view: PhantomData,
        }
    }

    /// Replace the identifier generator.
    pub fn with_id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Open an overlay and return its id.
    ///
    /// The id is returned right away; the overlay becomes open on the
    /// host's next frame after it is first rendered. Fails with
    /// [`OverlayError::DuplicateOverlay`] when `options.overlay_id` names a
    /// live overlay and the host's policy propagates violations.
    pub fn open<C: Controller<V>>(
        &self,
        controller: C,
        options: OpenOptions,
    ) -> Result<String, OverlayError> {
        let overlay_id = options.overlay_id.unwrap_or_else(|| self.ids.generate());
        let component_key = self.ids.generate();

        debug!(scope = %self.scope, overlay_id = %overlay_id, "opening overlay");
        self.bus.publish(
            &self.channel,
            EVENT_OPEN,
            OpenRequest {
                overlay_id: overlay_id.clone(),
                component_key,
                controller: Arc::new(controller) as Arc<dyn Controller<V>>,
            },
        )?;

        Ok(overlay_id)
    }

    /// Open an overlay whose controller settles a result.
    ///
    /// The overlay is opened immediately. The returned future resolves with
    /// the value passed to `close(value)`, or fails with the reason passed
    /// to `reject(reason)`.
    pub fn open_async<T, C>(
        &self,
        controller: C,
        options: OpenOptions,
    ) -> Result<PendingResult<T>, OverlayError>
    where
        T: Send + 'static,
        C: AsyncController<T, V>,
    {
        let overlay_id = options.overlay_id.unwrap_or_else(|| self.ids.generate());
        let (settlement, pending) = Settlement::new(overlay_id.clone());

        let wrapped = move |props: OverlayProps| {
            controller.render(AsyncOverlayProps::new(props, settlement.clone()))
        };
        self.open(wrapped, OpenOptions::with_id(overlay_id))?;

        Ok(pending)
    }

    /// Flag an overlay closed. No-op for unknown ids.
    pub fn close(&self, overlay_id: &str) {
        self.publish(EVENT_CLOSE, overlay_id.to_owned());
    }

    /// Remove an overlay. No-op for unknown ids.
    pub fn unmount(&self, overlay_id: &str) {
        self.publish(EVENT_UNMOUNT, overlay_id.to_owned());
    }

    /// Flag every live overlay closed.
    pub fn close_all(&self) {
        self.publish(EVENT_CLOSE_ALL, ());
    }

    /// Remove every overlay.
    pub fn unmount_all(&self) {
        self.publish(EVENT_UNMOUNT_ALL, ());
    }

    fn publish<P: std::any::Any + Send + Sync>(&self, event: &str, payload: P) {
        if let Err(e) = self.bus.publish(&self.channel, event, payload) {
            error!(scope = %self.scope, event, error = %e, "overlay command failed");
        }
    }
}

impl<V> Clone for Overlay<V> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            channel: self.channel.clone(),
            bus: self.bus.clone(),
            ids: self.ids.clone(),
            _view: PhantomData,
        }
    }
}

impl<V> fmt::Debug for Overlay<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("scope", &self.scope)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counter_ids() -> impl IdGenerator {
        let next = AtomicUsize::new(0);
        move || format!("id-{}", next.fetch_add(1, Ordering::SeqCst))
    }

    fn capture<P: Clone + Send + Sync + 'static>(
        bus: &EventBus,
        event: &str,
    ) -> (Arc<Mutex<Vec<P>>>, crate::bus::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(&channel_scope("app"), event, move |envelope| {
            sink.lock().unwrap().push(envelope.payload::<P>()?.clone());
            Ok(())
        });
        (seen, sub)
    }

    #[test]
    fn test_channel_scope() {
        assert_eq!(channel_scope("app"), "app/overlay");
    }

    #[test]
    fn test_open_generates_ids_and_publishes() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe("app/overlay", EVENT_OPEN, move |envelope| {
            let request = envelope.payload::<OpenRequest<String>>()?;
            sink.lock()
                .unwrap()
                .push((request.overlay_id.clone(), request.component_key.clone()));
            Ok(())
        });
        let overlay = Overlay::<String>::with_bus("app", bus).with_id_generator(counter_ids());

        let id = overlay
            .open(|_: OverlayProps| String::new(), OpenOptions::default())
            .unwrap();

        assert_eq!(id, "id-0");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("id-0".to_string(), "id-1".to_string())]
        );
    }

    #[test]
    fn test_open_uses_explicit_id() {
        let bus = EventBus::new();
        let overlay = Overlay::<String>::with_bus("app", bus).with_id_generator(counter_ids());

        let id = overlay
            .open(|_: OverlayProps| String::new(), OpenOptions::with_id("confirm"))
            .unwrap();

        assert_eq!(id, "confirm");
    }

    #[test]
    fn test_open_propagates_handler_error() {
        let bus = EventBus::new();
        let _sub = bus.subscribe("app/overlay", EVENT_OPEN, |envelope| {
            let request = envelope.payload::<OpenRequest<String>>()?;
            Err(OverlayError::duplicate(request.overlay_id.clone()))
        });
        let overlay = Overlay::<String>::with_bus("app", bus);

        let err = overlay
            .open(|_: OverlayProps| String::new(), OpenOptions::with_id("dup"))
            .unwrap_err();

        assert_eq!(err, OverlayError::duplicate("dup"));
    }

    #[test]
    fn test_commands_publish_on_their_events() {
        let bus = EventBus::new();
        let (closes, _c) = capture::<String>(&bus, EVENT_CLOSE);
        let (unmounts, _u) = capture::<String>(&bus, EVENT_UNMOUNT);
        let (close_alls, _ca) = capture::<()>(&bus, EVENT_CLOSE_ALL);
        let (unmount_alls, _ua) = capture::<()>(&bus, EVENT_UNMOUNT_ALL);
        let overlay = Overlay::<String>::with_bus("app", bus);

        overlay.close("a");
        overlay.unmount("b");
        overlay.close_all();
        overlay.unmount_all();

        assert_eq!(*closes.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(*unmounts.lock().unwrap(), vec!["b".to_string()]);
        assert_eq!(close_alls.lock().unwrap().len(), 1);
        assert_eq!(unmount_alls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_commands_without_host_are_noops() {
        let overlay = Overlay::<String>::with_bus("nobody", EventBus::new());

        overlay.close("ghost");
        overlay.unmount("ghost");
        overlay.close_all();
        overlay.unmount_all();
    }

    #[test]
    fn test_scopes_do_not_cross_talk() {
        let bus = EventBus::new();
        let (closes, _c) = capture::<String>(&bus, EVENT_CLOSE);
        let other = Overlay::<String>::with_bus("other", bus);

        other.close("a");

        assert!(closes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_async_refused_open_fails_synchronously() {
        let bus = EventBus::new();
        let _sub = bus.subscribe("app/overlay", EVENT_OPEN, |envelope| {
            let request = envelope.payload::<OpenRequest<String>>()?;
            Err(OverlayError::duplicate(request.overlay_id.clone()))
        });
        let overlay = Overlay::<String>::with_bus("app", bus);

        let result = overlay.open_async(
            |_: AsyncOverlayProps<i32>| String::new(),
            OpenOptions::with_id("dup"),
        );

        assert_eq!(result.unwrap_err(), OverlayError::duplicate("dup"));
    }

    #[test]
    fn test_open_async_reserves_overlay_id() {
        let overlay =
            Overlay::<String>::with_bus("app", EventBus::new()).with_id_generator(counter_ids());

        let pending = overlay
            .open_async(
                |_: AsyncOverlayProps<i32>| String::new(),
                OpenOptions::default(),
            )
            .unwrap();

        assert_eq!(pending.overlay_id(), "id-0");
    }
}
