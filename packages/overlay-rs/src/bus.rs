//! Scope-keyed, type-erased event bus.
//!
//! # Guarantees
//!
//! - **Synchronous delivery**: `publish` runs every handler on the calling
//!   thread before it returns
//! - **Publish order**: handlers see events in the order they were published
//! - **Subscription order**: handlers of one channel run in the order they
//!   subscribed
//! - **Scoped**: a channel is `(scope, event name)`; scopes never cross-talk
//!
//! # Errors
//!
//! Handlers return `Result`. The first handler error stops delivery and is
//! returned from `publish`, so a violation raised inside a handler reaches
//! the publisher synchronously.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::error::OverlayError;

/// Process-wide bus returned by [`EventBus::global`].
static GLOBAL_BUS: OnceLock<EventBus> = OnceLock::new();

type Handler = Arc<dyn Fn(&EventEnvelope) -> Result<(), OverlayError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    scope: String,
    event: String,
}

impl ChannelKey {
    fn new(scope: &str, event: &str) -> Self {
        Self {
            scope: scope.to_owned(),
            event: event.to_owned(),
        }
    }
}

struct Subscriber {
    id: u64,
    handler: Handler,
}

/// Envelope wrapping a published payload with its channel.
#[derive(Clone)]
pub struct EventEnvelope {
    /// Scope the event was published under.
    pub scope: Arc<str>,
    /// Event name within the scope.
    pub event: Arc<str>,
    /// Type ID of the payload.
    pub type_id: TypeId,
    /// The actual payload.
    pub payload: Arc<dyn Any + Send + Sync>,
}

impl EventEnvelope {
    /// Create a new envelope.
    pub fn new<P: Any + Send + Sync>(scope: &str, event: &str, payload: P) -> Self {
        Self {
            scope: Arc::from(scope),
            event: Arc::from(event),
            type_id: TypeId::of::<P>(),
            payload: Arc::new(payload),
        }
    }

    /// Downcast the payload to a concrete type.
    pub fn downcast_ref<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref()
    }

    /// Downcast the payload, failing with a base error on a type mismatch.
    pub fn payload<P: Any>(&self) -> Result<&P, OverlayError> {
        self.downcast_ref().ok_or_else(|| {
            OverlayError::internal(format!(
                "event `{}` in scope `{}` carried an unexpected payload type (wanted {})",
                self.event,
                self.scope,
                std::any::type_name::<P>()
            ))
        })
    }
}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("scope", &self.scope)
            .field("event", &self.event)
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

struct BusInner {
    channels: DashMap<ChannelKey, SmallVec<[Subscriber; 2]>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, key: &ChannelKey, id: u64) {
        let now_empty = match self.channels.get_mut(key) {
            Some(mut subscribers) => {
                subscribers.retain(|s| s.id != id);
                subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.channels.remove_if(key, |_, subscribers| subscribers.is_empty());
        }
    }
}

/// Named publish/subscribe channel keyed by scope and event name.
///
/// Cloning is cheap; clones share the same channels.
///
/// # Example
///
/// ```ignore
/// let bus = EventBus::new();
///
/// let _sub = bus.subscribe("app/overlay", "close", |envelope| {
///     let overlay_id = envelope.payload::<String>()?;
///     println!("close {overlay_id}");
///     Ok(())
/// });
///
/// bus.publish("app/overlay", "close", "confirm".to_string())?;
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new, private event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The process-wide bus shared by every facade and host that does not
    /// bring its own.
    pub fn global() -> Self {
        GLOBAL_BUS.get_or_init(EventBus::new).clone()
    }

    /// Publish a payload on `(scope, event)`.
    ///
    /// Returns the number of handlers that received it.
    pub fn publish<P: Any + Send + Sync>(
        &self,
        scope: &str,
        event: &str,
        payload: P,
    ) -> Result<usize, OverlayError> {
        self.publish_envelope(&EventEnvelope::new(scope, event, payload))
    }

    /// Publish an envelope directly.
    pub fn publish_envelope(&self, envelope: &EventEnvelope) -> Result<usize, OverlayError> {
        let key = ChannelKey::new(&envelope.scope, &envelope.event);

        // Handlers run without any channel lock held so they may publish or
        // subscribe themselves.
        let handlers: SmallVec<[Handler; 2]> = match self.inner.channels.get(&key) {
            Some(subscribers) => subscribers.iter().map(|s| s.handler.clone()).collect(),
            None => SmallVec::new(),
        };

        if handlers.is_empty() {
            warn!(
                scope = %envelope.scope,
                event = %envelope.event,
                "event published with no subscriber"
            );
            return Ok(0);
        }

        for handler in &handlers {
            handler(envelope)?;
        }

        trace!(
            scope = %envelope.scope,
            event = %envelope.event,
            delivered = handlers.len(),
            "event delivered"
        );
        Ok(handlers.len())
    }

    /// Subscribe a handler to `(scope, event)`.
    ///
    /// The handler stays attached until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe<F>(&self, scope: &str, event: &str, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) -> Result<(), OverlayError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let key = ChannelKey::new(scope, event);

        self.inner
            .channels
            .entry(key.clone())
            .or_default()
            .push(Subscriber {
                id,
                handler: Arc::new(handler),
            });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    /// Number of handlers attached to `(scope, event)`.
    pub fn subscriber_count(&self, scope: &str, event: &str) -> usize {
        self.inner
            .channels
            .get(&ChannelKey::new(scope, event))
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("channel_count", &self.inner.channels.len())
            .finish()
    }
}

/// Handle keeping a bus handler attached.
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    bus: Weak<BusInner>,
    key: ChannelKey,
    id: u64,
}

impl Subscription {
    /// Detach the handler now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.key, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("scope", &self.key.scope)
            .field("event", &self.key.event)
            .field("id", &self.id)
            .finish()
    }
}
