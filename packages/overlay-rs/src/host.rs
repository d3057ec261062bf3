//! Overlay host: the rendering-side owner of the registry.
//!
//! The host subscribes to its scope's channels on the bus and is the only
//! writer of the registry. Each render pass produces one
//! [`RenderedOverlay`] per live entry, in stacking order, and hands freshly
//! mounted entries to the frame scheduler so they open on the next frame.
//!
//! ```text
//! Overlay::open() ──► EventBus ──► host handler ──► OverlayRegistry::reduce()
//!                                                        │
//!                                             revision ◄─┘
//!                                                │
//!                               render() ◄───────┘
//!                                  │
//!                                  ├─► Controller::render(props)
//!                                  └─► FrameScheduler ──► Open
//! ```
//!
//! # Locking
//!
//! The registry lock is never held while a controller, a frame callback or
//! the error policy runs, so controllers may call `close`/`unmount` (or the
//! facade) from inside `render`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::bus::{EventBus, EventEnvelope, Subscription};
use crate::controller::{Controller, Dispatch, OverlayProps, SelfCommand};
use crate::error::{ErrorPolicy, OverlayError, StrictErrorPolicy};
use crate::facade::{
    channel_scope, OpenRequest, EVENT_CLOSE, EVENT_CLOSE_ALL, EVENT_OPEN, EVENT_UNMOUNT,
    EVENT_UNMOUNT_ALL,
};
use crate::frame::{FrameScheduler, TokioFrameScheduler};
use crate::reducer::{OverlayAction, OverlayRegistry, OverlaySnapshot, Phase};

type SharedController<V> = Arc<dyn Controller<V>>;

/// Output of one controller in a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedOverlay<V> {
    pub overlay_id: String,
    /// Changes on every remount under the same id; use it as the view key.
    pub component_key: String,
    pub phase: Phase,
    pub view: V,
}

struct HostInner<V> {
    scope: String,
    registry: Mutex<OverlayRegistry<SharedController<V>>>,
    frames: Arc<dyn FrameScheduler>,
    policy: Arc<dyn ErrorPolicy>,
    revision: watch::Sender<u64>,
}

impl<V: 'static> HostInner<V> {
    fn registry(&self) -> MutexGuard<'_, OverlayRegistry<SharedController<V>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, action: OverlayAction<SharedController<V>>) -> Result<(), OverlayError> {
        let changes = self.registry().reduce(action)?;
        if changes.is_empty() {
            return Ok(());
        }

        for change in &changes {
            debug!(
                scope = %self.scope,
                overlay_id = %change.overlay_id,
                from = ?change.from,
                to = %change.to,
                "overlay phase changed"
            );
        }
        self.revision.send_modify(|revision| *revision += 1);
        Ok(())
    }

    /// Apply an action, routing a violation through the error policy.
    fn apply_or_handle(
        &self,
        action: OverlayAction<SharedController<V>>,
    ) -> Result<(), OverlayError> {
        self.apply(action).or_else(|e| self.policy.handle(e))
    }

    fn dispatch(self: &Arc<Self>) -> Dispatch {
        let host = Arc::downgrade(self);
        Arc::new(move |command: SelfCommand| {
            let Some(host) = host.upgrade() else {
                return;
            };
            let action = match command {
                SelfCommand::Close {
                    overlay_id,
                    component_key,
                } => OverlayAction::Close {
                    overlay_id,
                    component_key: Some(component_key),
                },
                SelfCommand::Remove {
                    overlay_id,
                    component_key,
                } => OverlayAction::Remove {
                    overlay_id,
                    component_key: Some(component_key),
                },
            };
            if let Err(e) = host.apply_or_handle(action) {
                error!(scope = %host.scope, error = %e, "overlay self-command failed");
            }
        })
    }
}

/// Owner of one scope's registry and renderer of its overlays.
///
/// Dropping the host detaches it from the bus.
///
/// # Example
///
/// ```ignore
/// let host = OverlayHost::<String>::builder("app").mount()?;
/// let overlay = Overlay::<String>::new("app");
///
/// overlay.open(|props: OverlayProps| format!("open={}", props.is_open()), OpenOptions::default())?;
///
/// let mut changes = host.changes();
/// loop {
///     for rendered in host.render() {
///         paint(&rendered.component_key, rendered.view);
///     }
///     changes.changed().await?;
/// }
/// ```
pub struct OverlayHost<V: 'static> {
    inner: Arc<HostInner<V>>,
    _subscriptions: Vec<Subscription>,
}

impl<V: 'static> OverlayHost<V> {
    pub fn builder(scope: impl Into<String>) -> HostBuilder<V> {
        HostBuilder::new(scope)
    }

    /// Mount a host for `scope` on `bus`.
    pub fn mount(
        scope: impl Into<String>,
        bus: &EventBus,
        frames: Arc<dyn FrameScheduler>,
        policy: Arc<dyn ErrorPolicy>,
    ) -> Self {
        let scope = scope.into();
        let channel = channel_scope(&scope);
        let (revision, _) = watch::channel(0);
        let inner = Arc::new(HostInner {
            scope,
            registry: Mutex::new(OverlayRegistry::new()),
            frames,
            policy,
            revision,
        });

        let subscriptions = vec![
            on(bus, &channel, EVENT_OPEN, &inner, |envelope| {
                let request = envelope.payload::<OpenRequest<V>>()?;
                Ok(OverlayAction::Add {
                    overlay_id: request.overlay_id.clone(),
                    component_key: request.component_key.clone(),
                    controller: request.controller.clone(),
                })
            }),
            on(bus, &channel, EVENT_CLOSE, &inner, |envelope| {
                Ok(OverlayAction::Close {
                    overlay_id: envelope.payload::<String>()?.clone(),
                    component_key: None,
                })
            }),
            on(bus, &channel, EVENT_UNMOUNT, &inner, |envelope| {
                Ok(OverlayAction::Remove {
                    overlay_id: envelope.payload::<String>()?.clone(),
                    component_key: None,
                })
            }),
            on(bus, &channel, EVENT_CLOSE_ALL, &inner, |_| {
                Ok(OverlayAction::CloseAll)
            }),
            on(bus, &channel, EVENT_UNMOUNT_ALL, &inner, |_| {
                Ok(OverlayAction::RemoveAll)
            }),
        ];

        info!(scope = %inner.scope, "overlay host mounted");
        Self {
            inner,
            _subscriptions: subscriptions,
        }
    }

    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Render every live overlay in stacking order.
    ///
    /// Entries rendered here for the first time while `Mounted` get their
    /// open scheduled on the next frame, exactly once.
    pub fn render(&self) -> Vec<RenderedOverlay<V>> {
        let (live, unscheduled) = {
            let mut registry = self.inner.registry();
            let live: Vec<_> = registry
                .iter()
                .map(|entry| {
                    (
                        entry.overlay_id().to_owned(),
                        entry.component_key().to_owned(),
                        entry.phase(),
                        entry.controller().clone(),
                    )
                })
                .collect();
            (live, registry.take_unscheduled_mounts())
        };

        let dispatch = self.inner.dispatch();
        let rendered = live
            .into_iter()
            .map(|(overlay_id, component_key, phase, controller)| {
                let props = OverlayProps::new(
                    overlay_id.clone(),
                    component_key.clone(),
                    phase == Phase::Open,
                    dispatch.clone(),
                );
                RenderedOverlay {
                    view: controller.render(props),
                    overlay_id,
                    component_key,
                    phase,
                }
            })
            .collect();

        for (overlay_id, component_key) in unscheduled {
            self.schedule_open(overlay_id, component_key);
        }

        rendered
    }

    fn schedule_open(&self, overlay_id: String, component_key: String) {
        debug!(scope = %self.inner.scope, overlay_id = %overlay_id, "open scheduled for next frame");
        let host = Arc::downgrade(&self.inner);
        self.inner.frames.request_frame(Box::new(move || {
            let Some(host) = host.upgrade() else {
                return;
            };
            let action = OverlayAction::Open {
                overlay_id,
                component_key,
            };
            if let Err(e) = host.apply_or_handle(action) {
                error!(scope = %host.scope, error = %e, "deferred open failed");
            }
        }));
    }

    /// Phase of a live overlay; `None` once removed.
    pub fn phase(&self, overlay_id: &str) -> Option<Phase> {
        self.inner.registry().phase(overlay_id)
    }

    pub fn contains(&self, overlay_id: &str) -> bool {
        self.inner.registry().contains(overlay_id)
    }

    /// Topmost overlay that has not been dismissed.
    pub fn current(&self) -> Option<String> {
        self.inner.registry().current().map(str::to_owned)
    }

    pub fn snapshot(&self) -> Vec<OverlaySnapshot> {
        self.inner.registry().snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry().is_empty()
    }

    /// Registry revision; changes whenever a command alters the registry.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }
}

impl<V: 'static> fmt::Debug for OverlayHost<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayHost")
            .field("scope", &self.inner.scope)
            .field("overlays", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// Subscribe a host handler that turns an envelope into a reducer action.
fn on<V, F>(
    bus: &EventBus,
    channel: &str,
    event: &str,
    inner: &Arc<HostInner<V>>,
    to_action: F,
) -> Subscription
where
    V: 'static,
    F: Fn(&EventEnvelope) -> Result<OverlayAction<SharedController<V>>, OverlayError>
        + Send
        + Sync
        + 'static,
{
    let host: Weak<HostInner<V>> = Arc::downgrade(inner);
    bus.subscribe(channel, event, move |envelope| {
        let Some(host) = host.upgrade() else {
            return Ok(());
        };
        match to_action(envelope) {
            Ok(action) => host.apply_or_handle(action),
            Err(e) => host.policy.handle(e),
        }
    })
}

/// Builder for [`OverlayHost`].
///
/// Defaults: the process-wide bus, [`StrictErrorPolicy`], and a
/// [`TokioFrameScheduler`] on the current runtime.
pub struct HostBuilder<V> {
    scope: String,
    bus: Option<EventBus>,
    frames: Option<Arc<dyn FrameScheduler>>,
    policy: Arc<dyn ErrorPolicy>,
    _view: std::marker::PhantomData<fn() -> V>,
}

impl<V: 'static> HostBuilder<V> {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            bus: None,
            frames: None,
            policy: Arc::new(StrictErrorPolicy),
            _view: std::marker::PhantomData,
        }
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn frames(mut self, frames: impl FrameScheduler) -> Self {
        self.frames = Some(Arc::new(frames));
        self
    }

    pub fn shared_frames(mut self, frames: Arc<dyn FrameScheduler>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn error_policy(mut self, policy: Arc<dyn ErrorPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Mount the host.
    ///
    /// Fails only when no frame scheduler was given and no tokio runtime is
    /// running.
    pub fn mount(self) -> Result<OverlayHost<V>, OverlayError> {
        let frames = match self.frames {
            Some(frames) => frames,
            None => Arc::new(TokioFrameScheduler::current()?),
        };
        let bus = self.bus.unwrap_or_else(EventBus::global);
        Ok(OverlayHost::mount(self.scope, &bus, frames, self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoggingErrorPolicy;
    use crate::facade::{OpenOptions, Overlay};
    use crate::testing::ManualFrameScheduler;

    fn setup() -> (Overlay<String>, OverlayHost<String>, Arc<ManualFrameScheduler>) {
        let bus = EventBus::new();
        let frames = Arc::new(ManualFrameScheduler::new());
        let host = OverlayHost::builder("app")
            .bus(bus.clone())
            .shared_frames(frames.clone())
            .mount()
            .unwrap();
        (Overlay::with_bus("app", bus), host, frames)
    }

    fn label(props: OverlayProps) -> String {
        format!("{}:{}", props.overlay_id(), props.is_open())
    }

    #[test]
    fn test_open_inserts_mounted_entry() {
        let (overlay, host, _frames) = setup();

        let id = overlay.open(label, OpenOptions::with_id("x")).unwrap();

        assert_eq!(id, "x");
        assert_eq!(host.phase("x"), Some(Phase::Mounted));
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn test_render_passes_phase_to_controller() {
        let (overlay, host, frames) = setup();
        overlay.open(label, OpenOptions::with_id("x")).unwrap();

        let first = host.render();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].view, "x:false");
        assert_eq!(first[0].phase, Phase::Mounted);

        frames.advance();

        let second = host.render();
        assert_eq!(second[0].view, "x:true");
        assert_eq!(second[0].phase, Phase::Open);
    }

    #[test]
    fn test_open_is_deferred_until_first_render_and_next_frame() {
        let (overlay, host, frames) = setup();
        overlay.open(label, OpenOptions::with_id("x")).unwrap();

        assert_eq!(frames.advance(), 0);
        assert_eq!(host.phase("x"), Some(Phase::Mounted));

        host.render();
        assert_eq!(host.phase("x"), Some(Phase::Mounted));

        assert_eq!(frames.advance(), 1);
        assert_eq!(host.phase("x"), Some(Phase::Open));
    }

    #[test]
    fn test_rerender_schedules_open_once() {
        let (overlay, host, frames) = setup();
        overlay.open(label, OpenOptions::with_id("x")).unwrap();

        host.render();
        host.render();
        host.render();

        assert_eq!(frames.pending(), 1);
        frames.advance();
        host.render();
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn test_props_close_and_unmount_drive_the_registry() {
        let (overlay, host, frames) = setup();
        let slot: Arc<Mutex<Option<OverlayProps>>> = Arc::new(Mutex::new(None));
        let keep = slot.clone();
        overlay
            .open(
                move |props: OverlayProps| {
                    *keep.lock().unwrap() = Some(props);
                    String::new()
                },
                OpenOptions::with_id("x"),
            )
            .unwrap();
        host.render();
        frames.advance();

        let props = slot.lock().unwrap().clone().unwrap();
        props.close();
        assert_eq!(host.phase("x"), Some(Phase::Closed));

        props.unmount();
        assert!(!host.contains("x"));
    }

    #[test]
    fn test_controller_may_close_itself_during_render() {
        let (overlay, host, _frames) = setup();
        overlay
            .open(
                |props: OverlayProps| {
                    props.close();
                    String::from("closing")
                },
                OpenOptions::with_id("x"),
            )
            .unwrap();

        let rendered = host.render();

        assert_eq!(rendered[0].view, "closing");
        assert_eq!(host.phase("x"), Some(Phase::Closed));
    }

    #[test]
    fn test_render_order_follows_insertion() {
        let (overlay, host, _frames) = setup();
        for id in ["c", "a", "b"] {
            overlay.open(label, OpenOptions::with_id(id)).unwrap();
        }

        let ids: Vec<String> = host.render().into_iter().map(|r| r.overlay_id).collect();

        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_remount_gets_new_component_key() {
        let (overlay, host, _frames) = setup();
        overlay.open(label, OpenOptions::with_id("x")).unwrap();
        let first_key = host.render()[0].component_key.clone();

        overlay.unmount("x");
        overlay.open(label, OpenOptions::with_id("x")).unwrap();
        let second_key = host.render()[0].component_key.clone();

        assert_ne!(first_key, second_key);
    }

    #[test]
    fn test_stale_frame_does_not_open_remount() {
        let (overlay, host, frames) = setup();
        overlay.open(label, OpenOptions::with_id("x")).unwrap();
        host.render();

        overlay.unmount("x");
        overlay.open(label, OpenOptions::with_id("x")).unwrap();

        // Frame scheduled for the first mount fires before the remount renders.
        frames.advance();
        assert_eq!(host.phase("x"), Some(Phase::Mounted));

        host.render();
        frames.advance();
        assert_eq!(host.phase("x"), Some(Phase::Open));
    }

    #[test]
    fn test_duplicate_open_is_returned_under_strict_policy() {
        let (overlay, host, _frames) = setup();
        overlay
            .open(|_: OverlayProps| "C".to_string(), OpenOptions::with_id("dup"))
            .unwrap();

        let err = overlay
            .open(|_: OverlayProps| "D".to_string(), OpenOptions::with_id("dup"))
            .unwrap_err();

        assert_eq!(err, OverlayError::duplicate("dup"));
        let rendered = host.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].view, "C");
    }

    #[test]
    fn test_duplicate_open_is_logged_under_logging_policy() {
        let bus = EventBus::new();
        let host = OverlayHost::<String>::builder("app")
            .bus(bus.clone())
            .frames(ManualFrameScheduler::new())
            .error_policy(Arc::new(LoggingErrorPolicy))
            .mount()
            .unwrap();
        let overlay = Overlay::<String>::with_bus("app", bus);
        overlay
            .open(|_: OverlayProps| "C".to_string(), OpenOptions::with_id("dup"))
            .unwrap();

        let id = overlay
            .open(|_: OverlayProps| "D".to_string(), OpenOptions::with_id("dup"))
            .unwrap();

        assert_eq!(id, "dup");
        assert_eq!(host.render()[0].view, "C");
    }

    #[test]
    fn test_revision_bumps_only_on_change() {
        let (overlay, host, _frames) = setup();
        let start = host.revision();

        overlay.close("ghost");
        assert_eq!(host.revision(), start);

        overlay.open(label, OpenOptions::with_id("x")).unwrap();
        assert_eq!(host.revision(), start + 1);

        overlay.close("x");
        overlay.close("x");
        assert_eq!(host.revision(), start + 2);
    }

    #[tokio::test]
    async fn test_changes_notifies_subscribers() {
        let (overlay, host, _frames) = setup();
        let mut changes = host.changes();

        overlay.open(label, OpenOptions::with_id("x")).unwrap();

        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), host.revision());
    }

    #[test]
    fn test_current_and_snapshot() {
        let (overlay, host, _frames) = setup();
        overlay.open(label, OpenOptions::with_id("a")).unwrap();
        overlay.open(label, OpenOptions::with_id("b")).unwrap();
        assert_eq!(host.current().as_deref(), Some("b"));

        overlay.close("b");

        assert_eq!(host.current().as_deref(), Some("a"));
        let phases: Vec<(String, Phase)> = host
            .snapshot()
            .into_iter()
            .map(|s| (s.overlay_id, s.phase))
            .collect();
        assert_eq!(
            phases,
            vec![
                ("a".to_string(), Phase::Mounted),
                ("b".to_string(), Phase::Closed)
            ]
        );
    }

    #[test]
    fn test_dropping_host_detaches_from_bus() {
        let bus = EventBus::new();
        let host = OverlayHost::<String>::builder("app")
            .bus(bus.clone())
            .frames(ManualFrameScheduler::new())
            .mount()
            .unwrap();
        assert_eq!(bus.subscriber_count("app/overlay", EVENT_OPEN), 1);

        drop(host);

        assert_eq!(bus.subscriber_count("app/overlay", EVENT_OPEN), 0);
        let overlay = Overlay::<String>::with_bus("app", bus);
        assert!(overlay.open(label, OpenOptions::default()).is_ok());
    }

    #[test]
    fn test_props_outliving_host_are_inert() {
        let (overlay, host, _frames) = setup();
        let slot: Arc<Mutex<Option<OverlayProps>>> = Arc::new(Mutex::new(None));
        let keep = slot.clone();
        overlay
            .open(
                move |props: OverlayProps| {
                    *keep.lock().unwrap() = Some(props);
                    String::new()
                },
                OpenOptions::with_id("x"),
            )
            .unwrap();
        host.render();
        let props = slot.lock().unwrap().take().unwrap();

        drop(host);

        props.close();
        props.unmount();
    }

    #[test]
    fn test_props_from_earlier_mount_do_not_touch_remount() {
        let (overlay, host, frames) = setup();
        let slot: Arc<Mutex<Option<OverlayProps>>> = Arc::new(Mutex::new(None));
        let keep = slot.clone();
        overlay
            .open(
                move |props: OverlayProps| {
                    *keep.lock().unwrap() = Some(props);
                    String::new()
                },
                OpenOptions::with_id("x"),
            )
            .unwrap();
        host.render();
        let earlier = slot.lock().unwrap().take().unwrap();
        earlier.unmount();

        overlay.open(label, OpenOptions::with_id("x")).unwrap();
        host.render();
        frames.advance();
        assert_eq!(host.phase("x"), Some(Phase::Open));

        earlier.close();
        assert_eq!(host.phase("x"), Some(Phase::Open));
        earlier.unmount();
        assert_eq!(host.phase("x"), Some(Phase::Open));

        overlay.close("x");
        assert_eq!(host.phase("x"), Some(Phase::Closed));
    }

    #[test]
    fn test_view_type_mismatch_is_internal_error() {
        let bus = EventBus::new();
        let host = OverlayHost::<String>::builder("app")
            .bus(bus.clone())
            .frames(ManualFrameScheduler::new())
            .mount()
            .unwrap();
        let wrong_view = Overlay::<u32>::with_bus("app", bus);

        let err = wrong_view
            .open(|_: OverlayProps| 7u32, OpenOptions::with_id("x"))
            .unwrap_err();

        assert!(matches!(err, OverlayError::Internal { .. }));
        assert!(host.is_empty());
    }

    #[test]
    fn test_builder_without_runtime_or_frames_fails() {
        let result = OverlayHost::<String>::builder("app")
            .bus(EventBus::new())
            .mount();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_builder_defaults_to_tokio_frames() {
        let bus = EventBus::new();
        let host = OverlayHost::<String>::builder("app")
            .bus(bus.clone())
            .mount()
            .unwrap();
        let overlay = Overlay::<String>::with_bus("app", bus);
        overlay.open(label, OpenOptions::with_id("x")).unwrap();

        host.render();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(host.phase("x"), Some(Phase::Open));
    }
}
