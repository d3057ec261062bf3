//! # Overlay
//!
//! Imperative overlay management: open, close and await dialogs, toasts and
//! sheets from anywhere, while a host owns their lifecycle and renders them.
//!
//! ## Core Concepts
//!
//! Overlay separates **commands** from **state**:
//! - [`Overlay`] = Commands (open, close, unmount, close all, unmount all)
//! - [`OverlayHost`] = State (the registry, the only writer, the renderer)
//!
//! The two never share memory. Commands travel over a scope-keyed
//! [`EventBus`], so any caller holding the scope name can drive the host.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!     │
//!     ▼ open() / close() / unmount()
//! Overlay ──► EventBus ("{scope}/overlay") ──┐
//!                                            │
//!                                            ▼
//!                                     OverlayHost
//!                                            │
//!                           OverlayRegistry::reduce()
//!                                            │
//!                         render() ◄─────────┤ revision
//!                             │
//!                             ├─► Controller::render(OverlayProps) ─► V
//!                             │          │
//!                             │          └─► props.close() / unmount()
//!                             │
//!                             └─► FrameScheduler ─► Open (next frame)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Phases only move forward** - mounted → open → closed → removed
//! 2. **One live overlay per id** - opening a live id is a violation
//! 3. **Insertion order is stacking order** - the last live entry is on top
//! 4. **Mount before open** - an overlay is rendered once before it opens
//! 5. **Settle once** - an async result observes only its first outcome
//!
//! ## Error Handling
//!
//! Violations go through the host's [`ErrorPolicy`]. Under
//! [`ErrorMode::Strict`] they come back to the caller of `open`; under
//! [`ErrorMode::Logging`] they are logged and the command is a no-op.

// Core modules
mod async_result;
mod bus;
mod config;
mod controller;
mod error;
mod facade;
mod frame;
mod host;
mod id;
mod reducer;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export the command surface
pub use facade::{channel_scope, OpenOptions, OpenRequest, Overlay};
pub use facade::{EVENT_CLOSE, EVENT_CLOSE_ALL, EVENT_OPEN, EVENT_UNMOUNT, EVENT_UNMOUNT_ALL};

// Re-export the host
pub use host::{HostBuilder, OverlayHost, RenderedOverlay};

// Re-export registry types
pub use reducer::{OverlayAction, OverlayEntry, OverlayRegistry, OverlaySnapshot, Phase, PhaseChange};

// Re-export controllers and async results
pub use async_result::{AsyncController, AsyncOverlayProps, PendingResult, Settlement};
pub use controller::{Controller, OverlayProps};

// Re-export plumbing
pub use bus::{EventBus, EventEnvelope, Subscription};
pub use config::{OverlayConfig, DEFAULT_SCOPE};
pub use error::{
    ErrorMode, ErrorPolicy, LoggingErrorPolicy, OverlayError, Rejection, StrictErrorPolicy,
};
pub use frame::{FrameCallback, FrameScheduler, TokioFrameScheduler, DEFAULT_FRAME_INTERVAL};
pub use id::{IdGenerator, UuidGenerator};
