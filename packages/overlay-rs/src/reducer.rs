//! Lifecycle reducer: the overlay registry and its state machine.
//!
//! The registry is an insertion-ordered map from overlay id to entry. The
//! order is the stacking order of the rendered overlays.
//!
//! # State Machine
//!
//! ```text
//!   Add ──► Mounted ──Open──► Open ──Close──► Closed ──Remove──► Removed
//!              │                                  ▲                 ▲
//!              └──────────────Close───────────────┘                 │
//!              └──────────────────────Remove────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **Pure**: no IO, no async; `reduce` only touches the registry
//! - **Total**: commands that do not apply are no-ops, not errors
//! - **Monotonic**: phases only move forward
//! - **One live entry per id**: a second `Add` under a live id fails

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::OverlayError;

/// Position of an overlay entry in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Inserted and renderable, not yet flagged open.
    Mounted,
    /// Flagged open; enter transitions have started.
    Open,
    /// Flagged closed; exit transitions may run.
    Closed,
    /// Terminal. The entry has been deleted from the registry.
    Removed,
}

impl Phase {
    /// Mounted or open: the overlay has not been dismissed yet.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Mounted | Phase::Open)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Mounted => write!(f, "mounted"),
            Phase::Open => write!(f, "open"),
            Phase::Closed => write!(f, "closed"),
            Phase::Removed => write!(f, "removed"),
        }
    }
}

/// One overlay in the registry.
#[derive(Debug, Clone)]
pub struct OverlayEntry<C> {
    overlay_id: String,
    component_key: String,
    controller: C,
    phase: Phase,
    open_scheduled: bool,
}

impl<C> OverlayEntry<C> {
    fn new(overlay_id: String, component_key: String, controller: C) -> Self {
        Self {
            overlay_id,
            component_key,
            controller,
            phase: Phase::Mounted,
            open_scheduled: false,
        }
    }

    pub fn overlay_id(&self) -> &str {
        &self.overlay_id
    }

    pub fn component_key(&self) -> &str {
        &self.component_key
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True when `component_key` is absent or names this mount.
    fn is_mount(&self, component_key: Option<&str>) -> bool {
        component_key.map_or(true, |key| key == self.component_key)
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            overlay_id: self.overlay_id.clone(),
            component_key: self.component_key.clone(),
            phase: self.phase,
        }
    }
}

/// Command applied to the registry.
#[derive(Debug, Clone)]
pub enum OverlayAction<C> {
    /// Insert a new entry in `Mounted` at the end of the order.
    Add {
        overlay_id: String,
        component_key: String,
        controller: C,
    },
    /// Mark a mounted entry open. Ignored unless the component key matches
    /// the live entry, so a stale deferred open never reaches a remount.
    Open {
        overlay_id: String,
        component_key: String,
    },
    /// Mark an entry closed. With a component key, only that mount is
    /// affected; a handle left over from an earlier mount is a no-op.
    Close {
        overlay_id: String,
        component_key: Option<String>,
    },
    /// Delete an entry, keyed the same way as `Close`.
    Remove {
        overlay_id: String,
        component_key: Option<String>,
    },
    CloseAll,
    RemoveAll,
}

/// A phase transition applied by the reducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    pub overlay_id: String,
    /// `None` when the entry was just inserted.
    pub from: Option<Phase>,
    pub to: Phase,
}

impl PhaseChange {
    fn new(overlay_id: &str, from: Option<Phase>, to: Phase) -> Self {
        Self {
            overlay_id: overlay_id.to_owned(),
            from,
            to,
        }
    }
}

/// Serializable view of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySnapshot {
    pub overlay_id: String,
    pub component_key: String,
    pub phase: Phase,
}

/// Ordered mapping from overlay id to entry.
///
/// Only live entries are stored; an entry is deleted when it reaches
/// [`Phase::Removed`].
///
/// # Example
///
/// ```ignore
/// let mut registry = OverlayRegistry::new();
///
/// registry.reduce(OverlayAction::Add {
///     overlay_id: "x".into(),
///     component_key: "k1".into(),
///     controller: "dialog",
/// })?;
/// registry.reduce(OverlayAction::Open {
///     overlay_id: "x".into(),
///     component_key: "k1".into(),
/// })?;
/// assert_eq!(registry.phase("x"), Some(Phase::Open));
/// ```
#[derive(Debug, Clone)]
pub struct OverlayRegistry<C> {
    entries: IndexMap<String, OverlayEntry<C>>,
}

impl<C> OverlayRegistry<C> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Apply one action and return the phase changes it caused.
    ///
    /// An empty list means the action was a no-op. The only failure is a
    /// duplicate `Add`, which leaves the registry untouched.
    pub fn reduce(&mut self, action: OverlayAction<C>) -> Result<Vec<PhaseChange>, OverlayError> {
        match action {
            OverlayAction::Add {
                overlay_id,
                component_key,
                controller,
            } => {
                if self.entries.contains_key(&overlay_id) {
                    return Err(OverlayError::duplicate(overlay_id));
                }
                let change = PhaseChange::new(&overlay_id, None, Phase::Mounted);
                self.entries.insert(
                    overlay_id.clone(),
                    OverlayEntry::new(overlay_id, component_key, controller),
                );
                Ok(vec![change])
            }
            OverlayAction::Open {
                overlay_id,
                component_key,
            } => Ok(self
                .entries
                .get_mut(&overlay_id)
                .filter(|e| e.phase == Phase::Mounted && e.component_key == component_key)
                .map(|e| transition(e, Phase::Open))
                .into_iter()
                .collect()),
            OverlayAction::Close {
                overlay_id,
                component_key,
            } => Ok(self
                .entries
                .get_mut(&overlay_id)
                .filter(|e| e.phase.is_active() && e.is_mount(component_key.as_deref()))
                .map(|e| transition(e, Phase::Closed))
                .into_iter()
                .collect()),
            OverlayAction::Remove {
                overlay_id,
                component_key,
            } => {
                let keyed = self
                    .entries
                    .get(&overlay_id)
                    .is_some_and(|e| e.is_mount(component_key.as_deref()));
                if !keyed {
                    return Ok(Vec::new());
                }
                Ok(self
                    .entries
                    .shift_remove(&overlay_id)
                    .map(|e| PhaseChange::new(&e.overlay_id, Some(e.phase), Phase::Removed))
                    .into_iter()
                    .collect())
            }
            OverlayAction::CloseAll => Ok(self
                .entries
                .values_mut()
                .filter(|e| e.phase.is_active())
                .map(|e| transition(e, Phase::Closed))
                .collect()),
            OverlayAction::RemoveAll => Ok(self
                .entries
                .drain(..)
                .map(|(_, e)| PhaseChange::new(&e.overlay_id, Some(e.phase), Phase::Removed))
                .collect()),
        }
    }

    pub fn get(&self, overlay_id: &str) -> Option<&OverlayEntry<C>> {
        self.entries.get(overlay_id)
    }

    /// Phase of a live entry; `None` once removed or never added.
    pub fn phase(&self, overlay_id: &str) -> Option<Phase> {
        self.entries.get(overlay_id).map(|e| e.phase)
    }

    pub fn contains(&self, overlay_id: &str) -> bool {
        self.entries.contains_key(overlay_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in stacking order.
    pub fn iter(&self) -> impl Iterator<Item = &OverlayEntry<C>> {
        self.entries.values()
    }

    /// Topmost overlay that has not been dismissed.
    pub fn current(&self) -> Option<&str> {
        self.entries
            .values()
            .rev()
            .find(|e| e.phase.is_active())
            .map(|e| e.overlay_id.as_str())
    }

    pub fn snapshot(&self) -> Vec<OverlaySnapshot> {
        self.entries.values().map(OverlayEntry::snapshot).collect()
    }

    /// Mounted entries whose open has not been scheduled yet, marked as
    /// scheduled. Each entry is returned at most once.
    pub(crate) fn take_unscheduled_mounts(&mut self) -> Vec<(String, String)> {
        self.entries
            .values_mut()
            .filter(|e| e.phase == Phase::Mounted && !e.open_scheduled)
            .map(|e| {
                e.open_scheduled = true;
                (e.overlay_id.clone(), e.component_key.clone())
            })
            .collect()
    }
}

impl<C> Default for OverlayRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn transition<C>(entry: &mut OverlayEntry<C>, to: Phase) -> PhaseChange {
    let from = entry.phase;
    entry.phase = to;
    PhaseChange::new(&entry.overlay_id, Some(from), to)
}
