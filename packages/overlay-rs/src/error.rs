//! Structured error types and the injectable error policy.
//!
//! `OverlayError` is the lifecycle-violation taxonomy. It is raised where the
//! violation happens (inside the host's `open` handler) and travels back to
//! the caller through the synchronous bus.
//!
//! `Rejection` is not a lifecycle violation. It is the failure side of an
//! `open_async` result.
//!
//! # Routing
//!
//! Whether a violation reaches the caller is decided by an [`ErrorPolicy`]
//! injected into the host:
//!
//! ```ignore
//! use overlay::{ErrorMode, OverlayHost};
//!
//! // development / test: fail loudly
//! let host = OverlayHost::<String>::builder("app")
//!     .error_policy(ErrorMode::Strict.policy())
//!     .mount()?;
//!
//! // production: log and keep the UI alive
//! let host = OverlayHost::<String>::builder("app")
//!     .error_policy(ErrorMode::Logging.policy())
//!     .mount()?;
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

// =============================================================================
// Lifecycle Violations
// =============================================================================

/// Lifecycle violation raised by the overlay core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// Generic internal invariant violation.
    #[error("overlay internal error: {message}")]
    Internal { message: String },

    /// `open` was called with an id that already maps to a live entry.
    #[error(
        "you can't open multiple overlays with the same overlay_id ({overlay_id}); please set a different id"
    )]
    DuplicateOverlay { overlay_id: String },
}

impl OverlayError {
    /// Create a base failure with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a duplicate-identity failure for `overlay_id`.
    pub fn duplicate(overlay_id: impl Into<String>) -> Self {
        Self::DuplicateOverlay {
            overlay_id: overlay_id.into(),
        }
    }

    /// The offending overlay id, for duplicate-identity failures.
    pub fn overlay_id(&self) -> Option<&str> {
        match self {
            Self::DuplicateOverlay { overlay_id } => Some(overlay_id),
            Self::Internal { .. } => None,
        }
    }

    /// Returns true for duplicate-identity failures.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateOverlay { .. })
    }
}

// =============================================================================
// Async Result Failures
// =============================================================================

/// Failure outcome of an `open_async` result.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The controller called `reject(reason)`.
    #[error("overlay rejected: {0}")]
    Rejected(anyhow::Error),

    /// Every handle able to settle the result was dropped first.
    ///
    /// Happens when the overlay is unmounted without `close`/`reject`, or
    /// when its open request was refused.
    #[error("overlay {overlay_id} was dismissed without a result")]
    Dismissed { overlay_id: String },
}

impl Rejection {
    /// The reason passed to `reject`, if this is a rejection.
    pub fn reason(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Rejected(reason) => Some(reason),
            Self::Dismissed { .. } => None,
        }
    }
}

// =============================================================================
// Error Policy
// =============================================================================

/// Strategy deciding what happens to a lifecycle violation.
///
/// Returning `Err` propagates the violation to the caller of the facade.
/// Returning `Ok(())` turns the offending command into a no-op.
pub trait ErrorPolicy: Send + Sync + 'static {
    fn handle(&self, error: OverlayError) -> Result<(), OverlayError>;
}

/// Raises every violation to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictErrorPolicy;

impl ErrorPolicy for StrictErrorPolicy {
    fn handle(&self, error: OverlayError) -> Result<(), OverlayError> {
        Err(error)
    }
}

/// Logs every violation and lets execution continue.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorPolicy;

impl ErrorPolicy for LoggingErrorPolicy {
    fn handle(&self, error: OverlayError) -> Result<(), OverlayError> {
        error!(
            overlay_id = error.overlay_id().unwrap_or_default(),
            "[overlay] {}", error
        );
        Ok(())
    }
}

/// Configured choice between the built-in policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Development and test: violations reach the caller.
    #[default]
    Strict,
    /// Production: violations are logged, commands become no-ops.
    Logging,
}

impl ErrorMode {
    /// Pick the mode for a deployment environment name.
    ///
    /// Only `production` selects [`ErrorMode::Logging`].
    pub fn for_environment(environment: &str) -> Self {
        if environment.trim().eq_ignore_ascii_case("production") {
            Self::Logging
        } else {
            Self::Strict
        }
    }

    /// Build the policy for this mode.
    pub fn policy(self) -> Arc<dyn ErrorPolicy> {
        match self {
            Self::Strict => Arc::new(StrictErrorPolicy),
            Self::Logging => Arc::new(LoggingErrorPolicy),
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMode::Strict => write!(f, "strict"),
            ErrorMode::Logging => write!(f, "logging"),
        }
    }
}

impl FromStr for ErrorMode {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "development" | "test" => Ok(Self::Strict),
            "logging" | "production" => Ok(Self::Logging),
            other => Err(OverlayError::internal(format!(
                "unknown error mode `{other}` (expected `strict` or `logging`)"
            ))),
        }
    }
}
