use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::error::ErrorMode;
use crate::frame::DEFAULT_FRAME_INTERVAL;

/// Default overlay scope.
pub const DEFAULT_SCOPE: &str = "app";

/// Host configuration read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    pub scope: String,
    pub error_mode: ErrorMode,
    pub frame_interval: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            error_mode: ErrorMode::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl OverlayConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads `OVERLAY_SCOPE`, `OVERLAY_ENV` and `OVERLAY_FRAME_MS`. A `.env`
    /// file is loaded first if present.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        let _ = dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let scope = lookup("OVERLAY_SCOPE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.scope);

        let error_mode = lookup("OVERLAY_ENV")
            .map(|env| ErrorMode::for_environment(&env))
            .unwrap_or(defaults.error_mode);

        let frame_interval = match lookup("OVERLAY_FRAME_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse::<u64>()
                    .context("OVERLAY_FRAME_MS must be a whole number of milliseconds")?,
            ),
            None => defaults.frame_interval,
        };

        Ok(Self {
            scope,
            error_mode,
            frame_interval,
        })
    }
}
