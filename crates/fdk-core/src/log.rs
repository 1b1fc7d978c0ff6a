// SPDX-License-Identifier: MIT OR Apache-2.0
//! Leveled client logger.
//!
//! All SDK diagnostics flow through [`ClientLogger`], which forwards to
//! `tracing` and feeds every structured error into the error hook
//! exactly once per emission. The configured [`LogLevel`] also gates
//! snapshot memoization: with info logging enabled every evaluation is
//! re-run so each one is logged.

use crate::hooks::Hooks;
use fdk_error::FlagError;
use std::sync::Arc;

/// Minimum severity that gets emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Everything, including per-rule evaluation traces.
    Debug,
    /// Evaluation results and lifecycle events.
    Info,
    /// Problems the SDK recovered from.
    #[default]
    Warn,
    /// Structured errors only.
    Error,
    /// Nothing at all.
    Off,
}

/// Logger shared by the client, coordinator, and snapshots.
#[derive(Clone)]
pub struct ClientLogger {
    level: LogLevel,
    hooks: Arc<Hooks>,
}

impl ClientLogger {
    /// Create a logger with the given threshold and hook registry.
    #[must_use]
    pub fn new(level: LogLevel, hooks: Arc<Hooks>) -> Self {
        Self { level, hooks }
    }

    /// A logger that emits nothing (still fires error hooks).
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(LogLevel::Off, Arc::new(Hooks::new()))
    }

    /// Whether messages at `level` are emitted.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level && level != LogLevel::Off
    }

    /// The hook registry this logger feeds.
    #[must_use]
    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.hooks
    }

    /// Emit a debug-level message.
    pub fn debug(&self, msg: &str) {
        if self.enabled(LogLevel::Debug) {
            tracing::debug!(target: "flagdeck", "{msg}");
        }
    }

    /// Emit an info-level message.
    pub fn info(&self, msg: &str) {
        if self.enabled(LogLevel::Info) {
            tracing::info!(target: "flagdeck", "{msg}");
        }
    }

    /// Emit a warning.
    pub fn warn(&self, msg: &str) {
        if self.enabled(LogLevel::Warn) {
            tracing::warn!(target: "flagdeck", "{msg}");
        }
    }

    /// Emit a structured error and fire the error hook.
    ///
    /// The hook fires regardless of the configured level; the level
    /// only gates the log line.
    pub fn error(&self, err: &FlagError) {
        if self.enabled(LogLevel::Error) {
            tracing::error!(target: "flagdeck", code = err.kind.as_str(), "{err}");
        }
        self.hooks.notify_error(err);
    }
}

impl std::fmt::Debug for ClientLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientLogger")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}
