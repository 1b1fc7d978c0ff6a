// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client configuration.

use fdk_core::{FlagOverrides, Hooks, LogLevel, UserHandle};
use fdk_fetch::{ConfigCache, DataGovernance, PollingMode};
use std::sync::Arc;
use std::time::Duration;

/// Everything configurable on a [`crate::Client`].
///
/// Start from [`ClientOptions::default`] and override what you need:
///
/// ```
/// use fdk_client::ClientOptions;
/// use fdk_fetch::PollingMode;
/// use std::time::Duration;
///
/// let options = ClientOptions {
///     polling_mode: PollingMode::lazy(Duration::from_secs(120)),
///     ..ClientOptions::default()
/// };
/// # let _ = options;
/// ```
pub struct ClientOptions {
    /// Refresh discipline. Defaults to auto-poll every 60 seconds.
    pub polling_mode: PollingMode,
    /// Caller-supplied CDN base URL; overrides `data_governance`.
    pub base_url: Option<String>,
    /// Data-governance selector for the default base URL.
    pub data_governance: DataGovernance,
    /// Per-request HTTP timeout. Defaults to 30 seconds.
    pub http_timeout: Duration,
    /// Caller-supplied HTTP transport.
    pub transport: Option<reqwest::Client>,
    /// Persistent configuration cache.
    pub cache: Option<Arc<dyn ConfigCache>>,
    /// Local flag overrides.
    pub overrides: Option<FlagOverrides>,
    /// Minimum severity emitted by the SDK logger.
    pub log_level: LogLevel,
    /// User applied when a getter receives none.
    pub default_user: Option<UserHandle>,
    /// Start the client without network access.
    pub offline: bool,
    /// Auto-poll getters proceed without waiting for the first fetch.
    pub no_wait_for_refresh: bool,
    /// Lifecycle and evaluation callbacks.
    pub hooks: Arc<Hooks>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            polling_mode: PollingMode::default(),
            base_url: None,
            data_governance: DataGovernance::default(),
            http_timeout: Duration::from_secs(30),
            transport: None,
            cache: None,
            overrides: None,
            log_level: LogLevel::default(),
            default_user: None,
            offline: false,
            no_wait_for_refresh: false,
            hooks: Arc::new(Hooks::new()),
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("polling_mode", &self.polling_mode)
            .field("base_url", &self.base_url)
            .field("data_governance", &self.data_governance)
            .field("http_timeout", &self.http_timeout)
            .field("log_level", &self.log_level)
            .field("offline", &self.offline)
            .field("no_wait_for_refresh", &self.no_wait_for_refresh)
            .finish_non_exhaustive()
    }
}
