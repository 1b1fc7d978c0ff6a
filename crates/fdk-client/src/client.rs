// SPDX-License-Identifier: MIT OR Apache-2.0
//! The public client.

use crate::options::ClientOptions;
use chrono::Utc;
use fdk_core::{
    ClientLogger, EvaluationDetails, Hooks, ParsedConfig, Snapshot, UserHandle, Value,
};
use fdk_error::FlagError;
use fdk_fetch::{ConfigFetcher, FetcherOptions, RefreshOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Feature-flag client.
///
/// Cheap to clone; all clones share the coordinator, logger, and
/// hooks. Dropping the last clone closes the client.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    fetcher: ConfigFetcher,
    logger: ClientLogger,
    default_user: Option<UserHandle>,
    closed: AtomicBool,
}

impl Client {
    /// Build a client for `sdk_key`.
    ///
    /// Auto-poll mode spawns its poll task here, so construction must
    /// happen inside a Tokio runtime. An empty SDK key is accepted and
    /// reported at fetch time.
    pub fn new(sdk_key: impl Into<String>, options: ClientOptions) -> Result<Self, FlagError> {
        let logger = ClientLogger::new(options.log_level, Arc::clone(&options.hooks));
        let fetcher = ConfigFetcher::new(FetcherOptions {
            sdk_key: sdk_key.into(),
            mode: options.polling_mode,
            base_url: options.base_url,
            data_governance: options.data_governance,
            http_timeout: options.http_timeout,
            transport: options.transport,
            cache: options.cache,
            overrides: options.overrides,
            logger: logger.clone(),
            offline: options.offline,
            no_wait_for_refresh: options.no_wait_for_refresh,
        })?;
        Ok(Self {
            shared: Arc::new(ClientShared {
                fetcher,
                logger,
                default_user: options.default_user,
                closed: AtomicBool::new(false),
            }),
        })
    }

    // -- typed getters ---------------------------------------------------

    /// Boolean flag value for the supplied (or default) user.
    pub async fn bool_value(&self, key: &str, default: bool, user: Option<UserHandle>) -> bool {
        self.snapshot(user).await.bool_value(key, default)
    }

    /// Boolean flag value plus evaluation details.
    pub async fn bool_value_details(
        &self,
        key: &str,
        default: bool,
        user: Option<UserHandle>,
    ) -> (bool, EvaluationDetails) {
        self.snapshot(user).await.bool_value_details(key, default)
    }

    /// Integer flag value for the supplied (or default) user.
    pub async fn int_value(&self, key: &str, default: i64, user: Option<UserHandle>) -> i64 {
        self.snapshot(user).await.int_value(key, default)
    }

    /// Integer flag value plus evaluation details.
    pub async fn int_value_details(
        &self,
        key: &str,
        default: i64,
        user: Option<UserHandle>,
    ) -> (i64, EvaluationDetails) {
        self.snapshot(user).await.int_value_details(key, default)
    }

    /// Float flag value for the supplied (or default) user.
    pub async fn float_value(&self, key: &str, default: f64, user: Option<UserHandle>) -> f64 {
        self.snapshot(user).await.float_value(key, default)
    }

    /// Float flag value plus evaluation details.
    pub async fn float_value_details(
        &self,
        key: &str,
        default: f64,
        user: Option<UserHandle>,
    ) -> (f64, EvaluationDetails) {
        self.snapshot(user).await.float_value_details(key, default)
    }

    /// String flag value for the supplied (or default) user.
    pub async fn string_value(
        &self,
        key: &str,
        default: &str,
        user: Option<UserHandle>,
    ) -> String {
        self.snapshot(user).await.string_value(key, default)
    }

    /// String flag value plus evaluation details.
    pub async fn string_value_details(
        &self,
        key: &str,
        default: &str,
        user: Option<UserHandle>,
    ) -> (String, EvaluationDetails) {
        self.snapshot(user).await.string_value_details(key, default)
    }

    // -- enumeration & lookups -------------------------------------------

    /// Variation identifier `key` evaluates to, or "" when unknown.
    pub async fn variation_id(&self, key: &str, user: Option<UserHandle>) -> String {
        self.snapshot(user).await.variation_id(key)
    }

    /// All flag keys of the current configuration.
    pub async fn all_keys(&self) -> Vec<String> {
        self.snapshot(None).await.all_keys()
    }

    /// Evaluate every key for the supplied (or default) user.
    pub async fn all_values(&self, user: Option<UserHandle>) -> HashMap<String, Value> {
        self.snapshot(user).await.all_values()
    }

    /// Full evaluation details for every key.
    pub async fn all_value_details(&self, user: Option<UserHandle>) -> Vec<EvaluationDetails> {
        self.snapshot(user).await.all_details()
    }

    /// Reverse lookup: the key and value behind a variation identifier.
    pub async fn key_value_for_variation_id(
        &self,
        variation_id: &str,
    ) -> Option<(String, Value)> {
        self.snapshot(None).await.key_value_for_variation_id(variation_id)
    }

    /// An immutable snapshot of the current configuration bound to the
    /// supplied (or default) user.
    pub async fn snapshot(&self, user: Option<UserHandle>) -> Snapshot {
        let config = self
            .shared
            .fetcher
            .resolve_config()
            .await
            .unwrap_or_else(|| ParsedConfig::empty(Utc::now()));
        let user = user.or_else(|| self.shared.default_user.clone());
        Snapshot::new(config, user, self.shared.logger.clone())
    }

    // -- lifecycle -------------------------------------------------------

    /// Fetch the latest configuration now, regardless of polling mode.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.shared.fetcher.refresh().await
    }

    /// Resolve once the first fetch attempt has finished.
    pub async fn wait_for_ready(&self) {
        self.shared.fetcher.wait_for_ready().await;
    }

    /// Stop fetching; values keep coming from memory and the cache.
    pub fn set_offline(&self) {
        self.shared.fetcher.set_offline(true);
    }

    /// Re-enable fetching after [`Client::set_offline`].
    pub fn set_online(&self) {
        self.shared.fetcher.set_offline(false);
    }

    /// Whether the client is currently offline.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.shared.fetcher.is_offline()
    }

    /// The hook registry of this client.
    #[must_use]
    pub fn hooks(&self) -> &Arc<Hooks> {
        self.shared.logger.hooks()
    }

    /// Stop background work. Idempotent; dropping the last clone also
    /// closes.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.fetcher.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("fetcher", &self.shared.fetcher)
            .finish_non_exhaustive()
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        self.fetcher.close();
    }
}
