// SPDX-License-Identifier: MIT OR Apache-2.0
//! The refresh coordinator.
//!
//! Owns the current-configuration slot, the base URL, and the
//! single-flight refresh discipline. At most one fetch task runs at a
//! time; every concurrent waiter joins its completion channel. The
//! auto-poll task is the only other background work, and both stop
//! cooperatively when the owning client closes.

use crate::cache::{ConfigCache, cache_key_for};
use crate::http::{FetchSuccess, HttpConfigClient};
use chrono::{DateTime, Utc};
use fdk_core::{ClientLogger, FlagOverrides, OverrideBehavior, ParsedConfig};
use fdk_error::{ErrorKind, FlagError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Default CDN base URL for globally distributed configs.
pub const GLOBAL_BASE_URL: &str = "https://cdn-global.configcat.com";

/// Default CDN base URL for EU-resident configs.
pub const EU_BASE_URL: &str = "https://cdn-eu.configcat.com";

/// Where the configuration data is allowed to live.
///
/// Must match the data-governance setting of the configuration
/// dashboard; a caller-supplied base URL overrides either choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataGovernance {
    /// Serve from the global CDN network.
    #[default]
    Global,
    /// Serve from EU data centers only.
    EuOnly,
}

impl DataGovernance {
    fn base_url(self) -> &'static str {
        match self {
            Self::Global => GLOBAL_BASE_URL,
            Self::EuOnly => EU_BASE_URL,
        }
    }
}

// ---------------------------------------------------------------------------
// Polling modes
// ---------------------------------------------------------------------------

/// How the coordinator keeps the configuration fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingMode {
    /// A background task refreshes immediately and then periodically.
    AutoPoll {
        /// Time between refreshes.
        poll_interval: Duration,
    },
    /// Every read refreshes first when the config is older than the TTL.
    Lazy {
        /// Maximum age before a read triggers a refresh.
        cache_ttl: Duration,
        /// When set, reads kick the refresh off in the background and
        /// keep serving the stale configuration meanwhile.
        async_refresh: bool,
    },
    /// Refreshes happen only on explicit request.
    Manual,
}

impl PollingMode {
    /// Auto-poll with the given interval.
    #[must_use]
    pub fn auto_poll(poll_interval: Duration) -> Self {
        Self::AutoPoll { poll_interval }
    }

    /// Lazy refresh with the given TTL, blocking reads while stale.
    #[must_use]
    pub fn lazy(cache_ttl: Duration) -> Self {
        Self::Lazy {
            cache_ttl,
            async_refresh: false,
        }
    }

    /// Identifier used in the user-agent header.
    #[must_use]
    pub fn mode_id(&self) -> char {
        match self {
            Self::AutoPoll { .. } => 'a',
            Self::Lazy { .. } => 'l',
            Self::Manual => 'm',
        }
    }
}

impl Default for PollingMode {
    fn default() -> Self {
        Self::AutoPoll {
            poll_interval: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Everything the coordinator needs to operate.
pub struct FetcherOptions {
    /// SDK key identifying the configuration stream.
    pub sdk_key: String,
    /// Refresh discipline.
    pub mode: PollingMode,
    /// Caller-supplied base URL; overrides data governance.
    pub base_url: Option<String>,
    /// Data-governance selector for the default base URL.
    pub data_governance: DataGovernance,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Caller-supplied HTTP transport; built from `http_timeout`
    /// when absent.
    pub transport: Option<reqwest::Client>,
    /// Persistent cache, if any.
    pub cache: Option<Arc<dyn ConfigCache>>,
    /// Local override source, if any.
    pub overrides: Option<FlagOverrides>,
    /// Shared logger (also carries the hook registry).
    pub logger: ClientLogger,
    /// Start without network access.
    pub offline: bool,
    /// Auto-poll reads proceed without waiting for the first fetch.
    pub no_wait_for_refresh: bool,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            sdk_key: String::new(),
            mode: PollingMode::default(),
            base_url: None,
            data_governance: DataGovernance::default(),
            http_timeout: Duration::from_secs(30),
            transport: None,
            cache: None,
            overrides: None,
            logger: ClientLogger::disabled(),
            offline: false,
            no_wait_for_refresh: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Outcome of one refresh, shared among all waiters.
pub type RefreshOutcome = Result<(), Arc<FlagError>>;

struct FetchState {
    base_url: String,
    in_flight: Option<watch::Receiver<Option<RefreshOutcome>>>,
}

struct FetcherInner {
    mode: PollingMode,
    logger: ClientLogger,
    http: HttpConfigClient,
    cache: Option<Arc<dyn ConfigCache>>,
    cache_key: String,
    overrides: Option<FlagOverrides>,
    custom_base: bool,
    sdk_key_empty: bool,
    no_wait_for_refresh: bool,
    offline: AtomicBool,
    closed: AtomicBool,
    state: tokio::sync::Mutex<FetchState>,
    current: RwLock<Option<ParsedConfig>>,
    ready: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

/// Fetch/refresh coordinator.
///
/// Cheap to clone; all clones share the same state. Constructing an
/// auto-poll coordinator spawns its poll task and therefore requires a
/// running Tokio runtime.
#[derive(Clone)]
pub struct ConfigFetcher {
    inner: Arc<FetcherInner>,
}

impl ConfigFetcher {
    /// Build the coordinator and start background polling when the
    /// mode calls for it.
    pub fn new(options: FetcherOptions) -> Result<Self, FlagError> {
        let http_client = match options.transport {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(options.http_timeout)
                .build()
                .map_err(|e| {
                    FlagError::new(ErrorKind::HttpError, "failed to build the HTTP transport")
                        .with_source(e)
                })?,
        };

        let custom_base = options.base_url.is_some();
        let base_url = options
            .base_url
            .unwrap_or_else(|| options.data_governance.base_url().to_string());

        let user_agent = format!(
            "ConfigCat-Rust/{}-{}",
            options.mode.mode_id(),
            env!("CARGO_PKG_VERSION")
        );
        let http = HttpConfigClient::new(http_client, options.sdk_key.clone(), user_agent);

        let (ready, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(FetcherInner {
            mode: options.mode,
            logger: options.logger,
            http,
            cache: options.cache,
            cache_key: cache_key_for(&options.sdk_key),
            overrides: options.overrides,
            custom_base,
            sdk_key_empty: options.sdk_key.is_empty(),
            no_wait_for_refresh: options.no_wait_for_refresh,
            offline: AtomicBool::new(options.offline),
            closed: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(FetchState {
                base_url,
                in_flight: None,
            }),
            current: RwLock::new(None),
            ready,
            shutdown,
        });

        if let PollingMode::AutoPoll { poll_interval } = inner.mode {
            spawn_poller(&inner, poll_interval);
        }

        Ok(Self { inner })
    }

    /// The current configuration, if one has been acquired.
    #[must_use]
    pub fn current(&self) -> Option<ParsedConfig> {
        self.inner
            .current
            .read()
            .expect("config slot poisoned")
            .clone()
    }

    /// Resolve the configuration under the configured polling
    /// discipline (wait for the first fetch, refresh when stale, or
    /// just read).
    pub async fn resolve_config(&self) -> Option<ParsedConfig> {
        match self.inner.mode {
            PollingMode::AutoPoll { .. } => {
                if !self.inner.no_wait_for_refresh {
                    self.wait_for_ready().await;
                }
            }
            PollingMode::Lazy {
                cache_ttl,
                async_refresh,
            } => {
                let cutoff = cutoff_before(cache_ttl);
                let _ = FetcherInner::refresh_if_older(&self.inner, cutoff, !async_refresh).await;
            }
            PollingMode::Manual => {}
        }
        self.current()
    }

    /// Unconditionally refresh the configuration now.
    pub async fn refresh(&self) -> RefreshOutcome {
        FetcherInner::refresh_if_older(&self.inner, Utc::now(), true).await
    }

    /// Refresh unless the current configuration is at least as new as
    /// `cutoff`. With `wait` unset, the call returns after starting
    /// (or joining) the fetch.
    pub async fn refresh_if_older(&self, cutoff: DateTime<Utc>, wait: bool) -> RefreshOutcome {
        FetcherInner::refresh_if_older(&self.inner, cutoff, wait).await
    }

    /// Resolve once the first fetch attempt has finished (successfully
    /// or not). Returns immediately after close.
    pub async fn wait_for_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Toggle network access. Going offline keeps serving the current
    /// configuration and the cache.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Release);
    }

    /// Whether the coordinator is currently offline.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.inner.offline.load(Ordering::Acquire)
    }

    /// Stop background work. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        // Release anyone blocked on the first fetch.
        self.inner.ready.send_replace(true);
    }
}

impl std::fmt::Debug for ConfigFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigFetcher")
            .field("mode", &self.inner.mode)
            .field("offline", &self.is_offline())
            .finish_non_exhaustive()
    }
}

fn cutoff_before(age: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero())
}

fn spawn_poller(inner: &Arc<FetcherInner>, poll_interval: Duration) {
    let inner = Arc::clone(inner);
    let mut shutdown_rx = inner.shutdown.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let cutoff = cutoff_before(poll_interval);
                    let _ = FetcherInner::refresh_if_older(&inner, cutoff, true).await;
                }
            }
        }
    });
}

impl FetcherInner {
    /// Single-flight refresh entry point.
    async fn refresh_if_older(
        this: &Arc<Self>,
        cutoff: DateTime<Utc>,
        wait: bool,
    ) -> RefreshOutcome {
        if this.closed.load(Ordering::SeqCst) {
            return Err(Arc::new(FlagError::new(
                ErrorKind::ClientClosed,
                "the client was closed",
            )));
        }

        let mut rx = {
            let mut state = this.state.lock().await;
            {
                let current = this.current.read().expect("config slot poisoned");
                if let Some(config) = current.as_ref()
                    && config.fetch_time() >= cutoff
                {
                    return Ok(());
                }
            }
            match &state.in_flight {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(rx.clone());
                    let task = Arc::clone(this);
                    tokio::spawn(async move { task.run_fetch(tx).await });
                    rx
                }
            }
        };

        if !wait {
            return Ok(());
        }

        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Err(Arc::new(FlagError::new(
                ErrorKind::ClientClosed,
                "refresh interrupted by close",
            ))),
        }
    }

    /// The single in-flight fetch task.
    async fn run_fetch(self: Arc<Self>, tx: watch::Sender<Option<RefreshOutcome>>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let result = if *shutdown_rx.borrow() {
            Err(FlagError::new(
                ErrorKind::ClientClosed,
                "client closed during refresh",
            ))
        } else {
            tokio::select! {
                res = self.fetch_once() => res,
                _ = shutdown_rx.changed() => Err(FlagError::new(
                    ErrorKind::ClientClosed,
                    "client closed during refresh",
                )),
            }
        };

        let outcome = match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.logger.error(&err);
                Err(Arc::new(err))
            }
        };

        // The first fetch is done whether it worked or not.
        self.ready.send_replace(true);
        {
            let mut state = self.state.lock().await;
            state.in_flight = None;
        }
        tx.send_replace(Some(outcome));
    }

    async fn fetch_once(&self) -> Result<(), FlagError> {
        // Local-only overrides are the whole configuration; no HTTP.
        if let Some(overrides) = &self.overrides
            && overrides.behavior() == OverrideBehavior::LocalOnly
        {
            let config = ParsedConfig::from_overrides(overrides, Utc::now())?;
            self.install(config, false).await;
            return Ok(());
        }

        if self.sdk_key_empty {
            return Err(FlagError::new(ErrorKind::EmptySdkKey, "the SDK key is empty"));
        }

        if self.offline.load(Ordering::Acquire) {
            return self.fetch_offline().await;
        }

        let (base_url, etag) = {
            let state = self.state.lock().await;
            let etag = self
                .current
                .read()
                .expect("config slot poisoned")
                .as_ref()
                .and_then(|c| c.etag().map(str::to_string));
            (state.base_url.clone(), etag)
        };

        match self
            .http
            .fetch(
                base_url,
                etag.as_deref(),
                self.custom_base,
                self.overrides.as_ref(),
                Utc::now(),
                &self.logger,
            )
            .await
        {
            Ok(FetchSuccess { config, base_url }) => {
                {
                    let mut state = self.state.lock().await;
                    state.base_url = base_url;
                }
                match config {
                    None => {
                        // 304: keep the body, bump the fetch time.
                        let mut current = self.current.write().expect("config slot poisoned");
                        if let Some(prev) = current.take() {
                            *current = Some(prev.with_fetch_time(Utc::now()));
                        }
                    }
                    Some(config) => self.install(config, true).await,
                }
                Ok(())
            }
            Err(err) => {
                self.logger
                    .warn(&format!("configuration fetch failed ({err}); trying the cache"));
                if let Some(cached) = self.read_cached_config().await {
                    if self.adoptable(&cached) {
                        self.install(cached, false).await;
                    }
                }
                // The refresh still failed; the last known (or cached)
                // configuration keeps serving values.
                Err(err)
            }
        }
    }

    async fn fetch_offline(&self) -> Result<(), FlagError> {
        let no_cache = || {
            FlagError::new(
                ErrorKind::OfflineNoCache,
                "the client is offline and the configuration cache is empty",
            )
        };
        if self.cache.is_none() {
            return Err(no_cache());
        }
        match self.read_cached_config().await {
            Some(config) => {
                if self.adoptable(&config) {
                    self.install(config, false).await;
                }
                Ok(())
            }
            None => Err(no_cache()),
        }
    }

    /// Read and parse the cached body. Cache problems are logged only.
    async fn read_cached_config(&self) -> Option<ParsedConfig> {
        let cache = self.cache.as_ref()?;
        let bytes = match cache.read(&self.cache_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.logger.error(&FlagError::new(
                    ErrorKind::CacheRead,
                    format!("failed to read the configuration cache: {e}"),
                ));
                return None;
            }
        };
        if bytes.is_empty() {
            return None;
        }
        // A cache-loaded configuration carries the epoch as its fetch
        // time: it never displaces one fetched live in this process.
        match ParsedConfig::parse(
            &bytes,
            None,
            DateTime::UNIX_EPOCH,
            self.overrides.as_ref(),
        ) {
            Ok(config) => Some(config),
            Err(e) => {
                self.logger.error(&e);
                None
            }
        }
    }

    fn adoptable(&self, candidate: &ParsedConfig) -> bool {
        let current = self.current.read().expect("config slot poisoned");
        match current.as_ref() {
            None => true,
            Some(prev) => candidate.fetch_time() >= prev.fetch_time(),
        }
    }

    /// Swap `config` into the current slot. Content-equal bodies only
    /// advance the fetch time, keeping compiled evaluators warm.
    async fn install(&self, config: ParsedConfig, write_through: bool) {
        let (changed, body) = {
            let mut current = self.current.write().expect("config slot poisoned");
            match current.as_ref() {
                Some(prev) if prev.content_equals(&config) => {
                    let newest = config.fetch_time().max(prev.fetch_time());
                    let refreshed = prev.with_fetch_time(newest);
                    *current = Some(refreshed);
                    (false, Vec::new())
                }
                _ => {
                    let body = config.body().to_vec();
                    *current = Some(config);
                    (true, body)
                }
            }
        };

        if !changed {
            return;
        }
        if write_through && let Some(cache) = &self.cache {
            if let Err(e) = cache.write(&self.cache_key, &body).await {
                self.logger.error(&FlagError::new(
                    ErrorKind::CacheWrite,
                    format!("failed to write the configuration cache: {e}"),
                ));
            }
        }
        self.logger.hooks().notify_config_changed();
    }
}
