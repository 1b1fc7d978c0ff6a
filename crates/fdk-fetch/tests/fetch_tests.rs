// SPDX-License-Identifier: MIT OR Apache-2.0
//! Coordinator scenarios against a mock CDN.

use chrono::Utc;
use fdk_core::{OverrideBehavior, Value};
use fdk_error::ErrorKind;
use fdk_fetch::{
    CacheError, ConfigCache, ConfigFetcher, FetcherOptions, InMemoryConfigCache, PollingMode,
    cache_key_for,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SDK_KEY: &str = "test-sdk-key";

fn config_path() -> String {
    format!("/configuration-files/{SDK_KEY}/config_v5.json")
}

fn manual_options(base_url: &str) -> FetcherOptions {
    FetcherOptions {
        sdk_key: SDK_KEY.to_string(),
        mode: PollingMode::Manual,
        base_url: Some(base_url.to_string()),
        http_timeout: Duration::from_secs(5),
        ..FetcherOptions::default()
    }
}

fn json_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/json")
}

async fn mount_config(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(body))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Basic fetching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn basic_fetch_parses_the_served_body() {
    let server = MockServer::start().await;
    let body = r#"{"f":{"key":{"v":"value","t":1,"p":[],"r":[]}}}"#;
    mount_config(&server, body).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.refresh().await.unwrap();

    let config = fetcher.current().unwrap();
    assert_eq!(config.body(), body.as_bytes());
    assert_eq!(config.entry("key").unwrap().value, Value::String("value".into()));
}

#[tokio::test]
async fn manual_mode_does_not_fetch_on_read() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    assert!(fetcher.resolve_config().await.is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn http_404_reports_invalid_sdk_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::SdkKeyInvalid);
}

#[tokio::test]
async fn http_5xx_reports_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::HttpError);
}

#[tokio::test]
async fn malformed_body_reports_malformed_config() {
    let server = MockServer::start().await;
    mount_config(&server, "{this is not json").await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedConfig);
}

#[tokio::test]
async fn empty_sdk_key_is_reported_at_fetch_time() {
    let server = MockServer::start().await;
    let fetcher = ConfigFetcher::new(FetcherOptions {
        sdk_key: String::new(),
        mode: PollingMode::Manual,
        base_url: Some(server.uri()),
        ..FetcherOptions::default()
    })
    .unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::EmptySdkKey);
}

#[tokio::test]
async fn user_agent_header_carries_mode_and_version() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.refresh().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let ua = requests[0]
        .headers
        .get("X-ConfigCat-UserAgent")
        .expect("user agent header missing")
        .to_str()
        .unwrap()
        .to_string();
    assert!(ua.starts_with("ConfigCat-Rust/m-"), "{ua}");
}

// ---------------------------------------------------------------------------
// Conditional GET
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_modified_retains_the_previous_body() {
    let server = MockServer::start().await;
    let body = r#"{"f":{"key":{"v":"value","t":1}}}"#;

    // Revalidations answer 304; the initial fetch serves one body.
    Mock::given(method("GET"))
        .and(path(config_path()))
        .and(header("If-None-Match", "\"etag-1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(body).insert_header("Etag", "\"etag-1\""))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.refresh().await.unwrap();
    let first = fetcher.current().unwrap();
    assert_eq!(first.etag(), Some("\"etag-1\""));

    fetcher.refresh().await.unwrap();
    let second = fetcher.current().unwrap();
    assert_eq!(second.body(), body.as_bytes());
    assert!(second.fetch_time() >= first.fetch_time());

    // Exactly one body-bearing response in the transport log.
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Redirects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn force_redirect_refetches_from_the_new_base() {
    let server_b = MockServer::start().await;
    mount_config(&server_b, r#"{"f":{"k":{"v":"vB","t":1}}}"#).await;

    let server_a = MockServer::start().await;
    let redirect = format!(r#"{{"p":{{"u":"{}","r":2}}}}"#, server_b.uri());
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(&redirect))
        .expect(1)
        .mount(&server_a)
        .await;

    let fetcher = ConfigFetcher::new(manual_options(&server_a.uri())).unwrap();
    fetcher.refresh().await.unwrap();

    let config = fetcher.current().unwrap();
    assert_eq!(config.entry("k").unwrap().value, Value::String("vB".into()));

    // The new base URL is persisted: a second refresh hits only B.
    fetcher.refresh().await.unwrap();
    assert_eq!(server_a.received_requests().await.unwrap().len(), 1);
    assert_eq!(server_b.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn should_redirect_away_from_custom_base_is_refused() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"p":{"u":"https://other.example.com","r":1}}"#).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RefuseRedirectCustomUrl);
    // The config is not usable; nothing was stored.
    assert!(fetcher.current().is_none());
}

#[tokio::test]
async fn redirect_ping_pong_stops_after_three_hops() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;

    let to_b = format!(r#"{{"p":{{"u":"{}","r":2}}}}"#, server_b.uri());
    let to_a = format!(r#"{{"p":{{"u":"{}","r":2}}}}"#, server_a.uri());
    mount_config(&server_a, &to_b).await;
    mount_config(&server_b, &to_a).await;

    let fetcher = ConfigFetcher::new(manual_options(&server_a.uri())).unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RedirectLoop);

    // No chain of preferences causes more than three GETs per refresh.
    let a = server_a.received_requests().await.unwrap().len();
    let b = server_b.received_requests().await.unwrap().len();
    assert_eq!(a + b, 3);
}

#[tokio::test]
async fn no_redirect_with_custom_base_stays_on_it() {
    let server = MockServer::start().await;
    let body = r#"{"f":{"k":{"v":"here","t":1}},"p":{"u":"https://preferred.example.com","r":0}}"#;
    mount_config(&server, body).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.refresh().await.unwrap();
    assert_eq!(
        fetcher.current().unwrap().entry("k").unwrap().value,
        Value::String("here".into())
    );

    // The caller pinned the base URL; refreshes keep using it.
    fetcher.refresh().await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Cache fallback
// ---------------------------------------------------------------------------

/// Cache whose reads and writes always fail.
#[derive(Debug, Default)]
struct BrokenCache;

#[async_trait::async_trait]
impl ConfigCache for BrokenCache {
    async fn read(&self, _key: &str) -> Result<Vec<u8>, CacheError> {
        Err("cache backend unavailable".into())
    }

    async fn write(&self, _key: &str, _value: &[u8]) -> Result<(), CacheError> {
        Err("cache backend unavailable".into())
    }
}

#[tokio::test]
async fn successful_fetch_writes_through_the_cache() {
    let server = MockServer::start().await;
    let body = r#"{"f":{"k":{"v":1,"t":2,"p":[],"r":[]}}}"#;
    mount_config(&server, body).await;

    let cache = Arc::new(InMemoryConfigCache::new());
    let fetcher = ConfigFetcher::new(FetcherOptions {
        cache: Some(cache.clone()),
        ..manual_options(&server.uri())
    })
    .unwrap();
    fetcher.refresh().await.unwrap();

    let cached = cache.read(&cache_key_for(SDK_KEY)).await.unwrap();
    assert_eq!(cached, body.as_bytes());
}

#[tokio::test]
async fn http_failure_falls_back_to_the_cache() {
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;

    let cache = Arc::new(InMemoryConfigCache::new());
    cache
        .write(
            &cache_key_for(SDK_KEY),
            br#"{"f":{"k":{"v":1,"t":2,"p":[],"r":[]}}}"#,
        )
        .await
        .unwrap();

    let fetcher = ConfigFetcher::new(FetcherOptions {
        cache: Some(cache),
        ..manual_options(&failing.uri())
    })
    .unwrap();

    // The refresh itself fails, but the cached config is served.
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::HttpError);
    let config = fetcher.current().unwrap();
    assert_eq!(config.entry("k").unwrap().value, Value::Int(1));
}

#[tokio::test]
async fn memory_config_survives_broken_cache_and_server() {
    let server = MockServer::start().await;
    let body = r#"{"f":{"k":{"v":1,"t":2,"p":[],"r":[]}}}"#;
    // One good response, then the server degrades to 500.
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(body))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        cache: Some(Arc::new(BrokenCache)),
        ..manual_options(&server.uri())
    })
    .unwrap();

    // First refresh succeeds (cache write failure is only logged).
    fetcher.refresh().await.unwrap();
    // Second refresh fails and the cache read fails too; the in-memory
    // config keeps serving.
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::HttpError);
    assert_eq!(fetcher.current().unwrap().entry("k").unwrap().value, Value::Int(1));
}

#[tokio::test]
async fn cached_config_never_displaces_a_live_one() {
    let server = MockServer::start().await;
    let live = r#"{"f":{"k":{"v":"live","t":1}}}"#;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(live))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cache = Arc::new(InMemoryConfigCache::new());
    cache
        .write(&cache_key_for(SDK_KEY), br#"{"f":{"k":{"v":"stale","t":1}}}"#)
        .await
        .unwrap();

    let fetcher = ConfigFetcher::new(FetcherOptions {
        cache: Some(cache),
        ..manual_options(&server.uri())
    })
    .unwrap();

    fetcher.refresh().await.unwrap();
    let _ = fetcher.refresh().await.unwrap_err();
    // The epoch-stamped cached config is older than the live fetch.
    assert_eq!(
        fetcher.current().unwrap().entry("k").unwrap().value,
        Value::String("live".into())
    );
}

// ---------------------------------------------------------------------------
// Offline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_without_cache_reports_offline_no_cache() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        offline: true,
        ..manual_options(&server.uri())
    })
    .unwrap();
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::OfflineNoCache);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_serves_from_the_cache() {
    let cache = Arc::new(InMemoryConfigCache::new());
    cache
        .write(&cache_key_for(SDK_KEY), br#"{"f":{"k":{"v":true,"t":0}}}"#)
        .await
        .unwrap();

    let fetcher = ConfigFetcher::new(FetcherOptions {
        sdk_key: SDK_KEY.to_string(),
        mode: PollingMode::Manual,
        base_url: Some("http://127.0.0.1:1".to_string()),
        offline: true,
        cache: Some(cache),
        ..FetcherOptions::default()
    })
    .unwrap();

    fetcher.refresh().await.unwrap();
    assert_eq!(
        fetcher.current().unwrap().entry("k").unwrap().value,
        Value::Bool(true)
    );
}

#[tokio::test]
async fn offline_toggle_stops_and_resumes_fetching() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{"k":{"v":"v","t":1}}}"#).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.set_offline(true);
    assert!(fetcher.is_offline());
    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::OfflineNoCache);
    assert!(server.received_requests().await.unwrap().is_empty());

    fetcher.set_offline(false);
    fetcher.refresh().await.unwrap();
    assert!(fetcher.current().is_some());
}

// ---------------------------------------------------------------------------
// Single-flight & staleness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_refreshes_collapse_to_one_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(
            json_response(r#"{"f":{}}"#).set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    let cutoff = Utc::now();
    let refreshes = (0..8).map(|_| {
        let fetcher = fetcher.clone();
        async move { fetcher.refresh_if_older(cutoff, true).await }
    });
    for outcome in futures::future::join_all(refreshes).await {
        outcome.unwrap();
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn refresh_if_older_skips_fresh_configs() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.refresh().await.unwrap();
    fetcher
        .refresh_if_older(Utc::now() - chrono::Duration::seconds(60), true)
        .await
        .unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Polling disciplines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_poll_fetches_immediately_and_periodically() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{"k":{"v":"v","t":1}}}"#).await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        mode: PollingMode::auto_poll(Duration::from_millis(150)),
        ..manual_options(&server.uri())
    })
    .unwrap();

    fetcher.wait_for_ready().await;
    assert!(fetcher.current().is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let requests = server.received_requests().await.unwrap().len();
    assert!(requests >= 2, "expected periodic polls, saw {requests}");
    fetcher.close();
}

#[tokio::test]
async fn auto_poll_resolve_waits_for_the_first_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(r#"{"f":{}}"#).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        mode: PollingMode::auto_poll(Duration::from_secs(60)),
        ..manual_options(&server.uri())
    })
    .unwrap();
    assert!(fetcher.resolve_config().await.is_some());
    fetcher.close();
}

#[tokio::test]
async fn lazy_mode_refreshes_stale_reads() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        mode: PollingMode::lazy(Duration::from_millis(200)),
        ..manual_options(&server.uri())
    })
    .unwrap();

    assert!(fetcher.resolve_config().await.is_some());
    assert!(fetcher.resolve_config().await.is_some());
    // Within the TTL a second read does not refetch.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(fetcher.resolve_config().await.is_some());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn lazy_async_refresh_serves_stale_while_refreshing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(r#"{"f":{}}"#).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        mode: PollingMode::Lazy {
            cache_ttl: Duration::from_millis(50),
            async_refresh: true,
        },
        ..manual_options(&server.uri())
    })
    .unwrap();

    // First read kicks the refresh off and returns immediately with no
    // config yet.
    let started = std::time::Instant::now();
    assert!(fetcher.resolve_config().await.is_none());
    assert!(started.elapsed() < Duration::from_millis(100));

    // Once the background fetch lands, reads serve it.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(fetcher.resolve_config().await.is_some());
}

// ---------------------------------------------------------------------------
// Change notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn config_changed_hook_fires_on_content_changes_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(r#"{"f":{"k":{"v":"one","t":1}}}"#))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(config_path()))
        .respond_with(json_response(r#"{"f":{"k":{"v":"two","t":1}}}"#))
        .mount(&server)
        .await;

    let hooks = Arc::new(fdk_core::Hooks::new());
    let changes = Arc::new(AtomicUsize::new(0));
    let seen = changes.clone();
    hooks.on_config_changed(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let fetcher = ConfigFetcher::new(FetcherOptions {
        logger: fdk_core::ClientLogger::new(fdk_core::LogLevel::Off, hooks),
        ..manual_options(&server.uri())
    })
    .unwrap();

    fetcher.refresh().await.unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    fetcher.refresh().await.unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 2);
    // Same body again: no further notification.
    fetcher.refresh().await.unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_only_overrides_never_touch_the_network() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{"remote":{"v":true,"t":0}}}"#).await;

    let mut flags = HashMap::new();
    flags.insert("local".to_string(), Value::Bool(true));
    let fetcher = ConfigFetcher::new(FetcherOptions {
        overrides: Some(fdk_core::FlagOverrides::from_map(
            OverrideBehavior::LocalOnly,
            flags,
        )),
        ..manual_options(&server.uri())
    })
    .unwrap();

    fetcher.refresh().await.unwrap();
    let config = fetcher.current().unwrap();
    assert!(config.entry("local").is_some());
    assert!(config.entry("remote").is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn local_over_remote_merges_on_fetch() {
    let server = MockServer::start().await;
    mount_config(
        &server,
        r#"{"f":{"shared":{"v":"remote","t":1},"remote-only":{"v":"r","t":1}}}"#,
    )
    .await;

    let mut flags = HashMap::new();
    flags.insert("shared".to_string(), Value::String("local".into()));
    let fetcher = ConfigFetcher::new(FetcherOptions {
        overrides: Some(fdk_core::FlagOverrides::from_map(
            OverrideBehavior::LocalOverRemote,
            flags,
        )),
        ..manual_options(&server.uri())
    })
    .unwrap();

    fetcher.refresh().await.unwrap();
    let config = fetcher.current().unwrap();
    assert_eq!(
        config.entry("shared").unwrap().value,
        Value::String("local".into())
    );
    assert_eq!(
        config.entry("remote-only").unwrap().value,
        Value::String("r".into())
    );
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_is_idempotent_and_stops_refreshing() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(manual_options(&server.uri())).unwrap();
    fetcher.close();
    fetcher.close();

    let err = fetcher.refresh().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ClientClosed);
}

#[tokio::test]
async fn close_stops_the_auto_poll_task() {
    let server = MockServer::start().await;
    mount_config(&server, r#"{"f":{}}"#).await;

    let fetcher = ConfigFetcher::new(FetcherOptions {
        mode: PollingMode::auto_poll(Duration::from_millis(100)),
        ..manual_options(&server.uri())
    })
    .unwrap();
    fetcher.wait_for_ready().await;
    fetcher.close();

    let settled = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), settled);
}

#[tokio::test]
async fn wait_for_ready_returns_after_close() {
    let fetcher = ConfigFetcher::new(FetcherOptions {
        sdk_key: SDK_KEY.to_string(),
        mode: PollingMode::Manual,
        base_url: Some("http://127.0.0.1:1".to_string()),
        ..FetcherOptions::default()
    })
    .unwrap();
    fetcher.close();
    // Must not hang.
    tokio::time::timeout(Duration::from_secs(1), fetcher.wait_for_ready())
        .await
        .unwrap();
}
