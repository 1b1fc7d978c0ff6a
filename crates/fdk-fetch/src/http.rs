// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conditional HTTP fetch with the redirect state machine.
//!
//! One refresh performs at most three GETs. A hop ends in one of three
//! ways: the document is accepted (possibly recording a new base URL
//! for later refreshes), the machine loops to a new base URL, or the
//! refresh fails with a structured error. `no-redirect` is a terminal
//! accept state even when it updates the base URL.

use chrono::{DateTime, Utc};
use fdk_core::{ClientLogger, FlagOverrides, ParsedConfig, RedirectKind};
use fdk_error::{ErrorKind, FlagError};
use reqwest::StatusCode;

/// Request header carrying the SDK identity and polling mode.
pub(crate) const USER_AGENT_HEADER: &str = "X-ConfigCat-UserAgent";

/// Bounded number of GETs per refresh.
const MAX_HOPS: usize = 3;

/// Result of a successful fetch.
pub(crate) struct FetchSuccess {
    /// `None` means 304: the previous configuration is still current.
    pub(crate) config: Option<ParsedConfig>,
    /// Base URL after redirects, to persist for subsequent refreshes.
    pub(crate) base_url: String,
}

pub(crate) struct HttpConfigClient {
    http: reqwest::Client,
    sdk_key: String,
    user_agent: String,
}

impl HttpConfigClient {
    pub(crate) fn new(http: reqwest::Client, sdk_key: String, user_agent: String) -> Self {
        Self {
            http,
            sdk_key,
            user_agent,
        }
    }

    fn config_url(&self, base_url: &str) -> String {
        format!(
            "{}/configuration-files/{}/config_v5.json",
            base_url.trim_end_matches('/'),
            self.sdk_key
        )
    }

    /// Run the redirect state machine starting from `base_url`.
    ///
    /// `custom_base` records whether the caller supplied the base URL;
    /// a `should-redirect` directive away from a caller-supplied base
    /// is refused rather than followed.
    pub(crate) async fn fetch(
        &self,
        mut base_url: String,
        etag: Option<&str>,
        custom_base: bool,
        overrides: Option<&FlagOverrides>,
        fetch_time: DateTime<Utc>,
        logger: &ClientLogger,
    ) -> Result<FetchSuccess, FlagError> {
        for _ in 0..MAX_HOPS {
            let url = self.config_url(&base_url);
            logger.debug(&format!("fetching configuration from {url}"));

            let mut request = self
                .http
                .get(&url)
                .header(USER_AGENT_HEADER, &self.user_agent);
            if let Some(etag) = etag {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }

            let response = request.send().await.map_err(|e| {
                FlagError::new(ErrorKind::HttpError, format!("config fetch failed: {e}"))
                    .with_source(e)
            })?;

            let status = response.status();
            if status == StatusCode::NOT_MODIFIED {
                return Ok(FetchSuccess {
                    config: None,
                    base_url,
                });
            }
            if status == StatusCode::NOT_FOUND {
                return Err(FlagError::new(
                    ErrorKind::SdkKeyInvalid,
                    "the server answered 404; double-check your SDK key",
                ));
            }
            if !status.is_success() {
                return Err(FlagError::new(
                    ErrorKind::HttpError,
                    format!("unexpected configuration fetch status {status}"),
                ));
            }

            let response_etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.map_err(|e| {
                FlagError::new(ErrorKind::HttpError, "failed to read configuration body")
                    .with_source(e)
            })?;

            let config = ParsedConfig::parse(&body, response_etag, fetch_time, overrides)?;

            let Some(prefs) = config.preferences().cloned() else {
                return Ok(FetchSuccess {
                    config: Some(config),
                    base_url,
                });
            };
            if prefs.url == base_url {
                return Ok(FetchSuccess {
                    config: Some(config),
                    base_url,
                });
            }

            match prefs.redirect {
                RedirectKind::ForceRedirect => {
                    base_url = prefs.url;
                }
                RedirectKind::ShouldRedirect => {
                    if custom_base {
                        return Err(FlagError::new(
                            ErrorKind::RefuseRedirectCustomUrl,
                            "the server asked to redirect away from the caller-supplied base URL; \
                             remove the custom base URL or adjust the data-governance setting",
                        ));
                    }
                    logger.warn(
                        "the configured data-governance setting does not match the dashboard; \
                         following the server's preferred URL",
                    );
                    base_url = prefs.url;
                }
                RedirectKind::NoRedirect => {
                    // Terminal accept state; subsequent refreshes start
                    // from the preferred URL unless the caller pinned one.
                    if !custom_base {
                        base_url = prefs.url;
                    }
                    return Ok(FetchSuccess {
                        config: Some(config),
                        base_url,
                    });
                }
            }
        }

        Err(FlagError::new(
            ErrorKind::RedirectLoop,
            "redirect preferences kept the client hopping; giving up after the hop budget",
        ))
    }
}
