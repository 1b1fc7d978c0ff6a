// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod fetcher;
mod http;

pub use cache::{CacheError, ConfigCache, InMemoryConfigCache, cache_key_for};
pub use fetcher::{
    ConfigFetcher, DataGovernance, EU_BASE_URL, FetcherOptions, GLOBAL_BASE_URL, PollingMode,
    RefreshOutcome,
};
