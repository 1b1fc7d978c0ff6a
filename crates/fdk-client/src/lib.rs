// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod options;

pub use client::Client;
pub use options::ClientOptions;

pub use fdk_core::{
    AttrValue, ClientLogger, EvaluationDetails, FieldSource, FlagOverrides, Hooks, LogLevel,
    OverrideBehavior, Snapshot, User, UserAttributes, UserField, UserHandle, UserRecord, Value,
};
pub use fdk_error::{ErrorCategory, ErrorKind, FlagError};
pub use fdk_fetch::{
    ConfigCache, DataGovernance, InMemoryConfigCache, PollingMode,
};
