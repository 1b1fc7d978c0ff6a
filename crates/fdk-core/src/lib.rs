// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod eval;
pub mod hooks;
pub mod keys;
pub mod log;
pub mod overrides;
pub mod snapshot;
pub mod user;
pub mod wire;

pub use config::{Entry, ParsedConfig, PercentageRule, Preferences, RolloutRule};
pub use hooks::Hooks;
pub use keys::KeyId;
pub use log::{ClientLogger, LogLevel};
pub use overrides::{FlagOverrides, OverrideBehavior};
pub use snapshot::{EvaluationDetails, Snapshot};
pub use user::{AttrValue, FieldSource, User, UserAttributes, UserField, UserHandle, UserRecord};
pub use wire::{Comparator, RedirectKind, SettingType, Value};
