// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorKind`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Acquiring the configuration over HTTP.
    Fetch,
    /// Decoding the configuration document.
    Parse,
    /// Flag evaluation against a user context.
    Evaluation,
    /// Reading or writing the persistent cache.
    Cache,
    /// Client configuration supplied by the caller.
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Evaluation => "evaluation",
            Self::Cache => "cache",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // -- Fetch --
    /// The HTTP fetch failed (transport error or unexpected status).
    HttpError,
    /// The server answered 404 for the SDK key.
    SdkKeyInvalid,
    /// Redirect preferences formed a loop (hop budget exhausted).
    RedirectLoop,
    /// The server asked to redirect away from a caller-supplied base URL.
    RefuseRedirectCustomUrl,
    /// The client is offline and the persistent cache holds nothing.
    OfflineNoCache,
    /// The SDK key was empty at fetch time.
    EmptySdkKey,
    /// The client was closed while an operation was pending.
    ClientClosed,

    // -- Parse --
    /// The configuration document could not be decoded.
    MalformedConfig,

    // -- Evaluation --
    /// A user record type declares conflicting attribute fields.
    AmbiguousUserType,
    /// The requested flag key is not present in the configuration.
    KeyNotFound,
    /// The evaluated value has a different kind than the typed getter.
    ValueTypeMismatch,

    // -- Cache --
    /// Reading the persistent cache failed.
    CacheRead,
    /// Writing the persistent cache failed.
    CacheWrite,
}

impl ErrorKind {
    /// Returns the broad [`ErrorCategory`] this kind belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError
            | Self::SdkKeyInvalid
            | Self::RedirectLoop
            | Self::RefuseRedirectCustomUrl
            | Self::OfflineNoCache
            | Self::ClientClosed => ErrorCategory::Fetch,

            Self::MalformedConfig => ErrorCategory::Parse,

            Self::AmbiguousUserType | Self::KeyNotFound | Self::ValueTypeMismatch => {
                ErrorCategory::Evaluation
            }

            Self::CacheRead | Self::CacheWrite => ErrorCategory::Cache,

            Self::EmptySdkKey => ErrorCategory::Config,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"REDIRECT_LOOP"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpError => "HTTP_ERROR",
            Self::SdkKeyInvalid => "SDK_KEY_INVALID",
            Self::RedirectLoop => "REDIRECT_LOOP",
            Self::RefuseRedirectCustomUrl => "REFUSE_REDIRECT_CUSTOM_URL",
            Self::OfflineNoCache => "OFFLINE_NO_CACHE",
            Self::EmptySdkKey => "EMPTY_SDK_KEY",
            Self::ClientClosed => "CLIENT_CLOSED",
            Self::MalformedConfig => "MALFORMED_CONFIG",
            Self::AmbiguousUserType => "AMBIGUOUS_USER_TYPE",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::ValueTypeMismatch => "VALUE_TYPE_MISMATCH",
            Self::CacheRead => "CACHE_READ",
            Self::CacheWrite => "CACHE_WRITE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FlagError
// ---------------------------------------------------------------------------

/// Unified flagdeck error.
///
/// Carries a stable [`ErrorKind`], a human-readable message, and an
/// optional source error for cause-chaining.
///
/// # Builder usage
///
/// ```
/// use fdk_error::{ErrorKind, FlagError};
///
/// let err = FlagError::new(ErrorKind::HttpError, "unexpected status 503")
///     .with_source(std::io::Error::other("connection reset"));
/// assert_eq!(err.to_string(), "[HTTP_ERROR] unexpected status 503");
/// ```
#[derive(Debug, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct FlagError {
    /// Machine-readable error code.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FlagError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.kind.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`FlagError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagErrorDto {
    /// Error code.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&FlagError> for FlagErrorDto {
    fn from(err: &FlagError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<FlagErrorDto> for FlagError {
    fn from(dto: FlagErrorDto) -> Self {
        Self {
            kind: dto.kind,
            message: dto.message,
            source: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
