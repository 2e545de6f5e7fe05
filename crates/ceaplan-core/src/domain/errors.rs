//! Errors - エラー型と分類
//!
//! `ErrorKind` は ERROR envelope に載る運用分類。
//! `CapabilityProvider` だけがリトライ対象（1 回、バックオフ付き）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Text could not be tokenized or classified at all.
    ParseError,
    /// Below-threshold confidence. Normally surfaced as CLARIFY instead.
    AmbiguousIntent,
    NoMatchingCapability,
    /// Backend unreachable or malformed catalog entry.
    CapabilityProvider,
    Timeout,
    /// Handler fault (panic) or protocol misuse.
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::CapabilityProvider)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::AmbiguousIntent => "AMBIGUOUS_INTENT",
            ErrorKind::NoMatchingCapability => "NO_MATCHING_CAPABILITY",
            ErrorKind::CapabilityProvider => "CAPABILITY_PROVIDER",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Payload of an ERROR envelope: `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

/// Failures of a capability provider backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("capability backend unreachable: {0}")]
    Unreachable(String),

    #[error("malformed catalog: {0}")]
    Malformed(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors of the bus itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no correlated response within {0:?}")]
    Timeout(Duration),

    #[error("send_request needs a REQUEST envelope, got {0}")]
    NotARequest(String),
}

/// Error type shared by the parser, mapper and assistant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CeaplanError {
    #[error("could not parse request: {0}")]
    Parse(String),

    #[error("ambiguous request: {0}")]
    AmbiguousIntent(String),

    #[error("no matching capability: {0}")]
    NoMatchingCapability(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CeaplanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CeaplanError::Parse(_) => ErrorKind::ParseError,
            CeaplanError::AmbiguousIntent(_) => ErrorKind::AmbiguousIntent,
            CeaplanError::NoMatchingCapability(_) => ErrorKind::NoMatchingCapability,
            CeaplanError::Provider(_) => ErrorKind::CapabilityProvider,
            CeaplanError::Timeout(_) => ErrorKind::Timeout,
            CeaplanError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<BusError> for CeaplanError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(_) => CeaplanError::Timeout(err.to_string()),
            BusError::NotARequest(_) => CeaplanError::Internal(err.to_string()),
        }
    }
}

impl From<ErrorPayload> for CeaplanError {
    fn from(payload: ErrorPayload) -> Self {
        let ErrorPayload { kind, message } = payload;
        match kind {
            ErrorKind::ParseError => CeaplanError::Parse(message),
            ErrorKind::AmbiguousIntent => CeaplanError::AmbiguousIntent(message),
            ErrorKind::NoMatchingCapability => CeaplanError::NoMatchingCapability(message),
            ErrorKind::CapabilityProvider => {
                CeaplanError::Provider(ProviderError::Unreachable(message))
            }
            ErrorKind::Timeout => CeaplanError::Timeout(message),
            ErrorKind::Internal => CeaplanError::Internal(message),
        }
    }
}
