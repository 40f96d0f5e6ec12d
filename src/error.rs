use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::SourceId;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid seed specifier: {0}")]
    InvalidSpecifier(String),

    #[error("invalid CAS registry number: {0}")]
    InvalidCasRn(String),

    #[error("invalid InChIKey: {0}")]
    InvalidInchiKey(String),

    #[error("invalid ChEBI identifier: {0}")]
    InvalidChebiId(String),

    #[error("invalid numeric identifier for {kind}: {value}")]
    InvalidNumericId { kind: String, value: String },

    #[error("invalid entity name: {0:?}")]
    InvalidName(String),

    #[error("unknown identifier type: {0}")]
    UnknownIdentifierType(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("missing config file kira-ce.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("failed to build HTTP client for {source_id}: {message}")]
    HttpClient { source_id: SourceId, message: String },

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("cannot re-key {0}: no InChIKey or CAS-RN has been discovered")]
    NothingToRekey(String),

    #[error("re-key target {0} already exists")]
    RekeyCollision(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid CURIE pattern: {0}")]
    InvalidCuriePattern(String),
}

/// Failure of a single adapter lookup. Never aborts an enrichment job.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum LookupError {
    /// Network error, timeout, rate limit or 5xx. Retried with backoff.
    #[error("{source_id} transient failure: {message}")]
    Transient { source_id: SourceId, message: String },

    /// Malformed request or response. Logged once and skipped.
    #[error("{source_id} permanent failure: {message}")]
    Permanent { source_id: SourceId, message: String },
}

impl LookupError {
    pub fn transient(source_id: SourceId, message: impl Into<String>) -> Self {
        Self::Transient {
            source_id,
            message: message.into(),
        }
    }

    pub fn permanent(source_id: SourceId, message: impl Into<String>) -> Self {
        Self::Permanent {
            source_id,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
