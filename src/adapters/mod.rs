//! Identifier client adapters: one per external identifier system.
//!
//! Every adapter answers `lookup(identifier_type, value)` with zero or more
//! [`SourceRecord`]s. "Not found" is an empty vec, never an error.

pub mod bacdive;
pub mod cas;
pub mod chebi;
pub mod http;
pub mod mediadive;
pub mod ncbi_taxon;
pub mod node_norm;
pub mod pubchem;

use std::time::Duration;

use crate::cache::ResponseCache;
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

pub use bacdive::BacdiveHttpClient;
pub use cas::CasHttpClient;
pub use chebi::ChebiHttpClient;
pub use mediadive::MediadiveHttpClient;
pub use ncbi_taxon::NcbiTaxonHttpClient;
pub use node_norm::NodeNormHttpClient;
pub use pubchem::PubchemHttpClient;

pub trait IdentifierAdapter: Send + Sync {
    fn source(&self) -> SourceId;
    fn accepts(&self, kind: IdentifierType) -> bool;
    fn serves(&self, entity: EntityKind) -> bool;
    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError>;
}

impl<A: IdentifierAdapter + ?Sized> IdentifierAdapter for Box<A> {
    fn source(&self) -> SourceId {
        (**self).source()
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        (**self).accepts(kind)
    }

    fn serves(&self, entity: EntityKind) -> bool {
        (**self).serves(entity)
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        (**self).lookup(kind, value)
    }
}

/// Consults the response cache before handing a lookup to the inner
/// adapter. A hit never reaches the network or the rate limiter.
pub struct CachedAdapter<A> {
    inner: A,
    cache: ResponseCache,
}

impl<A: IdentifierAdapter> CachedAdapter<A> {
    pub fn new(inner: A, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }
}

impl<A: IdentifierAdapter> IdentifierAdapter for CachedAdapter<A> {
    fn source(&self) -> SourceId {
        self.inner.source()
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        self.inner.accepts(kind)
    }

    fn serves(&self, entity: EntityKind) -> bool {
        self.inner.serves(entity)
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        let source = self.inner.source();
        if let Some(entry) = self.cache.get(source, kind, value) {
            tracing::debug!(%source, %kind, value, records = entry.records.len(), "cache hit");
            return Ok(entry.records);
        }
        let records = self.inner.lookup(kind, value)?;
        if let Err(err) = self.cache.put(source, kind, value, &records) {
            tracing::warn!(%source, %kind, value, error = %err, "failed to write cache entry");
        }
        Ok(records)
    }
}

/// Connection settings shared by the HTTP adapters.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub request_timeout: Duration,
    pub min_interval: Option<Duration>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            min_interval: None,
            base_url: None,
            api_key: None,
        }
    }
}

/// Builds the cached HTTP adapter for one source.
pub fn http_adapter(
    source: SourceId,
    settings: &HttpSettings,
    cache: &ResponseCache,
) -> Result<Box<dyn IdentifierAdapter>, KiraError> {
    let cache = cache.clone();
    let adapter: Box<dyn IdentifierAdapter> = match source {
        SourceId::Pubchem => Box::new(CachedAdapter::new(PubchemHttpClient::new(settings)?, cache)),
        SourceId::Chebi => Box::new(CachedAdapter::new(ChebiHttpClient::new(settings)?, cache)),
        SourceId::Cas => Box::new(CachedAdapter::new(CasHttpClient::new(settings)?, cache)),
        SourceId::Mediadive => {
            Box::new(CachedAdapter::new(MediadiveHttpClient::new(settings)?, cache))
        }
        SourceId::Bacdive => Box::new(CachedAdapter::new(BacdiveHttpClient::new(settings)?, cache)),
        SourceId::NcbiTaxon => {
            Box::new(CachedAdapter::new(NcbiTaxonHttpClient::new(settings)?, cache))
        }
        SourceId::NodeNorm => {
            Box::new(CachedAdapter::new(NodeNormHttpClient::new(settings)?, cache))
        }
        SourceId::Manual => return Err(KiraError::UnknownSource(source.to_string())),
    };
    Ok(adapter)
}

/// Identifier fields are always stored as normalised text, whatever JSON
/// type the source used, so equal identifiers from two sources compare equal.
pub(crate) fn identifier_field(kind: IdentifierType, raw: &serde_json::Value) -> Option<FieldValue> {
    let text = match raw {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Number(number) => number.to_string(),
        _ => return None,
    };
    kind.normalize(&text).ok().map(FieldValue::Text)
}

pub(crate) fn unsupported(source: SourceId, kind: IdentifierType) -> LookupError {
    LookupError::permanent(source, format!("identifier type {kind} is not supported"))
}
