use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EntityKind, Identifier, IdentifierType, SourceId};

/// A field value as returned by a source: text or a JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn number(value: u64) -> Self {
        FieldValue::Number(value.into())
    }

    /// Converts a JSON scalar; objects, arrays, booleans and nulls are dropped.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(text) if !text.trim().is_empty() => {
                Some(FieldValue::Text(text.trim().to_string()))
            }
            serde_json::Value::Number(number) => Some(FieldValue::Number(number.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(number) => write!(f, "{number}"),
            FieldValue::Text(text) => f.write_str(text),
        }
    }
}

/// One observation of an entity from one external source. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub native_identifier: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub retrieved_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(source_id: SourceId, native_identifier: impl Into<String>) -> Self {
        Self {
            source_id,
            native_identifier: native_identifier.into(),
            fields: BTreeMap::new(),
            retrieved_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, field: &str, value: FieldValue) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    /// Equal in everything but `retrieved_at`.
    pub fn same_observation(&self, other: &SourceRecord) -> bool {
        self.source_id == other.source_id
            && self.native_identifier == other.native_identifier
            && self.fields == other.fields
    }

    pub fn set(&mut self, field: &str, value: Option<FieldValue>) {
        if let Some(value) = value {
            self.fields.insert(field.to_string(), value);
        }
    }

    /// Identifier-typed fields whose values parse as that identifier type.
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.fields
            .iter()
            .filter_map(|(field, value)| {
                let kind = IdentifierType::from_field(field)?;
                Identifier::parse(kind, &value.to_string()).ok()
            })
            .collect()
    }
}

/// The canonical merged view of one ingredient or strain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEntity {
    pub composite_key: String,
    pub kind: EntityKind,
    pub fields: BTreeMap<String, FieldValue>,
    /// Source that supplied the current value of each field.
    pub field_sources: BTreeMap<String, SourceId>,
    pub contributing_sources: BTreeSet<SourceId>,
    pub discovered_identifiers: BTreeMap<IdentifierType, BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichedEntity {
    pub fn new(composite_key: impl Into<String>, kind: EntityKind) -> Self {
        let now = Utc::now();
        Self {
            composite_key: composite_key.into(),
            kind,
            fields: BTreeMap::new(),
            field_sources: BTreeMap::new(),
            contributing_sources: BTreeSet::new(),
            discovered_identifiers: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds an identifier; returns true when it was not known yet.
    pub fn discover(&mut self, identifier: &Identifier) -> bool {
        self.discovered_identifiers
            .entry(identifier.kind)
            .or_default()
            .insert(identifier.value.clone())
    }

    pub fn knows(&self, identifier: &Identifier) -> bool {
        self.discovered_identifiers
            .get(&identifier.kind)
            .map(|values| values.contains(&identifier.value))
            .unwrap_or(false)
    }

    pub fn identifiers_of(&self, kind: IdentifierType) -> impl Iterator<Item = &str> {
        self.discovered_identifiers
            .get(&kind)
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    pub fn field_text(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(FieldValue::to_string)
    }

    pub fn identifier_count(&self) -> usize {
        self.discovered_identifiers.values().map(BTreeSet::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionReason {
    AuthoritativeSource,
    FirstSeen,
    ManualOverride,
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionReason::AuthoritativeSource => write!(f, "authoritative-source"),
            ResolutionReason::FirstSeen => write!(f, "first-seen"),
            ResolutionReason::ManualOverride => write!(f, "manual-override"),
        }
    }
}

/// A detected disagreement between two sources for one field. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConflict {
    pub composite_key: String,
    pub field: String,
    pub winning_source: SourceId,
    pub winning_value: FieldValue,
    pub losing_source: SourceId,
    pub losing_value: FieldValue,
    pub resolution_reason: ResolutionReason,
    pub detected_at: DateTime<Utc>,
    pub run_id: String,
}

impl DataConflict {
    /// Everything but the timestamp and run: two conflicts with equal
    /// identities describe the same disagreement.
    pub fn identity(&self) -> ConflictIdentity {
        ConflictIdentity {
            composite_key: self.composite_key.clone(),
            field: self.field.clone(),
            winning_source: self.winning_source,
            winning_value: self.winning_value.clone(),
            losing_source: self.losing_source,
            losing_value: self.losing_value.clone(),
            resolution_reason: self.resolution_reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConflictIdentity {
    pub composite_key: String,
    pub field: String,
    pub winning_source: SourceId,
    pub winning_value: FieldValue,
    pub losing_source: SourceId,
    pub losing_value: FieldValue,
    pub resolution_reason: ResolutionReason,
}

/// Unit of spidering work handed to the adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentQuery {
    pub identifier_type: IdentifierType,
    pub identifier_value: String,
    pub depth: usize,
    pub origin_entity_key: String,
}

impl EnrichmentQuery {
    pub fn identifier(&self) -> Identifier {
        Identifier {
            kind: self.identifier_type,
            value: self.identifier_value.clone(),
        }
    }
}

/// One lookup that returned more than one candidate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousMatch {
    pub composite_key: String,
    pub source_id: SourceId,
    pub identifier: Identifier,
    pub candidates: Vec<String>,
    /// Candidate merged under the pick-first policy; `None` when held for review.
    pub picked: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum QueryOutcome {
    Found { records: usize },
    NotFound,
    Failed { message: String, attempts: usize },
}

/// Executed query as written to the per-run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub source_id: SourceId,
    pub identifier_type: IdentifierType,
    pub identifier_value: String,
    pub depth: usize,
    pub outcome: QueryOutcome,
    pub elapsed_ms: u64,
}
