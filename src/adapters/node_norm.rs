use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://nodenormalization-sri.renci.org/1.5";

/// CURIE prefixes NodeNorm uses, paired with the identifier type they carry.
const PREFIXES: [(&str, IdentifierType); 5] = [
    ("CHEBI", IdentifierType::ChebiId),
    ("PUBCHEM.COMPOUND", IdentifierType::PubchemCid),
    ("INCHIKEY", IdentifierType::Inchikey),
    ("CAS", IdentifierType::CasRn),
    ("NCBITaxon", IdentifierType::NcbiTaxonId),
];

/// SRI Node Normalization: one CURIE in, its conflated equivalence clique out.
pub struct NodeNormHttpClient {
    http: JsonFetcher,
    base_url: String,
}

impl NodeNormHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        Ok(Self {
            http: JsonFetcher::new(SourceId::NodeNorm, settings, Duration::from_millis(200), &[])?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        })
    }
}

impl IdentifierAdapter for NodeNormHttpClient {
    fn source(&self) -> SourceId {
        SourceId::NodeNorm
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        PREFIXES.iter().any(|(_, accepted)| *accepted == kind)
    }

    fn serves(&self, _entity: EntityKind) -> bool {
        true
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        let curie = to_curie(kind, value).ok_or_else(|| unsupported(self.source(), kind))?;
        let url = endpoint(self.source(), &self.base_url, &["get_normalized_nodes"])?;
        let body = self
            .http
            .get_json(url, &[("curie", curie.as_str()), ("conflate", "true")])?;
        Ok(body
            .and_then(|body| parse_normalized(&body, &curie))
            .into_iter()
            .collect())
    }
}

/// Builds the CURIE NodeNorm expects for a normalised identifier value.
pub fn to_curie(kind: IdentifierType, value: &str) -> Option<String> {
    match kind {
        // Already carries its prefix.
        IdentifierType::ChebiId => Some(value.to_string()),
        _ => PREFIXES
            .iter()
            .find(|(_, accepted)| *accepted == kind)
            .map(|(prefix, _)| format!("{prefix}:{value}")),
    }
}

/// Unknown CURIEs map to `null`.
pub fn parse_normalized(body: &Value, curie: &str) -> Option<SourceRecord> {
    let node = body.get(curie).filter(|node| !node.is_null())?;
    let preferred = text_at(node, "/id/identifier")?;
    let mut record = SourceRecord::new(SourceId::NodeNorm, preferred);
    record.set("name", text_at(node, "/id/label").map(FieldValue::Text));
    record.set("biolink_category", text_at(node, "/type/0").map(FieldValue::Text));

    let equivalents = node
        .get("equivalent_identifiers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for (prefix, kind) in PREFIXES {
        let first = equivalents.iter().find_map(|entry| {
            let identifier = text_at(entry, "/identifier")?;
            let (entry_prefix, local) = identifier.split_once(':')?;
            if entry_prefix != prefix {
                return None;
            }
            let raw = if kind == IdentifierType::ChebiId {
                identifier.as_str()
            } else {
                local
            };
            identifier_field(kind, &Value::from(raw))
        });
        record.set(kind.as_str(), first);
    }
    Some(record)
}
