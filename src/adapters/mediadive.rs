use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://mediadive.dsmz.de/rest";

/// MediaDive ingredient entries. Many ingredients (peptone, yeast extract)
/// carry no chemical identifiers at all.
pub struct MediadiveHttpClient {
    http: JsonFetcher,
    base_url: String,
}

impl MediadiveHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        Ok(Self {
            http: JsonFetcher::new(
                SourceId::Mediadive,
                settings,
                Duration::from_millis(340),
                &[],
            )?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        })
    }
}

impl IdentifierAdapter for MediadiveHttpClient {
    fn source(&self) -> SourceId {
        SourceId::Mediadive
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        kind == IdentifierType::MediadiveId
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == EntityKind::Ingredient
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        if kind != IdentifierType::MediadiveId {
            return Err(unsupported(self.source(), kind));
        }
        let url = endpoint(self.source(), &self.base_url, &["ingredient", value])?;
        Ok(self
            .http
            .get_json(url, &[])?
            .and_then(|body| parse_ingredient(&body))
            .into_iter()
            .collect())
    }
}

pub fn parse_ingredient(body: &Value) -> Option<SourceRecord> {
    let data = body.get("data").unwrap_or(body);
    let id = data
        .get("id")
        .and_then(|raw| identifier_field(IdentifierType::MediadiveId, raw))?;
    let mut record = SourceRecord::new(SourceId::Mediadive, id.to_string());
    record.set("mediadive_id", Some(id));
    record.set("name", text_at(data, "/name").map(FieldValue::Text));
    let ids = [
        ("ChEBI", "chebi_id", IdentifierType::ChebiId),
        ("CAS-RN", "cas_rn", IdentifierType::CasRn),
        ("PubChem", "pubchem_cid", IdentifierType::PubchemCid),
    ];
    for (key, field, kind) in ids {
        if let Some(raw) = data.get(key) {
            record.set(field, identifier_field(kind, raw));
        }
    }
    record.set("molecular_formula", text_at(data, "/formula").map(FieldValue::Text));
    record.set("molecular_weight", text_at(data, "/mass").map(FieldValue::Text));
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_identifiers_are_dropped() {
        let body = serde_json::json!({
            "status": 200,
            "data": {"id": 1, "name": "Peptone", "ChEBI": null, "CAS-RN": null, "PubChem": null}
        });
        let record = parse_ingredient(&body).unwrap();
        assert_eq!(record.native_identifier, "1");
        assert_eq!(record.fields.len(), 2);
    }
}
