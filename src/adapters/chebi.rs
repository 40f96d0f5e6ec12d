use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://www.ebi.ac.uk/chebi/backend/api/public";
const SEARCH_SIZE: &str = "10";

/// ChEBI 2.0 public API: compound detail by accession, search by name or CAS.
pub struct ChebiHttpClient {
    http: JsonFetcher,
    base_url: String,
}

impl ChebiHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        Ok(Self {
            http: JsonFetcher::new(SourceId::Chebi, settings, Duration::from_millis(340), &[])?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        })
    }
}

impl IdentifierAdapter for ChebiHttpClient {
    fn source(&self) -> SourceId {
        SourceId::Chebi
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        matches!(
            kind,
            IdentifierType::ChebiId | IdentifierType::Name | IdentifierType::CasRn
        )
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == EntityKind::Ingredient
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        match kind {
            IdentifierType::ChebiId => {
                let url = endpoint(self.source(), &self.base_url, &["compound", value, ""])?;
                Ok(self
                    .http
                    .get_json(url, &[])?
                    .and_then(|body| parse_compound(&body))
                    .into_iter()
                    .collect())
            }
            IdentifierType::Name | IdentifierType::CasRn => {
                let url = endpoint(self.source(), &self.base_url, &["es_search", ""])?;
                let body = self
                    .http
                    .get_json(url, &[("term", value), ("size", SEARCH_SIZE)])?;
                Ok(body
                    .map(|body| parse_search(&body, kind, value))
                    .unwrap_or_default())
            }
            other => Err(unsupported(self.source(), other)),
        }
    }
}

/// Full compound entry.
pub fn parse_compound(body: &Value) -> Option<SourceRecord> {
    let accession = body
        .get("chebi_accession")
        .and_then(|raw| identifier_field(IdentifierType::ChebiId, raw))?;
    let mut record = SourceRecord::new(SourceId::Chebi, accession.to_string());
    record.set("chebi_id", Some(accession));
    record.set("name", text_at(body, "/name").map(FieldValue::Text));
    record.set("definition", text_at(body, "/definition").map(FieldValue::Text));

    let inchikey = body
        .pointer("/default_structure/standard_inchi_key")
        .or_else(|| body.pointer("/default_structure/inchikey"));
    if let Some(inchikey) = inchikey {
        record.set("inchikey", identifier_field(IdentifierType::Inchikey, inchikey));
    }
    record.set(
        "molecular_formula",
        text_at(body, "/chemical_data/formula").map(FieldValue::Text),
    );

    let cas = body
        .pointer("/database_accessions/CAS")
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries.iter().find_map(|entry| {
                entry
                    .get("accession_number")
                    .and_then(|raw| identifier_field(IdentifierType::CasRn, raw))
            })
        });
    record.set("cas_rn", cas);
    Some(record)
}

/// Search hits carry the accession and name; details come from the next
/// hop on `chebi_id`. Name searches keep only exact (case-insensitive) hits.
pub fn parse_search(body: &Value, kind: IdentifierType, term: &str) -> Vec<SourceRecord> {
    let Some(results) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|hit| {
            let source = hit.get("_source").unwrap_or(hit);
            let accession = source
                .get("chebi_accession")
                .and_then(|raw| identifier_field(IdentifierType::ChebiId, raw))?;
            let name = text_at(source, "/name");
            if kind == IdentifierType::Name
                && !name
                    .as_deref()
                    .map(|name| name.eq_ignore_ascii_case(term))
                    .unwrap_or(false)
            {
                return None;
            }
            let mut record = SourceRecord::new(SourceId::Chebi, accession.to_string());
            record.set("chebi_id", Some(accession));
            record.set("name", name.map(FieldValue::Text));
            Some(record)
        })
        .collect()
}
