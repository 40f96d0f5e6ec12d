use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://api.bacdive.dsmz.de/v2";

/// BacDive REST: strain entries by BacDive id, strain ids by binomial name.
pub struct BacdiveHttpClient {
    http: JsonFetcher,
    base_url: String,
}

impl BacdiveHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        let headers = settings
            .api_key
            .iter()
            .map(|token| ("authorization", format!("Bearer {}", token.trim())))
            .collect::<Vec<_>>();
        Ok(Self {
            http: JsonFetcher::new(
                SourceId::Bacdive,
                settings,
                Duration::from_millis(500),
                &headers,
            )?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        })
    }
}

impl IdentifierAdapter for BacdiveHttpClient {
    fn source(&self) -> SourceId {
        SourceId::Bacdive
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        matches!(kind, IdentifierType::BacdiveId | IdentifierType::Name)
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == EntityKind::Strain
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        match kind {
            IdentifierType::BacdiveId => {
                let url = endpoint(self.source(), &self.base_url, &["fetch", value])?;
                Ok(self
                    .http
                    .get_json(url, &[])?
                    .map(|body| parse_fetch(&body))
                    .unwrap_or_default())
            }
            IdentifierType::Name => {
                let Some((genus, species)) = binomial(value) else {
                    return Ok(Vec::new());
                };
                let url = endpoint(self.source(), &self.base_url, &["taxon", genus, species])?;
                Ok(self
                    .http
                    .get_json(url, &[])?
                    .map(|body| parse_taxon_search(&body))
                    .unwrap_or_default())
            }
            other => Err(unsupported(self.source(), other)),
        }
    }
}

/// Splits `genus species [subspecies..]` into the two path segments BacDive
/// searches on.
fn binomial(name: &str) -> Option<(&str, &str)> {
    let mut words = name.split_whitespace();
    let genus = words.next()?;
    let species = words.next()?;
    Some((genus, species))
}

/// `fetch` answers `{"results": {"<id>": {...strain sections...}}}`.
pub fn parse_fetch(body: &Value) -> Vec<SourceRecord> {
    let Some(results) = body.get("results").and_then(Value::as_object) else {
        return Vec::new();
    };
    results.values().filter_map(parse_strain).collect()
}

fn parse_strain(entry: &Value) -> Option<SourceRecord> {
    let general = entry.get("General")?;
    let bacdive_id = general
        .get("BacDive-ID")
        .and_then(|raw| identifier_field(IdentifierType::BacdiveId, raw))?;
    let mut record = SourceRecord::new(SourceId::Bacdive, bacdive_id.to_string());
    record.set("bacdive_id", Some(bacdive_id));
    record.set("ncbi_taxon_id", ncbi_taxon(general));
    record.set("dsm_number", text_at(general, "/DSM-Number").map(FieldValue::Text));

    if let Some(taxonomy) = entry.get("Name and taxonomic classification") {
        record.set("name", text_at(taxonomy, "/species").map(FieldValue::Text));
        record.set(
            "full_scientific_name",
            text_at(taxonomy, "/full scientific name").map(FieldValue::Text),
        );
        record.set(
            "strain_designation",
            text_at(taxonomy, "/strain designation").map(FieldValue::Text),
        );
        record.set("type_strain", text_at(taxonomy, "/type strain").map(FieldValue::Text));
    }
    Some(record)
}

/// `NCBI tax id` is an object, or a list of them when BacDive knows both the
/// species and the strain-level taxon. The strain-level one wins.
fn ncbi_taxon(general: &Value) -> Option<FieldValue> {
    let entries = match general.get("NCBI tax id")? {
        Value::Array(entries) => entries.iter().collect::<Vec<_>>(),
        entry => vec![entry],
    };
    let level = |entry: &&Value| text_at(entry, "/Matching level");
    entries
        .iter()
        .find(|entry| level(entry).as_deref() == Some("strain"))
        .or_else(|| entries.first())
        .and_then(|entry| entry.get("NCBI tax id"))
        .and_then(|raw| identifier_field(IdentifierType::NcbiTaxonId, raw))
}

/// Taxon search returns only BacDive ids; several strains per species is the
/// normal case and surfaces as an ambiguous match.
pub fn parse_taxon_search(body: &Value) -> Vec<SourceRecord> {
    let Some(results) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|hit| {
            let raw = hit.get("id").unwrap_or(hit);
            identifier_field(IdentifierType::BacdiveId, raw)
        })
        .map(|bacdive_id| {
            SourceRecord::new(SourceId::Bacdive, bacdive_id.to_string())
                .with_field("bacdive_id", bacdive_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_strain_level_taxon() {
        let general = serde_json::json!({
            "NCBI tax id": [
                {"NCBI tax id": 562, "Matching level": "species"},
                {"NCBI tax id": 83333, "Matching level": "strain"}
            ]
        });
        assert_eq!(ncbi_taxon(&general), Some(FieldValue::text("83333")));
    }

    #[test]
    fn binomial_needs_two_words() {
        assert_eq!(binomial("escherichia coli k-12"), Some(("escherichia", "coli")));
        assert_eq!(binomial("escherichia"), None);
    }
}
