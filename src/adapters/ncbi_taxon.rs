use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const ANONYMOUS_INTERVAL: Duration = Duration::from_millis(500);
const KEYED_INTERVAL: Duration = Duration::from_millis(100);
const SEARCH_LIMIT: &str = "20";

/// NCBI Taxonomy over E-utilities: `esearch` for names, `esummary` for ids.
pub struct NcbiTaxonHttpClient {
    http: JsonFetcher,
    base_url: String,
    api_key: Option<String>,
}

impl NcbiTaxonHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        // NCBI allows 10 requests per second with a key, 3 without.
        let interval = if api_key.is_some() {
            KEYED_INTERVAL
        } else {
            ANONYMOUS_INTERVAL
        };
        Ok(Self {
            http: JsonFetcher::new(SourceId::NcbiTaxon, settings, interval, &[])?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
            api_key,
        })
    }

    fn query<'a>(&'a self, params: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut query = vec![("db", "taxonomy"), ("retmode", "json")];
        query.extend_from_slice(params);
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.as_str()));
        }
        query
    }
}

impl IdentifierAdapter for NcbiTaxonHttpClient {
    fn source(&self) -> SourceId {
        SourceId::NcbiTaxon
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        matches!(kind, IdentifierType::NcbiTaxonId | IdentifierType::Name)
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == EntityKind::Strain
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        match kind {
            IdentifierType::NcbiTaxonId => {
                let url = endpoint(self.source(), &self.base_url, &["esummary.fcgi"])?;
                let body = self.http.get_json(url, &self.query(&[("id", value)]))?;
                Ok(body.map(|body| parse_summary(&body)).unwrap_or_default())
            }
            IdentifierType::Name => {
                let url = endpoint(self.source(), &self.base_url, &["esearch.fcgi"])?;
                let term = format!("\"{value}\"[Scientific Name]");
                let body = self.http.get_json(
                    url,
                    &self.query(&[("term", term.as_str()), ("retmax", SEARCH_LIMIT)]),
                )?;
                Ok(body.map(|body| parse_search(&body)).unwrap_or_default())
            }
            other => Err(unsupported(self.source(), other)),
        }
    }
}

/// `esearch` only returns ids; the next hop on `ncbi_taxon_id` fills in the rest.
pub fn parse_search(body: &Value) -> Vec<SourceRecord> {
    body.pointer("/esearchresult/idlist")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|raw| identifier_field(IdentifierType::NcbiTaxonId, raw))
                .map(|taxon| {
                    SourceRecord::new(SourceId::NcbiTaxon, taxon.to_string())
                        .with_field("ncbi_taxon_id", taxon)
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_summary(body: &Value) -> Vec<SourceRecord> {
    let Some(result) = body.get("result") else {
        return Vec::new();
    };
    let Some(uids) = result.get("uids").and_then(Value::as_array) else {
        return Vec::new();
    };
    uids.iter()
        .filter_map(Value::as_str)
        .filter_map(|uid| {
            let summary = result.get(uid)?;
            // Merged or deleted taxa come back with an error entry.
            if summary.get("error").is_some() {
                return None;
            }
            let taxon = identifier_field(IdentifierType::NcbiTaxonId, &Value::from(uid))?;
            let scientific_name = text_at(summary, "/scientificname");
            let mut record = SourceRecord::new(SourceId::NcbiTaxon, taxon.to_string());
            record.set("ncbi_taxon_id", Some(taxon));
            record.set("name", scientific_name.clone().map(FieldValue::Text));
            record.set("scientific_name", scientific_name.map(FieldValue::Text));
            record.set("rank", text_at(summary, "/rank").map(FieldValue::Text));
            record.set("division", text_at(summary, "/division").map(FieldValue::Text));
            record.set("genus", text_at(summary, "/genus").map(FieldValue::Text));
            Some(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_skips_error_entries() {
        let body = serde_json::json!({
            "result": {
                "uids": ["562", "999999999"],
                "562": {"uid": "562", "rank": "species", "scientificname": "Escherichia coli"},
                "999999999": {"error": "cannot get document summary"}
            }
        });
        let records = parse_summary(&body);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].native_identifier, "562");
        assert_eq!(
            records[0].fields.get("rank"),
            Some(&FieldValue::text("species"))
        );
    }
}
