use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://commonchemistry.cas.org/api";

/// CAS Common Chemistry: detail by registry number, search by name.
pub struct CasHttpClient {
    http: JsonFetcher,
    base_url: String,
}

impl CasHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        let headers = settings
            .api_key
            .iter()
            .map(|key| ("x-api-key", key.clone()))
            .collect::<Vec<_>>();
        Ok(Self {
            http: JsonFetcher::new(SourceId::Cas, settings, Duration::from_millis(500), &headers)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        })
    }
}

impl IdentifierAdapter for CasHttpClient {
    fn source(&self) -> SourceId {
        SourceId::Cas
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        matches!(kind, IdentifierType::CasRn | IdentifierType::Name)
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == EntityKind::Ingredient
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        match kind {
            IdentifierType::CasRn => {
                let url = endpoint(self.source(), &self.base_url, &["detail"])?;
                Ok(self
                    .http
                    .get_json(url, &[("cas_rn", value)])?
                    .and_then(|body| parse_detail(&body))
                    .into_iter()
                    .collect())
            }
            IdentifierType::Name => {
                let url = endpoint(self.source(), &self.base_url, &["search"])?;
                Ok(self
                    .http
                    .get_json(url, &[("q", value)])?
                    .map(|body| parse_search(&body, value))
                    .unwrap_or_default())
            }
            other => Err(unsupported(self.source(), other)),
        }
    }
}

pub fn parse_detail(body: &Value) -> Option<SourceRecord> {
    let cas_rn = body
        .get("rn")
        .and_then(|raw| identifier_field(IdentifierType::CasRn, raw))?;
    let mut record = SourceRecord::new(SourceId::Cas, cas_rn.to_string());
    record.set("cas_rn", Some(cas_rn));
    record.set("name", text_at(body, "/name").map(strip_markup).map(FieldValue::Text));
    if let Some(inchikey) = body.get("inchiKey") {
        record.set("inchikey", identifier_field(IdentifierType::Inchikey, inchikey));
    }
    record.set(
        "molecular_formula",
        text_at(body, "/molecularFormula")
            .map(strip_markup)
            .map(FieldValue::Text),
    );
    record.set(
        "molecular_weight",
        text_at(body, "/molecularMass").map(FieldValue::Text),
    );
    Some(record)
}

/// Exact (case-insensitive) name hits win; otherwise every hit is returned
/// and the caller sees an ambiguous match.
pub fn parse_search(body: &Value, term: &str) -> Vec<SourceRecord> {
    let Some(results) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    let records = results
        .iter()
        .filter_map(|hit| {
            let cas_rn = hit
                .get("rn")
                .and_then(|raw| identifier_field(IdentifierType::CasRn, raw))?;
            let name = text_at(hit, "/name").map(strip_markup);
            let mut record = SourceRecord::new(SourceId::Cas, cas_rn.to_string());
            record.set("cas_rn", Some(cas_rn));
            record.set("name", name.map(FieldValue::Text));
            Some(record)
        })
        .collect::<Vec<_>>();

    let exact = records
        .iter()
        .filter(|record| {
            record
                .fields
                .get("name")
                .map(|name| name.to_string().eq_ignore_ascii_case(term))
                .unwrap_or(false)
        })
        .cloned()
        .collect::<Vec<_>>();
    if exact.is_empty() { records } else { exact }
}

/// Formulas come back as `C<sub>6</sub>H<sub>12</sub>O<sub>6</sub>`.
fn strip_markup(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formula_markup() {
        assert_eq!(
            strip_markup("C<sub>6</sub>H<sub>12</sub>O<sub>6</sub>".to_string()),
            "C6H12O6"
        );
    }
}
