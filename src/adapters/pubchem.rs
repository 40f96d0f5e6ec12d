use std::time::Duration;

use serde_json::Value;

use crate::adapters::http::{JsonFetcher, endpoint, text_at};
use crate::adapters::{HttpSettings, IdentifierAdapter, identifier_field, unsupported};
use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::{FieldValue, SourceRecord};
use crate::error::{KiraError, LookupError};

const BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
const PROPERTIES: &str =
    "MolecularFormula,MolecularWeight,InChIKey,IUPACName,CanonicalSMILES,SMILES";

/// PubChem PUG REST compound properties.
pub struct PubchemHttpClient {
    http: JsonFetcher,
    base_url: String,
}

impl PubchemHttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, KiraError> {
        Ok(Self {
            http: JsonFetcher::new(SourceId::Pubchem, settings, Duration::from_millis(200), &[])?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
        })
    }
}

impl IdentifierAdapter for PubchemHttpClient {
    fn source(&self) -> SourceId {
        SourceId::Pubchem
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        matches!(
            kind,
            IdentifierType::Name
                | IdentifierType::CasRn
                | IdentifierType::Inchikey
                | IdentifierType::PubchemCid
        )
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == EntityKind::Ingredient
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        let namespace = match kind {
            // CAS numbers are indexed as compound synonyms.
            IdentifierType::Name | IdentifierType::CasRn => "name",
            IdentifierType::Inchikey => "inchikey",
            IdentifierType::PubchemCid => "cid",
            other => return Err(unsupported(self.source(), other)),
        };
        let url = endpoint(
            self.source(),
            &self.base_url,
            &["compound", namespace, value, "property", PROPERTIES, "JSON"],
        )?;
        match self.http.get_json(url, &[])? {
            Some(body) => Ok(parse_properties(&body)),
            None => Ok(Vec::new()),
        }
    }
}

pub fn parse_properties(body: &Value) -> Vec<SourceRecord> {
    let Some(properties) = body.pointer("/PropertyTable/Properties").and_then(Value::as_array)
    else {
        return Vec::new();
    };
    properties
        .iter()
        .filter_map(|entry| {
            let cid = text_at(entry, "/CID")?;
            let mut record = SourceRecord::new(SourceId::Pubchem, cid.clone());
            record.set(
                "pubchem_cid",
                identifier_field(IdentifierType::PubchemCid, &Value::String(cid)),
            );
            if let Some(inchikey) = entry.get("InChIKey") {
                record.set("inchikey", identifier_field(IdentifierType::Inchikey, inchikey));
            }
            record.set("molecular_formula", text_at(entry, "/MolecularFormula").map(FieldValue::Text));
            record.set("molecular_weight", text_at(entry, "/MolecularWeight").map(FieldValue::Text));
            record.set("iupac_name", text_at(entry, "/IUPACName").map(FieldValue::Text));
            let smiles = text_at(entry, "/CanonicalSMILES")
                .or_else(|| text_at(entry, "/ConnectivitySMILES"))
                .or_else(|| text_at(entry, "/SMILES"));
            record.set("smiles", smiles.map(FieldValue::Text));
            Some(record)
        })
        .collect()
}
