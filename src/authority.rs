use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::SourceId;

/// Which source is ground truth for which field.
///
/// A field has at most one authoritative source, so precedence between two
/// disagreeing values never depends on which one arrived first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAuthorityTable {
    authorities: BTreeMap<String, SourceId>,
}

impl SourceAuthorityTable {
    pub fn empty() -> Self {
        Self {
            authorities: BTreeMap::new(),
        }
    }

    pub fn is_authoritative(&self, source: SourceId, field: &str) -> bool {
        self.authorities.get(field) == Some(&source)
    }

    pub fn authority_for(&self, field: &str) -> Option<SourceId> {
        self.authorities.get(field).copied()
    }

    /// Makes `source` the authority for `field`, replacing any previous one.
    pub fn set(&mut self, field: &str, source: SourceId) {
        self.authorities.insert(field.to_string(), source);
    }

    /// Drops the policy entry so the field falls back to first-seen-wins.
    pub fn clear(&mut self, field: &str) {
        self.authorities.remove(field);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, SourceId)> {
        self.authorities
            .iter()
            .map(|(field, source)| (field.as_str(), *source))
    }
}

impl Default for SourceAuthorityTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for field in ["name", "chebi_id", "definition"] {
            table.set(field, SourceId::Chebi);
        }
        for field in [
            "pubchem_cid",
            "inchikey",
            "molecular_formula",
            "molecular_weight",
            "iupac_name",
            "smiles",
        ] {
            table.set(field, SourceId::Pubchem);
        }
        table.set("cas_rn", SourceId::Cas);
        for field in ["ncbi_taxon_id", "scientific_name", "rank"] {
            table.set(field, SourceId::NcbiTaxon);
        }
        for field in ["bacdive_id", "strain_designation"] {
            table.set(field, SourceId::Bacdive);
        }
        table.set("mediadive_id", SourceId::Mediadive);
        table
    }
}
