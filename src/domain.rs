use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Pubchem,
    Chebi,
    Cas,
    Mediadive,
    Bacdive,
    NcbiTaxon,
    NodeNorm,
    /// Curator-supplied value from a manual override.
    Manual,
}

impl SourceId {
    pub const ADAPTERS: [SourceId; 7] = [
        SourceId::Chebi,
        SourceId::Pubchem,
        SourceId::Cas,
        SourceId::Mediadive,
        SourceId::NodeNorm,
        SourceId::NcbiTaxon,
        SourceId::Bacdive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Pubchem => "pubchem",
            SourceId::Chebi => "chebi",
            SourceId::Cas => "cas",
            SourceId::Mediadive => "mediadive",
            SourceId::Bacdive => "bacdive",
            SourceId::NcbiTaxon => "ncbi_taxon",
            SourceId::NodeNorm => "node_norm",
            SourceId::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pubchem" => Ok(SourceId::Pubchem),
            "chebi" => Ok(SourceId::Chebi),
            "cas" => Ok(SourceId::Cas),
            "mediadive" => Ok(SourceId::Mediadive),
            "bacdive" => Ok(SourceId::Bacdive),
            "ncbi_taxon" | "ncbi" => Ok(SourceId::NcbiTaxon),
            "node_norm" | "nodenorm" => Ok(SourceId::NodeNorm),
            "manual" => Ok(SourceId::Manual),
            _ => Err(KiraError::UnknownSource(value.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Ingredient,
    Strain,
}

impl EntityKind {
    /// Identifier types that make up the two composite-key segments.
    pub fn key_types(&self) -> (IdentifierType, IdentifierType) {
        match self {
            EntityKind::Ingredient => (IdentifierType::Inchikey, IdentifierType::CasRn),
            EntityKind::Strain => (IdentifierType::NcbiTaxonId, IdentifierType::BacdiveId),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Ingredient => "ingredient",
            EntityKind::Strain => "strain",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Name,
    CasRn,
    Inchikey,
    ChebiId,
    PubchemCid,
    NcbiTaxonId,
    BacdiveId,
    MediadiveId,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 8] = [
        IdentifierType::Name,
        IdentifierType::CasRn,
        IdentifierType::Inchikey,
        IdentifierType::ChebiId,
        IdentifierType::PubchemCid,
        IdentifierType::NcbiTaxonId,
        IdentifierType::BacdiveId,
        IdentifierType::MediadiveId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Name => "name",
            IdentifierType::CasRn => "cas_rn",
            IdentifierType::Inchikey => "inchikey",
            IdentifierType::ChebiId => "chebi_id",
            IdentifierType::PubchemCid => "pubchem_cid",
            IdentifierType::NcbiTaxonId => "ncbi_taxon_id",
            IdentifierType::BacdiveId => "bacdive_id",
            IdentifierType::MediadiveId => "mediadive_id",
        }
    }

    /// Maps a record field name onto an identifier type, if it is one.
    pub fn from_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == field)
    }

    /// Parses and canonicalises a raw value of this type.
    pub fn normalize(&self, raw: &str) -> Result<String, KiraError> {
        match self {
            IdentifierType::Name => normalize_name(raw),
            IdentifierType::CasRn => raw.parse::<CasRn>().map(|cas| cas.0),
            IdentifierType::Inchikey => raw.parse::<InchiKey>().map(|key| key.0),
            IdentifierType::ChebiId => normalize_chebi(raw),
            IdentifierType::PubchemCid => normalize_numeric(*self, raw, &["CID", "PUBCHEM.COMPOUND:"]),
            IdentifierType::NcbiTaxonId => normalize_numeric(*self, raw, &["NCBITaxon:", "taxon:"]),
            IdentifierType::BacdiveId => normalize_numeric(*self, raw, &["bacdive:"]),
            IdentifierType::MediadiveId => normalize_numeric(*self, raw, &["mediadive.ingredient:"]),
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let alias = match normalized.as_str() {
            "cas" => "cas_rn",
            "chebi" => "chebi_id",
            "cid" | "pubchem" => "pubchem_cid",
            "taxon" | "ncbi_taxon" => "ncbi_taxon_id",
            "bacdive" => "bacdive_id",
            "mediadive" => "mediadive_id",
            other => other,
        };
        Self::from_field(alias).ok_or_else(|| KiraError::UnknownIdentifierType(value.to_string()))
    }
}

/// A typed, normalised identifier such as `cas_rn:7487-88-9`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentifierType,
    pub value: String,
}

impl Identifier {
    pub fn parse(kind: IdentifierType, raw: &str) -> Result<Self, KiraError> {
        Ok(Self {
            kind,
            value: kind.normalize(raw)?,
        })
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl FromStr for Identifier {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| KiraError::InvalidSpecifier(value.to_string()))?;
        Identifier::parse(kind.parse()?, rest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CasRn(String);

impl CasRn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CasRn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CasRn {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_start_matches("CAS:").trim();
        let parts = normalized.split('-').collect::<Vec<_>>();
        let shape_ok = parts.len() == 3
            && (2..=7).contains(&parts[0].len())
            && parts[1].len() == 2
            && parts[2].len() == 1
            && parts
                .iter()
                .all(|part| part.chars().all(|ch| ch.is_ascii_digit()));
        if !shape_ok {
            return Err(KiraError::InvalidCasRn(value.to_string()));
        }

        // Check digit: weighted sum of the other digits, right to left, mod 10.
        let body = format!("{}{}", parts[0], parts[1]);
        let sum: u32 = body
            .chars()
            .rev()
            .enumerate()
            .filter_map(|(idx, ch)| ch.to_digit(10).map(|digit| digit * (idx as u32 + 1)))
            .sum();
        let check = parts[2].chars().next().and_then(|ch| ch.to_digit(10));
        if check != Some(sum % 10) {
            return Err(KiraError::InvalidCasRn(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InchiKey(String);

impl InchiKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InchiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InchiKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let trimmed = trimmed
            .strip_prefix("InChIKey=")
            .or_else(|| trimmed.strip_prefix("INCHIKEY:"))
            .unwrap_or(trimmed);
        let normalized = trimmed.to_uppercase();
        let parts = normalized.split('-').collect::<Vec<_>>();
        let is_valid = parts.len() == 3
            && parts[0].len() == 14
            && parts[1].len() == 10
            && parts[2].len() == 1
            && parts
                .iter()
                .all(|part| part.chars().all(|ch| ch.is_ascii_uppercase()));
        if !is_valid {
            return Err(KiraError::InvalidInchiKey(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn normalize_name(raw: &str) -> Result<String, KiraError> {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if collapsed.is_empty() {
        return Err(KiraError::InvalidName(raw.to_string()));
    }
    Ok(collapsed)
}

fn normalize_chebi(raw: &str) -> Result<String, KiraError> {
    let trimmed = raw.trim();
    let digits = match trimmed.split_once(':') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case("chebi") => rest,
        Some(_) => return Err(KiraError::InvalidChebiId(raw.to_string())),
        None => trimmed,
    };
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(KiraError::InvalidChebiId(raw.to_string()));
    }
    let number = digits
        .parse::<u64>()
        .map_err(|_| KiraError::InvalidChebiId(raw.to_string()))?;
    Ok(format!("CHEBI:{number}"))
}

fn normalize_numeric(
    kind: IdentifierType,
    raw: &str,
    prefixes: &[&str],
) -> Result<String, KiraError> {
    let trimmed = raw.trim();
    let stripped = prefixes
        .iter()
        .find_map(|prefix| {
            trimmed
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| &trimmed[prefix.len()..])
        })
        .unwrap_or(trimmed)
        .trim();
    stripped
        .parse::<u64>()
        .map(|number| number.to_string())
        .map_err(|_| KiraError::InvalidNumericId {
            kind: kind.to_string(),
            value: raw.to_string(),
        })
}

/// Seed for a growth-media ingredient, validated at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientSeed {
    pub name: Option<String>,
    pub cas_rn: Option<CasRn>,
    pub inchikey: Option<InchiKey>,
    pub mediadive_id: Option<String>,
}

impl IngredientSeed {
    pub fn new(
        name: Option<&str>,
        cas_rn: Option<&str>,
        inchikey: Option<&str>,
    ) -> Result<Self, KiraError> {
        let seed = Self {
            name: name.map(normalize_name).transpose()?,
            cas_rn: cas_rn.map(str::parse::<CasRn>).transpose()?,
            inchikey: inchikey.map(str::parse::<InchiKey>).transpose()?,
            mediadive_id: None,
        };
        if seed.name.is_none() && seed.cas_rn.is_none() && seed.inchikey.is_none() {
            return Err(KiraError::InvalidSpecifier(
                "ingredient seed needs a name, CAS-RN or InChIKey".to_string(),
            ));
        }
        Ok(seed)
    }

    /// Seeds an ingredient from its MediaDive ingredient id alone.
    pub fn from_mediadive(raw: &str) -> Result<Self, KiraError> {
        Ok(Self {
            name: None,
            cas_rn: None,
            inchikey: None,
            mediadive_id: Some(IdentifierType::MediadiveId.normalize(raw)?),
        })
    }

    pub fn with_mediadive_id(mut self, raw: Option<&str>) -> Result<Self, KiraError> {
        if let Some(raw) = raw {
            self.mediadive_id = Some(IdentifierType::MediadiveId.normalize(raw)?);
        }
        Ok(self)
    }
}

/// Seed for a microbial strain, validated at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrainSeed {
    pub name: Option<String>,
    pub ncbi_taxon_id: Option<String>,
    pub bacdive_id: Option<String>,
}

impl StrainSeed {
    pub fn new(
        name: Option<&str>,
        ncbi_taxon_id: Option<&str>,
        bacdive_id: Option<&str>,
    ) -> Result<Self, KiraError> {
        let seed = Self {
            name: name.map(normalize_name).transpose()?,
            ncbi_taxon_id: ncbi_taxon_id
                .map(|raw| IdentifierType::NcbiTaxonId.normalize(raw))
                .transpose()?,
            bacdive_id: bacdive_id
                .map(|raw| IdentifierType::BacdiveId.normalize(raw))
                .transpose()?,
        };
        if seed.name.is_none() && seed.ncbi_taxon_id.is_none() && seed.bacdive_id.is_none() {
            return Err(KiraError::InvalidSpecifier(
                "strain seed needs a name, NCBI taxon id or BacDive id".to_string(),
            ));
        }
        Ok(seed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySeed {
    Ingredient(IngredientSeed),
    Strain(StrainSeed),
}

impl EntitySeed {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySeed::Ingredient(_) => EntityKind::Ingredient,
            EntitySeed::Strain(_) => EntityKind::Strain,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EntitySeed::Ingredient(seed) => seed.name.as_deref(),
            EntitySeed::Strain(seed) => seed.name.as_deref(),
        }
    }

    /// Seed identifiers, strongest first. This order is the first frontier.
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut identifiers = Vec::new();
        match self {
            EntitySeed::Ingredient(seed) => {
                if let Some(key) = &seed.inchikey {
                    identifiers.push(identifier(IdentifierType::Inchikey, key.as_str()));
                }
                if let Some(cas) = &seed.cas_rn {
                    identifiers.push(identifier(IdentifierType::CasRn, cas.as_str()));
                }
                if let Some(mediadive) = &seed.mediadive_id {
                    identifiers.push(identifier(IdentifierType::MediadiveId, mediadive));
                }
            }
            EntitySeed::Strain(seed) => {
                if let Some(taxon) = &seed.ncbi_taxon_id {
                    identifiers.push(identifier(IdentifierType::NcbiTaxonId, taxon));
                }
                if let Some(bacdive) = &seed.bacdive_id {
                    identifiers.push(identifier(IdentifierType::BacdiveId, bacdive));
                }
            }
        }
        if let Some(name) = self.name() {
            identifiers.push(identifier(IdentifierType::Name, name));
        }
        identifiers
    }

    /// The seed value for each of the two key segments of this entity kind.
    pub fn key_values(&self) -> (Option<&str>, Option<&str>) {
        match self {
            EntitySeed::Ingredient(seed) => (
                seed.inchikey.as_ref().map(InchiKey::as_str),
                seed.cas_rn.as_ref().map(CasRn::as_str),
            ),
            EntitySeed::Strain(seed) => (seed.ncbi_taxon_id.as_deref(), seed.bacdive_id.as_deref()),
        }
    }

    /// Human-readable label used in logs and as the placeholder basis.
    pub fn label(&self) -> String {
        self.identifiers()
            .iter()
            .map(Identifier::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromStr for EntitySeed {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (kind, rest) = trimmed
            .split_once(':')
            .ok_or_else(|| KiraError::InvalidSpecifier(value.to_string()))?;
        match kind {
            "ingredient" => Ok(EntitySeed::Ingredient(IngredientSeed::new(
                Some(rest),
                None,
                None,
            )?)),
            "cas" => Ok(EntitySeed::Ingredient(IngredientSeed::new(
                None,
                Some(rest),
                None,
            )?)),
            "inchikey" => Ok(EntitySeed::Ingredient(IngredientSeed::new(
                None,
                None,
                Some(rest),
            )?)),
            "mediadive" => Ok(EntitySeed::Ingredient(IngredientSeed::from_mediadive(rest)?)),
            "strain" => Ok(EntitySeed::Strain(StrainSeed::new(Some(rest), None, None)?)),
            "taxon" => Ok(EntitySeed::Strain(StrainSeed::new(None, Some(rest), None)?)),
            "bacdive" => Ok(EntitySeed::Strain(StrainSeed::new(None, None, Some(rest))?)),
            _ => Err(KiraError::InvalidSpecifier(value.to_string())),
        }
    }
}

fn identifier(kind: IdentifierType, value: &str) -> Identifier {
    Identifier {
        kind,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_cas_rn_with_check_digit() {
        let cas: CasRn = "7487-88-9".parse().unwrap();
        assert_eq!(cas.as_str(), "7487-88-9");
        let err = "7487-88-1".parse::<CasRn>().unwrap_err();
        assert_matches!(err, KiraError::InvalidCasRn(_));
    }

    #[test]
    fn parse_inchikey_strips_prefix() {
        let key: InchiKey = "InChIKey=csnnhwwhgaxbcp-uhfffaoysa-l".parse().unwrap();
        assert_eq!(key.as_str(), "CSNNHWWHGAXBCP-UHFFFAOYSA-L");
    }

    #[test]
    fn normalize_chebi_forms() {
        assert_eq!(IdentifierType::ChebiId.normalize("32599").unwrap(), "CHEBI:32599");
        assert_eq!(IdentifierType::ChebiId.normalize("chebi:032599").unwrap(), "CHEBI:32599");
        assert_matches!(
            IdentifierType::ChebiId.normalize("PUBCHEM:1"),
            Err(KiraError::InvalidChebiId(_))
        );
    }

    #[test]
    fn normalize_numeric_prefixes() {
        assert_eq!(IdentifierType::PubchemCid.normalize("CID24083").unwrap(), "24083");
        assert_eq!(IdentifierType::NcbiTaxonId.normalize("NCBITaxon:562").unwrap(), "562");
        assert_matches!(
            IdentifierType::BacdiveId.normalize("abc"),
            Err(KiraError::InvalidNumericId { .. })
        );
    }

    #[test]
    fn seed_identifier_order() {
        let seed: EntitySeed = "cas:7487-88-9".parse().unwrap();
        assert_eq!(seed.kind(), EntityKind::Ingredient);
        assert_eq!(seed.identifiers()[0].to_string(), "cas_rn:7487-88-9");

        let err = IngredientSeed::new(None, None, None).unwrap_err();
        assert_matches!(err, KiraError::InvalidSpecifier(_));
    }

    #[test]
    fn mediadive_specifier_seeds_ingredient() {
        let seed: EntitySeed = "mediadive:12".parse().unwrap();
        assert_eq!(seed.kind(), EntityKind::Ingredient);
        assert_eq!(seed.key_values(), (None, None));
        assert_eq!(seed.identifiers()[0].to_string(), "mediadive_id:12");
    }

    #[test]
    fn names_are_lowercased_and_collapsed() {
        let id = Identifier::parse(IdentifierType::Name, "  Magnesium   Sulfate ").unwrap();
        assert_eq!(id.value, "magnesium sulfate");
    }
}
