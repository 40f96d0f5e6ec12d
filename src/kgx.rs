//! KGX TSV export of stored entities: one node per entity, one
//! `biolink:same_as` edge per alternate identifier.

use std::collections::BTreeSet;

use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;

use crate::domain::{EntityKind, IdentifierType, SourceId};
use crate::entity::EnrichedEntity;
use crate::error::KiraError;
use crate::fs_util::write_atomic;
use crate::store::Store;

const DEFAULT_PREFIXES: [&str; 7] = [
    "CHEBI",
    "PUBCHEM.COMPOUND",
    "CAS",
    "INCHIKEY",
    "NCBITaxon",
    "bacdive",
    "mediadive.ingredient",
];

const NODE_HEADER: &str = "id\tcategory\tname\tprovided_by";
const EDGE_HEADER: &str =
    "subject\tpredicate\tobject\tknowledge_level\tagent_type\tprimary_knowledge_source";

/// Decides which CURIEs may appear in the export. A CURIE passes when its
/// prefix is accepted, or when it matches one of the extra patterns.
#[derive(Debug, Clone)]
pub struct CuriePolicy {
    prefixes: BTreeSet<String>,
    patterns: Vec<Regex>,
}

impl CuriePolicy {
    pub fn new<I, S>(prefixes: I, patterns: &[String]) -> Result<Self, KiraError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            patterns: Vec::new(),
        }
        .with_patterns(patterns)
    }

    pub fn with_patterns(mut self, patterns: &[String]) -> Result<Self, KiraError> {
        for pattern in patterns {
            let regex = Regex::new(pattern)
                .map_err(|err| KiraError::InvalidCuriePattern(format!("{pattern}: {err}")))?;
            self.patterns.push(regex);
        }
        Ok(self)
    }

    pub fn is_valid(&self, curie: &str) -> bool {
        let prefixed = curie.split_once(':').is_some_and(|(prefix, local)| {
            self.prefixes.contains(prefix)
                && !local.is_empty()
                && !local.chars().any(char::is_whitespace)
        });
        prefixed || self.patterns.iter().any(|pattern| pattern.is_match(curie))
    }
}

impl Default for CuriePolicy {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_PREFIXES.iter().map(|prefix| prefix.to_string()).collect(),
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub out_dir: String,
    pub nodes: usize,
    pub edges: usize,
    pub skipped_entities: usize,
    pub rejected_curies: usize,
}

/// Identifier types in node-id preference order, with their CURIE prefix.
fn curie_order(kind: EntityKind) -> &'static [(IdentifierType, Option<&'static str>)] {
    match kind {
        EntityKind::Ingredient => &[
            // ChEBI ids are stored with their prefix already.
            (IdentifierType::ChebiId, None),
            (IdentifierType::PubchemCid, Some("PUBCHEM.COMPOUND")),
            (IdentifierType::CasRn, Some("CAS")),
            (IdentifierType::Inchikey, Some("INCHIKEY")),
            (IdentifierType::MediadiveId, Some("mediadive.ingredient")),
        ],
        EntityKind::Strain => &[
            (IdentifierType::NcbiTaxonId, Some("NCBITaxon")),
            (IdentifierType::BacdiveId, Some("bacdive")),
        ],
    }
}

fn category(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Ingredient => "biolink:ChemicalEntity",
        EntityKind::Strain => "biolink:OrganismTaxon",
    }
}

fn infores(source: SourceId) -> String {
    format!("infores:{}", source.as_str().replace('_', "-"))
}

/// CURIEs of an entity in preference order, paired with the source that
/// supplied each identifier type when known.
fn curies(entity: &EnrichedEntity) -> Vec<(String, Option<SourceId>)> {
    let mut curies = Vec::new();
    for (kind, prefix) in curie_order(entity.kind) {
        let source = entity.field_sources.get(kind.as_str()).copied();
        for value in entity.identifiers_of(*kind) {
            let curie = match prefix {
                Some(prefix) => format!("{prefix}:{value}"),
                None => value.to_string(),
            };
            curies.push((curie, source));
        }
    }
    curies
}

fn tsv_cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// Writes `nodes.tsv` and `edges.tsv` for every stored entity `predicate`
/// accepts.
pub fn export<P>(
    store: &Store,
    predicate: P,
    policy: &CuriePolicy,
    out_dir: &Utf8Path,
) -> Result<ExportSummary, KiraError>
where
    P: Fn(&EnrichedEntity) -> bool,
{
    let entities = store.export(predicate)?;
    let mut summary = ExportSummary {
        out_dir: out_dir.to_string(),
        ..ExportSummary::default()
    };
    let mut nodes = vec![NODE_HEADER.to_string()];
    let mut edges = vec![EDGE_HEADER.to_string()];

    for entity in &entities {
        let mut valid = Vec::new();
        for (curie, source) in curies(entity) {
            if policy.is_valid(&curie) {
                valid.push((curie, source));
            } else {
                tracing::warn!(key = %entity.composite_key, %curie, "rejected CURIE");
                summary.rejected_curies += 1;
            }
        }
        let Some(((node_id, _), alternates)) = valid.split_first() else {
            tracing::warn!(key = %entity.composite_key, "no exportable identifier; skipping");
            summary.skipped_entities += 1;
            continue;
        };

        let provided_by = entity
            .contributing_sources
            .iter()
            .filter(|source| **source != SourceId::Manual)
            .map(|source| infores(*source))
            .collect::<Vec<_>>()
            .join("|");
        nodes.push(format!(
            "{}\t{}\t{}\t{}",
            tsv_cell(node_id),
            category(entity.kind),
            tsv_cell(&entity.field_text("name").unwrap_or_default()),
            provided_by
        ));
        summary.nodes += 1;

        for (alternate, source) in alternates {
            let knowledge_source = source
                .map(infores)
                .unwrap_or_else(|| "infores:kira-culture-enrich".to_string());
            edges.push(format!(
                "{}\tbiolink:same_as\t{}\tknowledge_assertion\tautomated_agent\t{}",
                tsv_cell(node_id),
                tsv_cell(alternate),
                knowledge_source
            ));
            summary.edges += 1;
        }
    }

    write_atomic(&out_dir.join("nodes.tsv"), (nodes.join("\n") + "\n").as_bytes())?;
    write_atomic(&out_dir.join("edges.tsv"), (edges.join("\n") + "\n").as_bytes())?;
    tracing::info!(
        nodes = summary.nodes,
        edges = summary.edges,
        skipped = summary.skipped_entities,
        out_dir = %out_dir,
        "kgx export written"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_policy_checks_prefix_and_local_part() {
        let policy = CuriePolicy::default();
        assert!(policy.is_valid("CHEBI:32599"));
        assert!(policy.is_valid("NCBITaxon:562"));
        assert!(!policy.is_valid("FOO:1"));
        assert!(!policy.is_valid("CHEBI:"));
        assert!(!policy.is_valid("CAS:7487 88 9"));
    }

    #[test]
    fn extra_patterns_widen_policy() {
        let policy = CuriePolicy::default()
            .with_patterns(&[r"^kgmicrobe\.ingredient:\d+$".to_string()])
            .unwrap();
        assert!(policy.is_valid("kgmicrobe.ingredient:12"));
        assert!(!policy.is_valid("kgmicrobe.ingredient:x"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let err = CuriePolicy::new(["CHEBI"], &["(".to_string()]).unwrap_err();
        assert_matches!(err, KiraError::InvalidCuriePattern(_));
    }
}
