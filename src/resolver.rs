use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authority::SourceAuthorityTable;
use crate::domain::{EntitySeed, Identifier, SourceId};
use crate::entity::{DataConflict, EnrichedEntity, FieldValue, ResolutionReason, SourceRecord};

pub const PLACEHOLDER_PREFIX: &str = "ph-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaceholderPolicy {
    /// Fresh UUID v4 per key computation.
    #[default]
    Random,
    /// UUID v5 over kind, segment and seed name: stable across runs.
    NameDerived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    Known(String),
    Placeholder(String),
}

impl KeySegment {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, KeySegment::Placeholder(_))
    }

    fn parse(value: &str) -> Self {
        if value.starts_with(PLACEHOLDER_PREFIX) {
            KeySegment::Placeholder(value.to_string())
        } else {
            KeySegment::Known(value.to_string())
        }
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Known(value) | KeySegment::Placeholder(value) => f.write_str(value),
        }
    }
}

/// `<structural id or placeholder>|<registry id or placeholder>`.
///
/// Ingredients use InChIKey and CAS-RN, strains NCBI taxon id and BacDive id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    pub primary: KeySegment,
    pub secondary: KeySegment,
}

impl CompositeKey {
    pub fn parse(value: &str) -> Option<Self> {
        let (primary, secondary) = value.split_once('|')?;
        if primary.is_empty() || secondary.is_empty() {
            return None;
        }
        Some(Self {
            primary: KeySegment::parse(primary),
            secondary: KeySegment::parse(secondary),
        })
    }

    pub fn placeholder_count(&self) -> usize {
        [&self.primary, &self.secondary]
            .into_iter()
            .filter(|segment| segment.is_placeholder())
            .count()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.primary, self.secondary)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub conflicts: Vec<DataConflict>,
    pub new_identifiers: Vec<Identifier>,
    pub changed: bool,
}

/// Computes composite keys and merges source records into entities.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    authority: SourceAuthorityTable,
    placeholder: PlaceholderPolicy,
}

impl Resolver {
    pub fn new(authority: SourceAuthorityTable, placeholder: PlaceholderPolicy) -> Self {
        Self {
            authority,
            placeholder,
        }
    }

    pub fn authority(&self) -> &SourceAuthorityTable {
        &self.authority
    }

    pub fn placeholder_policy(&self) -> PlaceholderPolicy {
        self.placeholder
    }

    pub fn compute_key(&self, seed: &EntitySeed) -> CompositeKey {
        let (primary, secondary) = seed.key_values();
        CompositeKey {
            primary: self.segment(primary, seed, "primary"),
            secondary: self.segment(secondary, seed, "secondary"),
        }
    }

    fn segment(&self, value: Option<&str>, seed: &EntitySeed, slot: &str) -> KeySegment {
        if let Some(value) = value {
            return KeySegment::Known(value.to_string());
        }
        let id = match self.placeholder {
            PlaceholderPolicy::Random => Uuid::new_v4(),
            PlaceholderPolicy::NameDerived => {
                let basis = seed
                    .name()
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| seed.label());
                let material = format!("{}|{slot}|{basis}", seed.kind());
                Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes())
            }
        };
        KeySegment::Placeholder(format!("{PLACEHOLDER_PREFIX}{id}"))
    }

    /// Key rebuilt from identifiers discovered on the entity, replacing
    /// placeholder segments. `None` when nothing would change.
    pub fn rekeyed(&self, entity: &EnrichedEntity) -> Option<CompositeKey> {
        let current = CompositeKey::parse(&entity.composite_key)?;
        let (primary_type, secondary_type) = entity.kind.key_types();
        let pick = |segment: &KeySegment, kind| match segment {
            KeySegment::Placeholder(_) => entity
                .identifiers_of(kind)
                .next()
                .map(|value| KeySegment::Known(value.to_string()))
                .unwrap_or_else(|| segment.clone()),
            KeySegment::Known(_) => segment.clone(),
        };
        let next = CompositeKey {
            primary: pick(&current.primary, primary_type),
            secondary: pick(&current.secondary, secondary_type),
        };
        (next != current).then_some(next)
    }

    /// Merges one record into the entity, returning the conflicts it caused
    /// and the identifiers it revealed.
    pub fn merge_record(
        &self,
        entity: &mut EnrichedEntity,
        record: &SourceRecord,
        run_id: &str,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let incoming_source = record.source_id;
        let key = entity.composite_key.clone();

        for (field, incoming) in &record.fields {
            let current = entity.fields.get(field).cloned();
            let current_source = entity.field_sources.get(field).copied();
            let (current, current_source) = match (current, current_source) {
                (Some(value), Some(source)) => (value, source),
                _ => {
                    entity.fields.insert(field.clone(), incoming.clone());
                    entity.field_sources.insert(field.clone(), incoming_source);
                    outcome.changed = true;
                    continue;
                }
            };
            if &current == incoming {
                // Agreement still moves provenance to the authority, so the
                // result does not depend on arrival order.
                if current_source != incoming_source
                    && current_source != SourceId::Manual
                    && self.authority.is_authoritative(incoming_source, field)
                {
                    entity.field_sources.insert(field.clone(), incoming_source);
                    outcome.changed = true;
                }
                continue;
            }

            if current_source == SourceId::Manual {
                outcome.conflicts.push(build_conflict(
                    &key,
                    field,
                    (current_source, &current),
                    (incoming_source, incoming),
                    ResolutionReason::ManualOverride,
                    run_id,
                ));
            } else if self.authority.is_authoritative(incoming_source, field) {
                outcome.conflicts.push(build_conflict(
                    &key,
                    field,
                    (incoming_source, incoming),
                    (current_source, &current),
                    ResolutionReason::AuthoritativeSource,
                    run_id,
                ));
                entity.fields.insert(field.clone(), incoming.clone());
                entity.field_sources.insert(field.clone(), incoming_source);
                outcome.changed = true;
            } else if self.authority.is_authoritative(current_source, field) {
                outcome.conflicts.push(build_conflict(
                    &key,
                    field,
                    (current_source, &current),
                    (incoming_source, incoming),
                    ResolutionReason::AuthoritativeSource,
                    run_id,
                ));
            } else {
                outcome.conflicts.push(build_conflict(
                    &key,
                    field,
                    (current_source, &current),
                    (incoming_source, incoming),
                    ResolutionReason::FirstSeen,
                    run_id,
                ));
            }
        }

        for identifier in record.identifiers() {
            if entity.discover(&identifier) {
                outcome.new_identifiers.push(identifier);
                outcome.changed = true;
            }
        }
        if entity.contributing_sources.insert(incoming_source) {
            outcome.changed = true;
        }
        if outcome.changed {
            entity.updated_at = Utc::now();
        }
        outcome
    }

    /// Pins a curator value. A differing current value loses with reason
    /// `manual-override`.
    pub fn apply_override(
        &self,
        entity: &mut EnrichedEntity,
        field: &str,
        value: &FieldValue,
        run_id: &str,
    ) -> Option<DataConflict> {
        let previous = entity.fields.get(field).cloned();
        let previous_source = entity.field_sources.get(field).copied();
        if previous.as_ref() == Some(value) && previous_source == Some(SourceId::Manual) {
            return None;
        }
        entity.fields.insert(field.to_string(), value.clone());
        entity
            .field_sources
            .insert(field.to_string(), SourceId::Manual);
        entity.updated_at = Utc::now();
        match (previous, previous_source) {
            (Some(old), Some(source)) if &old != value => Some(build_conflict(
                &entity.composite_key,
                field,
                (SourceId::Manual, value),
                (source, &old),
                ResolutionReason::ManualOverride,
                run_id,
            )),
            _ => None,
        }
    }
}

fn build_conflict(
    key: &str,
    field: &str,
    winner: (SourceId, &FieldValue),
    loser: (SourceId, &FieldValue),
    reason: ResolutionReason,
    run_id: &str,
) -> DataConflict {
    DataConflict {
        composite_key: key.to_string(),
        field: field.to_string(),
        winning_source: winner.0,
        winning_value: winner.1.clone(),
        losing_source: loser.0,
        losing_value: loser.1.clone(),
        resolution_reason: reason,
        detected_at: Utc::now(),
        run_id: run_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, IdentifierType};

    fn record(source: SourceId, fields: &[(&str, &str)]) -> SourceRecord {
        let mut record = SourceRecord::new(source, "native");
        for (field, value) in fields {
            record = record.with_field(field, FieldValue::text(*value));
        }
        record
    }

    #[test]
    fn first_value_is_set_without_conflict() {
        let resolver = Resolver::default();
        let mut entity = EnrichedEntity::new("A|B", EntityKind::Ingredient);
        let outcome = resolver.merge_record(
            &mut entity,
            &record(SourceId::Chebi, &[("name", "magnesium sulfate")]),
            "run",
        );
        assert!(outcome.conflicts.is_empty());
        assert!(outcome.changed);
        assert_eq!(entity.field_sources["name"], SourceId::Chebi);
        assert!(entity.knows(&Identifier {
            kind: IdentifierType::Name,
            value: "magnesium sulfate".to_string()
        }));
    }

    #[test]
    fn equal_values_do_not_conflict_or_change() {
        let resolver = Resolver::default();
        let mut entity = EnrichedEntity::new("A|B", EntityKind::Ingredient);
        let chebi = record(SourceId::Chebi, &[("name", "water")]);
        resolver.merge_record(&mut entity, &chebi, "run");
        let before = entity.clone();
        let outcome = resolver.merge_record(&mut entity, &chebi, "run");
        assert!(!outcome.changed);
        assert_eq!(entity, before);
    }

    #[test]
    fn manual_override_wins() {
        let resolver = Resolver::default();
        let mut entity = EnrichedEntity::new("A|B", EntityKind::Ingredient);
        resolver.merge_record(&mut entity, &record(SourceId::Chebi, &[("name", "a")]), "run");
        let pinned = resolver
            .apply_override(&mut entity, "name", &FieldValue::text("b"), "run")
            .unwrap();
        assert_eq!(pinned.losing_source, SourceId::Chebi);

        let outcome =
            resolver.merge_record(&mut entity, &record(SourceId::Chebi, &[("name", "a")]), "run");
        assert_eq!(entity.field_text("name").as_deref(), Some("b"));
        assert_eq!(
            outcome.conflicts[0].resolution_reason,
            ResolutionReason::ManualOverride
        );
    }

    #[test]
    fn rekey_replaces_placeholders_only() {
        let resolver = Resolver::default();
        let mut entity = EnrichedEntity::new("ph-1|7487-88-9", EntityKind::Ingredient);
        assert!(resolver.rekeyed(&entity).is_none());
        entity.discover(&Identifier {
            kind: IdentifierType::Inchikey,
            value: "CSNNHWWHGAXBCP-UHFFFAOYSA-L".to_string(),
        });
        let next = resolver.rekeyed(&entity).unwrap();
        assert_eq!(next.to_string(), "CSNNHWWHGAXBCP-UHFFFAOYSA-L|7487-88-9");
    }
}
