mod common;

use std::thread;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};

use kira_culture_enrich::domain::{EntityKind, EntitySeed, Identifier, IdentifierType, SourceId};
use kira_culture_enrich::entity::{DataConflict, EnrichedEntity, FieldValue, ResolutionReason};
use kira_culture_enrich::error::KiraError;
use kira_culture_enrich::resolver::Resolver;
use kira_culture_enrich::store::{ConflictDedup, Rekeyed};

use common::{record, temp_store};

fn id(kind: IdentifierType, value: &str) -> Identifier {
    Identifier::parse(kind, value).unwrap()
}

fn conflict(run_id: &str) -> DataConflict {
    DataConflict {
        composite_key: "A|B".to_string(),
        field: "name".to_string(),
        winning_source: SourceId::Chebi,
        winning_value: FieldValue::text("magnesium sulfate"),
        losing_source: SourceId::Cas,
        losing_value: FieldValue::text("Epsom salt component"),
        resolution_reason: ResolutionReason::AuthoritativeSource,
        detected_at: Utc::now(),
        run_id: run_id.to_string(),
    }
}

#[test]
fn layout_paths() {
    let (_temp, store) = temp_store();
    assert!(store.project_root().ends_with(".kira-ce"));
    assert!(store.entity_path("A|B").ends_with("entities/A+B.json"));
    assert!(store.records_path("A|B").ends_with("records/A+B.jsonl"));
    assert!(store.run_path("run-1").ends_with("runs/run-1.json"));
}

#[test]
fn upsert_get_and_list() {
    let (_temp, store) = temp_store();
    assert!(store.get("A|B").unwrap().is_none());
    assert_matches!(store.get_required("A|B"), Err(KiraError::EntityNotFound(_)));

    let mut strain = EnrichedEntity::new("562|4907", EntityKind::Strain);
    strain.fields.insert("rank".to_string(), FieldValue::text("species"));
    store.upsert(&strain).unwrap();
    store
        .upsert(&EnrichedEntity::new("ph-1|7487-88-9", EntityKind::Ingredient))
        .unwrap();

    assert_eq!(store.get_required("562|4907").unwrap(), strain);
    let keys = store
        .list()
        .unwrap()
        .into_iter()
        .map(|entity| entity.composite_key)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["562|4907", "ph-1|7487-88-9"]);

    let strains = store
        .export(|entity| entity.kind == EntityKind::Strain)
        .unwrap();
    assert_eq!(strains.len(), 1);
}

#[test]
fn conflict_dedup_modes() {
    let (_temp, store) = temp_store();
    assert_eq!(store.conflict_dedup(), ConflictDedup::PerExecution);
    assert_eq!(store.append_conflicts(&[conflict("run-1")]).unwrap(), 1);
    assert_eq!(store.append_conflicts(&[conflict("run-1")]).unwrap(), 0);
    assert_eq!(store.append_conflicts(&[conflict("run-2")]).unwrap(), 1);

    let (_temp, store) = temp_store();
    let store = store.with_conflict_dedup(ConflictDedup::Global);
    assert_eq!(store.append_conflicts(&[conflict("run-1")]).unwrap(), 1);
    assert_eq!(store.append_conflicts(&[conflict("run-2")]).unwrap(), 0);
    assert_eq!(store.all_conflicts(Some("A|B")).unwrap().len(), 1);
    assert!(store.all_conflicts(Some("C|D")).unwrap().is_empty());
}

#[test]
fn global_dedup_survives_reopening_the_store() {
    let (_temp, store) = temp_store();
    let store = store.with_conflict_dedup(ConflictDedup::Global);
    store.append_conflicts(&[conflict("run-1")]).unwrap();

    let reopened = kira_culture_enrich::store::Store::new_with_paths(
        store.project_root().to_path_buf(),
        store.cache_root().to_path_buf(),
    )
    .with_conflict_dedup(ConflictDedup::Global);
    assert_eq!(reopened.append_conflicts(&[conflict("run-2")]).unwrap(), 0);
}

#[test]
fn aliases_first_writer_wins_and_names_never_alias() {
    let (_temp, store) = temp_store();
    let cas = id(IdentifierType::CasRn, "7487-88-9");
    let name = id(IdentifierType::Name, "magnesium sulfate");

    store
        .ensure_entity("ph-1|7487-88-9", EntityKind::Ingredient, &[cas.clone(), name.clone()])
        .unwrap();
    store
        .ensure_entity("ph-2|7487-88-9", EntityKind::Ingredient, &[cas.clone()])
        .unwrap();

    assert_eq!(store.find(&cas).unwrap().as_deref(), Some("ph-1|7487-88-9"));
    assert_eq!(store.find(&name).unwrap(), None);

    let resolver = Resolver::default();
    let seed: EntitySeed = "cas:7487-88-9".parse().unwrap();
    assert_eq!(store.resolve_key(&seed, &resolver).unwrap(), "ph-1|7487-88-9");
}

#[test]
fn merge_record_logs_distinct_records_once() {
    let (_temp, store) = temp_store();
    let resolver = Resolver::default();
    let key = "ph-1|7487-88-9";
    let chebi = record(
        SourceId::Chebi,
        "CHEBI:32599",
        &[("chebi_id", "CHEBI:32599"), ("name", "magnesium sulfate")],
    );

    let first = store
        .merge_record(key, EntityKind::Ingredient, &chebi, &resolver, "run-1")
        .unwrap();
    let again = store
        .merge_record(key, EntityKind::Ingredient, &chebi, &resolver, "run-1")
        .unwrap();

    assert!(first.changed);
    assert_eq!(first.new_identifiers.len(), 2);
    assert!(!again.changed);
    assert_eq!(store.source_records(key).unwrap(), vec![chebi]);
    assert_eq!(
        store
            .find(&id(IdentifierType::ChebiId, "CHEBI:32599"))
            .unwrap()
            .as_deref(),
        Some(key)
    );
}

#[test]
fn refetched_record_is_not_logged_again() {
    let (_temp, store) = temp_store();
    let resolver = Resolver::default();
    let key = "ph-1|7487-88-9";
    let first = record(SourceId::Cas, "7487-88-9", &[("cas_rn", "7487-88-9")]);
    let mut refetched = first.clone();
    refetched.retrieved_at = first.retrieved_at + Duration::hours(1);

    store
        .merge_record(key, EntityKind::Ingredient, &first, &resolver, "run-1")
        .unwrap();
    store
        .merge_record(key, EntityKind::Ingredient, &refetched, &resolver, "run-2")
        .unwrap();

    assert_eq!(store.source_records(key).unwrap(), vec![first]);
}

#[test]
fn failed_conflict_write_leaves_entity_unchanged() {
    let (_temp, store) = temp_store();
    let resolver = Resolver::default();
    let key = "ph-1|7487-88-9";
    let cas = record(SourceId::Cas, "7487-88-9", &[("name", "Epsom salt component")]);
    let chebi = record(SourceId::Chebi, "CHEBI:32599", &[("name", "magnesium sulfate")]);
    store
        .merge_record(key, EntityKind::Ingredient, &cas, &resolver, "run")
        .unwrap();

    let conflicts_path = store.project_root().join("conflicts.jsonl");
    std::fs::create_dir_all(conflicts_path.as_std_path()).unwrap();
    assert_matches!(
        store.merge_record(key, EntityKind::Ingredient, &chebi, &resolver, "run"),
        Err(KiraError::Filesystem(_))
    );
    let entity = store.get_required(key).unwrap();
    assert_eq!(entity.field_text("name").as_deref(), Some("Epsom salt component"));
    assert_eq!(entity.field_sources["name"], SourceId::Cas);

    std::fs::remove_dir(conflicts_path.as_std_path()).unwrap();
    let outcome = store
        .merge_record(key, EntityKind::Ingredient, &chebi, &resolver, "run")
        .unwrap();
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(
        store.get_required(key).unwrap().field_text("name").as_deref(),
        Some("magnesium sulfate")
    );
    assert_eq!(store.all_conflicts(Some(key)).unwrap().len(), 1);
}

#[test]
fn concurrent_merges_into_one_key_lose_nothing() {
    let (_temp, store) = temp_store();
    let resolver = Resolver::default();
    let key = "ph-1|7487-88-9";

    thread::scope(|scope| {
        for idx in 0..8 {
            let store = &store;
            let resolver = &resolver;
            scope.spawn(move || {
                let field = format!("note_{idx}");
                let record = record(SourceId::NodeNorm, "x", &[(field.as_str(), "v")]);
                store
                    .merge_record(key, EntityKind::Ingredient, &record, resolver, "run")
                    .unwrap();
            });
        }
    });

    let entity = store.get_required(key).unwrap();
    assert_eq!(entity.fields.len(), 8);
    assert_eq!(store.source_records(key).unwrap().len(), 8);
}

#[test]
fn rekey_moves_entity_records_and_aliases() {
    let (_temp, store) = temp_store();
    let resolver = Resolver::default();
    let old = "ph-1|7487-88-9";
    store
        .ensure_entity(
            old,
            EntityKind::Ingredient,
            &[id(IdentifierType::CasRn, "7487-88-9")],
        )
        .unwrap();
    assert_matches!(store.rekey(old, &resolver), Err(KiraError::NothingToRekey(_)));

    let pubchem = record(
        SourceId::Pubchem,
        "24083",
        &[("inchikey", "CSNNHWWHGAXBCP-UHFFFAOYSA-L")],
    );
    store
        .merge_record(old, EntityKind::Ingredient, &pubchem, &resolver, "run")
        .unwrap();

    let moved = store.rekey(old, &resolver).unwrap();
    let new = "CSNNHWWHGAXBCP-UHFFFAOYSA-L|7487-88-9";
    assert_eq!(
        moved,
        Rekeyed {
            from: old.to_string(),
            to: new.to_string()
        }
    );
    assert!(store.get(old).unwrap().is_none());
    assert_eq!(store.get_required(new).unwrap().composite_key, new);
    assert_eq!(store.source_records(new).unwrap().len(), 1);
    assert_eq!(
        store
            .find(&id(IdentifierType::CasRn, "7487-88-9"))
            .unwrap()
            .as_deref(),
        Some(new)
    );
}

#[test]
fn rekey_refuses_to_overwrite() {
    let (_temp, store) = temp_store();
    let resolver = Resolver::default();
    let inchikey = id(IdentifierType::Inchikey, "CSNNHWWHGAXBCP-UHFFFAOYSA-L");
    store
        .ensure_entity("ph-1|7487-88-9", EntityKind::Ingredient, &[inchikey])
        .unwrap();
    store
        .upsert(&EnrichedEntity::new(
            "CSNNHWWHGAXBCP-UHFFFAOYSA-L|7487-88-9",
            EntityKind::Ingredient,
        ))
        .unwrap();

    assert_matches!(
        store.rekey("ph-1|7487-88-9", &resolver),
        Err(KiraError::RekeyCollision(_))
    );
}
