use std::time::Duration;

use assert_matches::assert_matches;

use kira_culture_enrich::config::{Config, ConfigLoader};
use kira_culture_enrich::domain::{EntityKind, IdentifierType, SourceId};
use kira_culture_enrich::entity::FieldValue;
use kira_culture_enrich::error::KiraError;
use kira_culture_enrich::orchestrator::AmbiguityPolicy;
use kira_culture_enrich::resolver::PlaceholderPolicy;
use kira_culture_enrich::store::ConflictDedup;

fn resolve(json: &str) -> Result<kira_culture_enrich::config::ResolvedConfig, KiraError> {
    let config: Config = serde_json::from_str(json).unwrap();
    ConfigLoader::resolve_config(config)
}

#[test]
fn detailed_entries_and_settings() {
    let resolved = resolve(
        r#"{
            "schema_version": 1,
            "ingredients": [
                "Glucose",
                {"name": "Magnesium sulfate", "cas_rn": "7487-88-9", "mediadive_id": 12},
                {"mediadive_id": "41"}
            ],
            "strains": [
                {"name": "Escherichia coli", "ncbi_taxon_id": 562, "bacdive_id": "4907"}
            ],
            "settings": {
                "max_depth": 5,
                "retry_base_delay_ms": 50,
                "job_timeout_secs": 120,
                "jobs": 8,
                "conflict_dedup": "global",
                "placeholder": "name-derived",
                "ambiguity": "review",
                "sources": ["chebi", "pubchem", "chebi"],
                "min_interval_ms": {"ncbi_taxon": 100},
                "base_urls": {"bacdive": "http://localhost:8080/v2"},
                "authority": {"name": "pubchem", "definition": null},
                "curie_patterns": ["^kgmicrobe\\.ingredient:\\d+$"]
            },
            "overrides": [
                {"identifier": "cas:7487-88-9", "field": "name", "value": "magnesium sulphate"}
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(resolved.seeds.len(), 4);
    assert_eq!(resolved.seeds[1].key_values(), (None, Some("7487-88-9")));
    assert_eq!(
        resolved.seeds[1].identifiers().last().map(ToString::to_string),
        Some("name:magnesium sulfate".to_string())
    );
    assert_eq!(resolved.seeds[2].identifiers()[0].to_string(), "mediadive_id:41");
    assert_eq!(resolved.seeds[3].kind(), EntityKind::Strain);
    assert_eq!(resolved.seeds[3].key_values(), (Some("562"), Some("4907")));

    let settings = &resolved.settings;
    assert_eq!(settings.orchestrator.max_depth, 5);
    assert_eq!(settings.orchestrator.max_retries, 3);
    assert_eq!(settings.orchestrator.retry_base_delay, Duration::from_millis(50));
    assert_eq!(settings.orchestrator.job_timeout, Some(Duration::from_secs(120)));
    assert_eq!(settings.orchestrator.ambiguity, AmbiguityPolicy::Review);
    assert_eq!(settings.jobs, 8);
    assert_eq!(settings.conflict_dedup, ConflictDedup::Global);
    assert_eq!(settings.placeholder, PlaceholderPolicy::NameDerived);
    assert_eq!(settings.sources, vec![SourceId::Chebi, SourceId::Pubchem]);
    assert_eq!(
        settings.min_intervals.get(&SourceId::NcbiTaxon),
        Some(&Duration::from_millis(100))
    );
    assert_eq!(settings.authority.authority_for("name"), Some(SourceId::Pubchem));
    assert_eq!(settings.authority.authority_for("definition"), None);
    assert!(settings.curie_policy.is_valid("kgmicrobe.ingredient:7"));
    assert!(settings.curie_policy.is_valid("CHEBI:32599"));

    let http = settings.http_settings(SourceId::Bacdive, &Default::default());
    assert_eq!(http.base_url.as_deref(), Some("http://localhost:8080/v2"));
    assert_eq!(http.api_key, None);

    assert_eq!(resolved.overrides.len(), 1);
    assert_eq!(resolved.overrides[0].identifier.kind, IdentifierType::CasRn);
    assert_eq!(resolved.overrides[0].value, FieldValue::text("magnesium sulphate"));
}

#[test]
fn empty_manifest_uses_defaults() {
    let resolved = resolve("{}").unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert!(resolved.seeds.is_empty());
    assert_eq!(resolved.settings.jobs, 4);
    assert_eq!(resolved.settings.conflict_dedup, ConflictDedup::PerExecution);
    assert_eq!(resolved.settings.placeholder, PlaceholderPolicy::Random);
    assert_eq!(resolved.settings.request_timeout, Duration::from_secs(30));
    assert_eq!(
        resolved.settings.orchestrator.job_timeout,
        Some(Duration::from_secs(300))
    );
    assert_eq!(resolved.settings.sources, SourceId::ADAPTERS.to_vec());
}

#[test]
fn invalid_identifiers_are_rejected_at_load() {
    assert_matches!(
        resolve(r#"{"ingredients": [{"cas_rn": "7487-88-1"}]}"#),
        Err(KiraError::InvalidCasRn(_))
    );
    assert_matches!(
        resolve(r#"{"ingredients": [{"inchikey": "not-a-key"}]}"#),
        Err(KiraError::InvalidInchiKey(_))
    );
    assert_matches!(
        resolve(r#"{"strains": [{"ncbi_taxon_id": "coli"}]}"#),
        Err(KiraError::InvalidNumericId { .. })
    );
    assert_matches!(
        resolve(r#"{"strains": [{}]}"#),
        Err(KiraError::InvalidSpecifier(_))
    );
}

#[test]
fn invalid_settings_are_rejected() {
    assert_matches!(
        resolve(r#"{"settings": {"jobs": 0}}"#),
        Err(KiraError::InvalidSetting(_))
    );
    assert_matches!(
        resolve(r#"{"settings": {"sources": ["pubchem", "manual"]}}"#),
        Err(KiraError::UnknownSource(_))
    );
    assert_matches!(
        resolve(r#"{"settings": {"authority": {"name": "wikipedia"}}}"#),
        Err(KiraError::UnknownSource(_))
    );
    assert_matches!(
        resolve(r#"{"settings": {"curie_patterns": ["("]}}"#),
        Err(KiraError::InvalidCuriePattern(_))
    );
    assert_matches!(
        resolve(r#"{"overrides": [{"identifier": "cas:7487-88-9", "field": "name", "value": true}]}"#),
        Err(KiraError::InvalidSetting(_))
    );
}

#[test]
fn resolve_reads_manifest_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-ce.json");
    std::fs::write(&path, r#"{"strains": ["Escherichia coli"]}"#).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.seeds.len(), 1);
    assert_eq!(resolved.seeds[0].name(), Some("escherichia coli"));

    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(KiraError::ConfigParse(_))
    );

    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(KiraError::ConfigRead(_))
    );
}
