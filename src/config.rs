use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::HttpSettings;
use crate::authority::SourceAuthorityTable;
use crate::domain::{EntitySeed, Identifier, IngredientSeed, SourceId, StrainSeed};
use crate::entity::FieldValue;
use crate::error::KiraError;
use crate::kgx::CuriePolicy;
use crate::orchestrator::{AmbiguityPolicy, OrchestratorSettings};
use crate::resolver::PlaceholderPolicy;
use crate::store::ConflictDedup;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ce.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub ingredients: Vec<IngredientEntry>,
    #[serde(default)]
    pub strains: Vec<StrainEntry>,
    #[serde(default)]
    pub settings: SettingsEntry,
    #[serde(default)]
    pub overrides: Vec<OverrideEntry>,
}

/// An identifier written either as a JSON string or a bare number.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn as_text(&self) -> String {
        match self {
            RawId::Number(number) => number.to_string(),
            RawId::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IngredientEntry {
    Shorthand(String),
    Detailed(IngredientEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IngredientEntryObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cas_rn: Option<String>,
    #[serde(default)]
    pub inchikey: Option<String>,
    #[serde(default)]
    pub mediadive_id: Option<RawId>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StrainEntry {
    Shorthand(String),
    Detailed(StrainEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StrainEntryObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ncbi_taxon_id: Option<RawId>,
    #[serde(default)]
    pub bacdive_id: Option<RawId>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsEntry {
    pub max_depth: Option<usize>,
    pub max_retries: Option<usize>,
    pub retry_base_delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub jobs: Option<usize>,
    pub conflict_dedup: Option<ConflictDedup>,
    pub placeholder: Option<PlaceholderPolicy>,
    pub ambiguity: Option<AmbiguityPolicy>,
    /// Enabled adapters, in query order. Defaults to all of them.
    pub sources: Option<Vec<String>>,
    pub min_interval_ms: BTreeMap<String, u64>,
    /// Alternate endpoints, e.g. a local BacDive or MediaDive mirror.
    pub base_urls: BTreeMap<String, String>,
    /// Field -> authoritative source; `null` drops the field's authority.
    pub authority: BTreeMap<String, Option<String>>,
    pub curie_prefixes: Option<Vec<String>>,
    pub curie_patterns: Vec<String>,
}

/// Pins `field` to `value` on the entity carrying `identifier`.
#[derive(Debug, Deserialize, Serialize)]
pub struct OverrideEntry {
    pub identifier: String,
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualOverride {
    pub identifier: Identifier,
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub orchestrator: OrchestratorSettings,
    pub request_timeout: Duration,
    pub jobs: usize,
    pub conflict_dedup: ConflictDedup,
    pub placeholder: PlaceholderPolicy,
    pub sources: Vec<SourceId>,
    pub min_intervals: BTreeMap<SourceId, Duration>,
    pub base_urls: BTreeMap<SourceId, String>,
    pub authority: SourceAuthorityTable,
    pub curie_policy: CuriePolicy,
}

impl Default for ResolvedSettings {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorSettings::default(),
            request_timeout: Duration::from_secs(30),
            jobs: 4,
            conflict_dedup: ConflictDedup::default(),
            placeholder: PlaceholderPolicy::default(),
            sources: SourceId::ADAPTERS.to_vec(),
            min_intervals: BTreeMap::new(),
            base_urls: BTreeMap::new(),
            authority: SourceAuthorityTable::default(),
            curie_policy: CuriePolicy::default(),
        }
    }
}

impl ResolvedSettings {
    pub fn http_settings(&self, source: SourceId, keys: &ApiKeys) -> HttpSettings {
        HttpSettings {
            request_timeout: self.request_timeout,
            min_interval: self.min_intervals.get(&source).copied(),
            base_url: self.base_urls.get(&source).cloned(),
            api_key: keys.for_source(source),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub seeds: Vec<EntitySeed>,
    pub settings: ResolvedSettings,
    pub overrides: Vec<ManualOverride>,
}

/// Credentials read from the environment, never from the manifest.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub ncbi: Option<String>,
    pub cas: Option<String>,
    pub bacdive: Option<String>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            ncbi: read("NCBI_API_KEY"),
            cas: read("CAS_API_KEY"),
            bacdive: read("BACDIVE_TOKEN"),
        }
    }

    pub fn for_source(&self, source: SourceId) -> Option<String> {
        match source {
            SourceId::NcbiTaxon => self.ncbi.clone(),
            SourceId::Cas => self.cas.clone(),
            SourceId::Bacdive => self.bacdive.clone(),
            _ => None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but a missing default manifest yields
    /// the built-in settings with no seeds.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        match Self::resolve(path) {
            Err(KiraError::MissingConfig) => Ok(ResolvedConfig {
                schema_version: 1,
                ..ResolvedConfig::default()
            }),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let ingredients = config
            .ingredients
            .into_iter()
            .map(|entry| match entry {
                IngredientEntry::Shorthand(value) => Ok(EntitySeed::Ingredient(
                    IngredientSeed::new(Some(&value), None, None)?,
                )),
                IngredientEntry::Detailed(obj) => {
                    let mediadive = obj.mediadive_id.as_ref().map(RawId::as_text);
                    let seed = if obj.name.is_none() && obj.cas_rn.is_none() && obj.inchikey.is_none()
                    {
                        match mediadive.as_deref() {
                            Some(id) => IngredientSeed::from_mediadive(id)?,
                            None => IngredientSeed::new(None, None, None)?,
                        }
                    } else {
                        IngredientSeed::new(
                            obj.name.as_deref(),
                            obj.cas_rn.as_deref(),
                            obj.inchikey.as_deref(),
                        )?
                        .with_mediadive_id(mediadive.as_deref())?
                    };
                    Ok(EntitySeed::Ingredient(seed))
                }
            })
            .collect::<Result<Vec<_>, KiraError>>()?;

        let strains = config
            .strains
            .into_iter()
            .map(|entry| match entry {
                StrainEntry::Shorthand(value) => Ok(EntitySeed::Strain(StrainSeed::new(
                    Some(&value),
                    None,
                    None,
                )?)),
                StrainEntry::Detailed(obj) => {
                    let taxon = obj.ncbi_taxon_id.as_ref().map(RawId::as_text);
                    let bacdive = obj.bacdive_id.as_ref().map(RawId::as_text);
                    Ok(EntitySeed::Strain(StrainSeed::new(
                        obj.name.as_deref(),
                        taxon.as_deref(),
                        bacdive.as_deref(),
                    )?))
                }
            })
            .collect::<Result<Vec<_>, KiraError>>()?;

        let overrides = config
            .overrides
            .into_iter()
            .map(|entry| {
                let value = FieldValue::from_json(&entry.value).ok_or_else(|| {
                    KiraError::InvalidSetting(format!(
                        "override value for {} must be a string or number",
                        entry.field
                    ))
                })?;
                Ok(ManualOverride {
                    identifier: entry.identifier.parse()?,
                    field: entry.field,
                    value,
                })
            })
            .collect::<Result<Vec<_>, KiraError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            seeds: ingredients.into_iter().chain(strains).collect(),
            settings: resolve_settings(config.settings)?,
            overrides,
        })
    }
}

fn resolve_settings(entry: SettingsEntry) -> Result<ResolvedSettings, KiraError> {
    let defaults = ResolvedSettings::default();
    let jobs = entry.jobs.unwrap_or(defaults.jobs);
    if jobs == 0 {
        return Err(KiraError::InvalidSetting("jobs must be at least 1".to_string()));
    }

    let orchestrator = OrchestratorSettings {
        max_depth: entry.max_depth.unwrap_or(defaults.orchestrator.max_depth),
        max_retries: entry.max_retries.unwrap_or(defaults.orchestrator.max_retries),
        retry_base_delay: entry
            .retry_base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.orchestrator.retry_base_delay),
        job_timeout: entry
            .job_timeout_secs
            .map(Duration::from_secs)
            .or(defaults.orchestrator.job_timeout),
        ambiguity: entry.ambiguity.unwrap_or_default(),
    };

    let sources = match entry.sources {
        Some(names) => {
            let mut sources = Vec::new();
            for name in names {
                let source = adapter_source(&name)?;
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
            sources
        }
        None => defaults.sources,
    };

    let min_intervals = entry
        .min_interval_ms
        .into_iter()
        .map(|(name, millis)| Ok((adapter_source(&name)?, Duration::from_millis(millis))))
        .collect::<Result<BTreeMap<_, _>, KiraError>>()?;
    let base_urls = entry
        .base_urls
        .into_iter()
        .map(|(name, url)| Ok((adapter_source(&name)?, url)))
        .collect::<Result<BTreeMap<_, _>, KiraError>>()?;

    let mut authority = defaults.authority;
    for (field, source) in entry.authority {
        match source {
            Some(source) => authority.set(&field, source.parse()?),
            None => authority.clear(&field),
        }
    }

    let curie_policy = match entry.curie_prefixes {
        Some(prefixes) => CuriePolicy::new(prefixes, &entry.curie_patterns)?,
        None => CuriePolicy::default().with_patterns(&entry.curie_patterns)?,
    };

    Ok(ResolvedSettings {
        orchestrator,
        request_timeout: entry
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout),
        jobs,
        conflict_dedup: entry.conflict_dedup.unwrap_or_default(),
        placeholder: entry.placeholder.unwrap_or_default(),
        sources,
        min_intervals,
        base_urls,
        authority,
        curie_policy,
    })
}

/// Source names in settings must name a queryable adapter.
fn adapter_source(name: &str) -> Result<SourceId, KiraError> {
    let source: SourceId = name.parse()?;
    if source == SourceId::Manual {
        return Err(KiraError::UnknownSource(name.to_string()));
    }
    Ok(source)
}
