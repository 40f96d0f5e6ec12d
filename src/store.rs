use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{EntityKind, EntitySeed, Identifier, IdentifierType};
use crate::entity::{
    AmbiguousMatch, ConflictIdentity, DataConflict, EnrichedEntity, FieldValue, SourceRecord,
};
use crate::error::KiraError;
use crate::fs_util::{append_jsonl, read_json, read_jsonl, write_json_atomic};
use crate::resolver::{MergeOutcome, Resolver};

/// Which earlier conflicts suppress a newly detected identical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictDedup {
    /// Only conflicts already logged by the same run.
    #[default]
    PerExecution,
    /// Any conflict already in the log.
    Global,
}

/// Project-local record store (`.kira-ce/`) plus the location of the shared
/// response cache.
#[derive(Debug, Clone)]
pub struct Store {
    project_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
    dedup: ConflictDedup,
    locks: Arc<StoreLocks>,
}

#[derive(Debug, Default)]
struct StoreLocks {
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    conflicts: Mutex<Option<HashSet<SeenConflict>>>,
    ambiguous: Mutex<()>,
    aliases: Mutex<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeenConflict {
    run_id: Option<String>,
    identity: ConflictIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rekeyed {
    pub from: String,
    pub to: String,
}

impl Store {
    pub fn new() -> Result<Self, KiraError> {
        let cwd = std::env::current_dir().map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let project_root = Utf8PathBuf::from_path_buf(cwd.join(".kira-ce"))
            .map_err(|_| KiraError::Filesystem("invalid project path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("kira-culture-enrich"),
                )
                .ok()
            })
            .ok_or_else(|| {
                KiraError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self::new_with_paths(project_root, cache_root))
    }

    pub fn new_with_paths(project_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            project_root,
            cache_root,
            dedup: ConflictDedup::default(),
            locks: Arc::new(StoreLocks::default()),
        }
    }

    pub fn with_conflict_dedup(mut self, dedup: ConflictDedup) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn conflict_dedup(&self) -> ConflictDedup {
        self.dedup
    }

    pub fn entity_path(&self, key: &str) -> Utf8PathBuf {
        self.project_root
            .join("entities")
            .join(format!("{}.json", file_stem(key)))
    }

    pub fn records_path(&self, key: &str) -> Utf8PathBuf {
        self.project_root
            .join("records")
            .join(format!("{}.jsonl", file_stem(key)))
    }

    fn conflicts_path(&self) -> Utf8PathBuf {
        self.project_root.join("conflicts.jsonl")
    }

    fn ambiguous_path(&self) -> Utf8PathBuf {
        self.project_root.join("ambiguous.jsonl")
    }

    fn aliases_path(&self) -> Utf8PathBuf {
        self.project_root.join("aliases.json")
    }

    pub fn run_path(&self, run_id: &str) -> Utf8PathBuf {
        self.project_root
            .join("runs")
            .join(format!("{}.json", file_stem(run_id)))
    }

    pub fn ensure_project_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.project_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn upsert(&self, entity: &EnrichedEntity) -> Result<(), KiraError> {
        write_json_atomic(&self.entity_path(&entity.composite_key), entity)
    }

    pub fn get(&self, key: &str) -> Result<Option<EnrichedEntity>, KiraError> {
        read_json(&self.entity_path(key))
    }

    pub fn get_required(&self, key: &str) -> Result<EnrichedEntity, KiraError> {
        self.get(key)?
            .ok_or_else(|| KiraError::EntityNotFound(key.to_string()))
    }

    /// Every stored entity, ordered by composite key.
    pub fn list(&self) -> Result<Vec<EnrichedEntity>, KiraError> {
        let dir = self.project_root.join("entities");
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entities = Vec::new();
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if path.extension() != Some("json") {
                continue;
            }
            if let Some(entity) = read_json::<EnrichedEntity>(&path)? {
                entities.push(entity);
            }
        }
        entities.sort_by(|a, b| a.composite_key.cmp(&b.composite_key));
        Ok(entities)
    }

    pub fn export<P>(&self, predicate: P) -> Result<Vec<EnrichedEntity>, KiraError>
    where
        P: Fn(&EnrichedEntity) -> bool,
    {
        Ok(self.list()?.into_iter().filter(|entity| predicate(entity)).collect())
    }

    pub fn all_conflicts(&self, key: Option<&str>) -> Result<Vec<DataConflict>, KiraError> {
        let conflicts = read_jsonl::<DataConflict>(&self.conflicts_path())?;
        Ok(match key {
            Some(key) => conflicts
                .into_iter()
                .filter(|conflict| conflict.composite_key == key)
                .collect(),
            None => conflicts,
        })
    }

    /// Appends conflicts not suppressed by the dedup policy; returns how many
    /// were written.
    pub fn append_conflicts(&self, conflicts: &[DataConflict]) -> Result<usize, KiraError> {
        if conflicts.is_empty() {
            return Ok(0);
        }
        let mut seen = lock(&self.locks.conflicts);
        if seen.is_none() {
            let existing = read_jsonl::<DataConflict>(&self.conflicts_path())?;
            *seen = Some(
                existing
                    .iter()
                    .map(|conflict| self.seen_conflict(conflict))
                    .collect(),
            );
        }
        let Some(seen) = seen.as_mut() else {
            return Ok(0);
        };
        let mut fresh = Vec::new();
        let mut fresh_keys = HashSet::new();
        for conflict in conflicts {
            let key = self.seen_conflict(conflict);
            if !seen.contains(&key) && fresh_keys.insert(key) {
                fresh.push(conflict.clone());
            }
        }
        append_jsonl(&self.conflicts_path(), &fresh)?;
        seen.extend(fresh_keys);
        Ok(fresh.len())
    }

    fn seen_conflict(&self, conflict: &DataConflict) -> SeenConflict {
        SeenConflict {
            run_id: match self.dedup {
                ConflictDedup::PerExecution => Some(conflict.run_id.clone()),
                ConflictDedup::Global => None,
            },
            identity: conflict.identity(),
        }
    }

    pub fn source_records(&self, key: &str) -> Result<Vec<SourceRecord>, KiraError> {
        read_jsonl(&self.records_path(key))
    }

    /// Loads the entity or creates it, recording the seed identifiers.
    pub fn ensure_entity(
        &self,
        key: &str,
        kind: EntityKind,
        identifiers: &[Identifier],
    ) -> Result<EnrichedEntity, KiraError> {
        let key_lock = self.key_lock(key);
        let _guard = lock(&*key_lock);
        let existing = self.get(key)?;
        let created = existing.is_none();
        let mut entity = existing.unwrap_or_else(|| EnrichedEntity::new(key, kind));
        let mut changed = created;
        for identifier in identifiers {
            changed |= entity.discover(identifier);
        }
        if changed {
            self.upsert(&entity)?;
            self.register_aliases(key, identifiers)?;
        }
        if created {
            tracing::info!(key, %kind, "created entity");
        }
        Ok(entity)
    }

    /// Load-merge-write of one source record under the entity's key lock.
    pub fn merge_record(
        &self,
        key: &str,
        kind: EntityKind,
        record: &SourceRecord,
        resolver: &Resolver,
        run_id: &str,
    ) -> Result<MergeOutcome, KiraError> {
        let key_lock = self.key_lock(key);
        let _guard = lock(&*key_lock);
        let mut entity = self
            .get(key)?
            .unwrap_or_else(|| EnrichedEntity::new(key, kind));
        let outcome = resolver.merge_record(&mut entity, record, run_id);

        let records_path = self.records_path(key);
        let known = read_jsonl::<SourceRecord>(&records_path)?;
        if !known.iter().any(|seen| seen.same_observation(record)) {
            append_jsonl(&records_path, std::slice::from_ref(record))?;
        }
        // The entity is written last so a failed log write leaves it untouched.
        self.append_conflicts(&outcome.conflicts)?;
        self.register_aliases(key, &outcome.new_identifiers)?;
        if outcome.changed {
            self.upsert(&entity)?;
        }
        Ok(outcome)
    }

    /// Pins a curator value on an entity under its key lock.
    pub fn apply_override(
        &self,
        key: &str,
        kind: EntityKind,
        field: &str,
        value: &FieldValue,
        resolver: &Resolver,
        run_id: &str,
    ) -> Result<Option<DataConflict>, KiraError> {
        let key_lock = self.key_lock(key);
        let _guard = lock(&*key_lock);
        let mut entity = self
            .get(key)?
            .unwrap_or_else(|| EnrichedEntity::new(key, kind));
        let before = entity.clone();
        let conflict = resolver.apply_override(&mut entity, field, value, run_id);
        if entity != before {
            self.upsert(&entity)?;
        }
        if let Some(conflict) = &conflict {
            self.append_conflicts(std::slice::from_ref(conflict))?;
        }
        Ok(conflict)
    }

    /// Key for a seed: the key any of its identifiers is already filed under,
    /// otherwise a freshly computed one. Names never alias.
    pub fn resolve_key(&self, seed: &EntitySeed, resolver: &Resolver) -> Result<String, KiraError> {
        for identifier in seed.identifiers() {
            if let Some(key) = self.find(&identifier)? {
                return Ok(key);
            }
        }
        Ok(resolver.compute_key(seed).to_string())
    }

    /// Looks up the key an identifier is filed under.
    pub fn find(&self, identifier: &Identifier) -> Result<Option<String>, KiraError> {
        if identifier.kind == IdentifierType::Name {
            return Ok(None);
        }
        let _guard = lock(&self.locks.aliases);
        let aliases = self.read_aliases()?;
        Ok(aliases.get(&identifier.to_string()).cloned())
    }

    fn read_aliases(&self) -> Result<BTreeMap<String, String>, KiraError> {
        Ok(read_json(&self.aliases_path())?.unwrap_or_default())
    }

    /// First writer wins: an identifier already filed under another key keeps
    /// pointing there.
    fn register_aliases(&self, key: &str, identifiers: &[Identifier]) -> Result<(), KiraError> {
        let candidates = identifiers
            .iter()
            .filter(|identifier| identifier.kind != IdentifierType::Name)
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Ok(());
        }
        let _guard = lock(&self.locks.aliases);
        let mut aliases = self.read_aliases()?;
        let mut changed = false;
        for identifier in candidates {
            let alias = identifier.to_string();
            match aliases.get(&alias) {
                Some(existing) if existing != key => {
                    tracing::warn!(%identifier, key, existing, "identifier already filed under another key");
                }
                Some(_) => {}
                None => {
                    aliases.insert(alias, key.to_string());
                    changed = true;
                }
            }
        }
        if changed {
            write_json_atomic(&self.aliases_path(), &aliases)?;
        }
        Ok(())
    }

    pub fn record_ambiguity(&self, ambiguity: &AmbiguousMatch) -> Result<(), KiraError> {
        let _guard = lock(&self.locks.ambiguous);
        append_jsonl(&self.ambiguous_path(), std::slice::from_ref(ambiguity))
    }

    pub fn ambiguities(&self) -> Result<Vec<AmbiguousMatch>, KiraError> {
        read_jsonl(&self.ambiguous_path())
    }

    pub fn record_run<T: Serialize>(&self, run_id: &str, log: &T) -> Result<(), KiraError> {
        write_json_atomic(&self.run_path(run_id), log)
    }

    /// Replaces placeholder segments of `key` with discovered identifiers and
    /// moves the entity, its record log and its aliases to the new key.
    /// Logged conflicts keep the key they were detected under.
    pub fn rekey(&self, key: &str, resolver: &Resolver) -> Result<Rekeyed, KiraError> {
        let key_lock = self.key_lock(key);
        let _guard = lock(&*key_lock);
        let mut entity = self.get_required(key)?;
        let next = resolver
            .rekeyed(&entity)
            .ok_or_else(|| KiraError::NothingToRekey(key.to_string()))?
            .to_string();
        if self.entity_path(&next).as_std_path().exists() {
            return Err(KiraError::RekeyCollision(next));
        }

        entity.composite_key = next.clone();
        entity.updated_at = chrono::Utc::now();
        self.upsert(&entity)?;

        let old_records = self.records_path(key);
        if old_records.as_std_path().exists() {
            let new_records = self.records_path(&next);
            if let Some(parent) = new_records.parent() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            }
            fs::rename(old_records.as_std_path(), new_records.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }

        {
            let _aliases = lock(&self.locks.aliases);
            let mut aliases = self.read_aliases()?;
            for target in aliases.values_mut() {
                if target == key {
                    *target = next.clone();
                }
            }
            write_json_atomic(&self.aliases_path(), &aliases)?;
        }

        fs::remove_file(self.entity_path(key).as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        tracing::info!(from = key, to = %next, "re-keyed entity");
        Ok(Rekeyed {
            from: key.to_string(),
            to: next,
        })
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        lock(&self.locks.keys)
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Composite keys contain `|`, which is awkward in file names.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|ch| match ch {
            '|' => '+',
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/tmp/project/.kira-ce"),
            Utf8PathBuf::from("/tmp/cache"),
        );
        let key = "CSNNHWWHGAXBCP-UHFFFAOYSA-L|7487-88-9";
        assert!(
            store
                .entity_path(key)
                .ends_with("entities/CSNNHWWHGAXBCP-UHFFFAOYSA-L+7487-88-9.json")
        );
        assert!(
            store
                .records_path(key)
                .ends_with("records/CSNNHWWHGAXBCP-UHFFFAOYSA-L+7487-88-9.jsonl")
        );
    }
}
