use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;

use crate::adapters::{IdentifierAdapter, http_adapter};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::{ApiKeys, ResolvedConfig};
use crate::domain::{EntityKind, EntitySeed, Identifier, IdentifierType, SourceId};
use crate::entity::{DataConflict, EnrichedEntity, SourceRecord};
use crate::error::KiraError;
use crate::kgx::{self, CuriePolicy, ExportSummary};
use crate::orchestrator::{CancellationToken, JobReport, Orchestrator};
use crate::resolver::Resolver;
use crate::store::{Rekeyed, Store};

#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    pub no_cache: bool,
    pub max_depth: Option<usize>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichResult {
    pub jobs: Vec<JobReport>,
    pub failures: Vec<JobFailure>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub seed: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub entities_enriched: usize,
    pub queries_performed: usize,
    pub queries_failed: usize,
    pub conflicts_detected: usize,
    pub ambiguous_matches: usize,
    pub cache: CacheStats,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub entity: EnrichedEntity,
    pub source_records: Vec<SourceRecord>,
    pub conflicts: Vec<DataConflict>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub entities: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub composite_key: String,
    pub kind: EntityKind,
    pub name: Option<String>,
    pub sources: Vec<SourceId>,
    pub identifiers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictsResult {
    pub conflicts: Vec<DataConflict>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct App {
    store: Store,
    orchestrator: Orchestrator,
    cache: ResponseCache,
    jobs: usize,
    curie_policy: CuriePolicy,
}

impl App {
    pub fn new(
        store: Store,
        orchestrator: Orchestrator,
        cache: ResponseCache,
        jobs: usize,
        curie_policy: CuriePolicy,
    ) -> Self {
        Self {
            store,
            orchestrator,
            cache,
            jobs: jobs.max(1),
            curie_policy,
        }
    }

    /// Wires the HTTP adapters, cache, resolver and store from a resolved
    /// manifest. CLI options win over manifest settings.
    pub fn from_config(
        store: Store,
        config: &ResolvedConfig,
        keys: &ApiKeys,
        options: &EnrichOptions,
    ) -> Result<Self, KiraError> {
        let settings = &config.settings;
        let store = store.with_conflict_dedup(settings.conflict_dedup);
        let cache = if options.no_cache {
            ResponseCache::disabled()
        } else {
            ResponseCache::new(store.cache_root().to_path_buf())
        };

        let adapters = settings
            .sources
            .iter()
            .map(|source| http_adapter(*source, &settings.http_settings(*source, keys), &cache))
            .collect::<Result<Vec<Box<dyn IdentifierAdapter>>, KiraError>>()?;

        let mut orchestrator_settings = settings.orchestrator.clone();
        if let Some(max_depth) = options.max_depth {
            orchestrator_settings.max_depth = max_depth;
        }
        let resolver = Resolver::new(settings.authority.clone(), settings.placeholder);
        let orchestrator = Orchestrator::new(adapters, resolver, orchestrator_settings)
            .with_overrides(config.overrides.clone());

        Ok(Self::new(
            store,
            orchestrator,
            cache,
            options.jobs.unwrap_or(settings.jobs),
            settings.curie_policy.clone(),
        ))
    }

    /// An app with no adapters, for commands that only read or rewrite the
    /// store. It still honours the manifest's authority table, dedup mode
    /// and CURIE policy.
    pub fn offline(store: Store, config: &ResolvedConfig) -> Self {
        let settings = &config.settings;
        let resolver = Resolver::new(settings.authority.clone(), settings.placeholder);
        Self::new(
            store.with_conflict_dedup(settings.conflict_dedup),
            Orchestrator::new(Vec::new(), resolver, settings.orchestrator.clone()),
            ResponseCache::disabled(),
            settings.jobs,
            settings.curie_policy.clone(),
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Enriches the given seed, or every manifest seed, on `jobs` worker
    /// threads. A failing job is reported and does not stop the others.
    pub fn enrich(
        &self,
        specifier: Option<EntitySeed>,
        config: &ResolvedConfig,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<EnrichResult, KiraError> {
        let seeds = match specifier {
            Some(seed) => vec![seed],
            None => config.seeds.clone(),
        };
        self.store.ensure_project_root()?;

        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} seed(s), {} worker(s), sources {}",
                seeds.len(),
                self.jobs.min(seeds.len().max(1)),
                self.orchestrator
                    .sources()
                    .iter()
                    .map(SourceId::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            elapsed: None,
        });

        let next = AtomicUsize::new(0);
        let outcomes = Mutex::new(Vec::with_capacity(seeds.len()));
        thread::scope(|scope| {
            for _ in 0..self.jobs.min(seeds.len()) {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(seed) = seeds.get(index) else {
                            break;
                        };
                        let job_start = Instant::now();
                        let outcome = self.orchestrator.enrich(seed, &self.store, cancel);
                        sink.event(ProgressEvent {
                            message: match &outcome {
                                Ok(report) => format!(
                                    "phase=Enrich; {} -> {} ({})",
                                    report.seed, report.composite_key, report.termination
                                ),
                                Err(err) => format!("phase=Enrich; {} failed: {err}", seed.label()),
                            },
                            elapsed: Some(job_start.elapsed()),
                        });
                        outcomes
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .push((index, outcome));
                    }
                });
            }
        });

        let mut outcomes = outcomes
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        outcomes.sort_by_key(|(index, _)| *index);

        let mut summary = BatchSummary::default();
        let mut jobs = Vec::new();
        let mut failures = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(report) => {
                    summary.entities_enriched += 1;
                    summary.queries_performed += report.queries_performed;
                    summary.queries_failed += report.queries_failed;
                    summary.conflicts_detected += report.conflicts_detected;
                    summary.ambiguous_matches += report.ambiguous_matches;
                    jobs.push(report);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "enrichment job failed");
                    failures.push(JobFailure {
                        seed: seeds.get(index).map(EntitySeed::label).unwrap_or_default(),
                        error: err.to_string(),
                    });
                }
            }
        }
        summary.cache = self.cache.stats();
        summary.elapsed_ms = start.elapsed().as_millis() as u64;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} enriched, {} failed",
                summary.entities_enriched,
                failures.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        Ok(EnrichResult {
            jobs,
            failures,
            summary,
        })
    }

    /// `target` is a composite key or a `type:value` identifier.
    pub fn show(&self, target: &str, sink: &dyn ProgressSink) -> Result<ShowResult, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {target}"),
            elapsed: None,
        });
        let key = self.resolve_target(target)?;
        let entity = self.store.get_required(&key)?;
        Ok(ShowResult {
            source_records: self.store.source_records(&key)?,
            conflicts: self.store.all_conflicts(Some(&key))?,
            entity,
        })
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, KiraError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; scanning store".to_string(),
            elapsed: None,
        });
        let entities = self
            .store
            .list()?
            .into_iter()
            .map(|entity| ListEntry {
                name: entity.field_text("name"),
                sources: entity.contributing_sources.iter().copied().collect(),
                identifiers: entity.identifier_count(),
                kind: entity.kind,
                composite_key: entity.composite_key,
            })
            .collect();
        Ok(ListResult { entities })
    }

    pub fn conflicts(&self, target: Option<&str>) -> Result<ConflictsResult, KiraError> {
        let key = target.map(|target| self.resolve_target(target)).transpose()?;
        Ok(ConflictsResult {
            conflicts: self.store.all_conflicts(key.as_deref())?,
        })
    }

    pub fn export(
        &self,
        out_dir: &Utf8Path,
        kind: Option<EntityKind>,
        sink: &dyn ProgressSink,
    ) -> Result<ExportSummary, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Export; writing KGX to {out_dir}"),
            elapsed: None,
        });
        kgx::export(
            &self.store,
            |entity| kind.is_none_or(|kind| entity.kind == kind),
            &self.curie_policy,
            out_dir,
        )
    }

    pub fn rekey(&self, target: &str, sink: &dyn ProgressSink) -> Result<Rekeyed, KiraError> {
        let key = self.resolve_target(target)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; re-keying {key}"),
            elapsed: None,
        });
        self.store.rekey(&key, self.orchestrator.resolver())
    }

    fn resolve_target(&self, target: &str) -> Result<String, KiraError> {
        if target.contains('|') {
            return Ok(target.to_string());
        }
        let identifier: Identifier = target.parse()?;
        if identifier.kind == IdentifierType::Name {
            return self
                .store
                .list()?
                .into_iter()
                .find(|entity| entity.knows(&identifier))
                .map(|entity| entity.composite_key)
                .ok_or_else(|| KiraError::EntityNotFound(target.to_string()));
        }
        self.store
            .find(&identifier)?
            .ok_or_else(|| KiraError::EntityNotFound(target.to_string()))
    }
}
