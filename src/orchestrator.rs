//! Breadth-first spidering of one entity across the identifier adapters.
//!
//! A job starts from the seed identifiers, asks every adapter that accepts
//! each identifier, merges what comes back through the [`Store`] and queues
//! every identifier it has not visited yet for the next depth level. It stops
//! at a fixed point, at `max_depth`, on its wall-clock budget or when
//! cancelled; whatever was merged before stopping stays merged.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::IdentifierAdapter;
use crate::config::ManualOverride;
use crate::domain::{EntityKind, EntitySeed, Identifier, SourceId};
use crate::entity::{AmbiguousMatch, QueryLogEntry, QueryOutcome, SourceRecord};
use crate::error::{KiraError, LookupError};
use crate::resolver::Resolver;
use crate::store::Store;

/// Cooperative cancellation, checked once per depth level.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What to merge when one lookup returns several candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    #[default]
    PickFirst,
    /// Record the candidates and merge none of them.
    Review,
}

/// Wall-clock budget of one job unless the manifest sets `job_timeout_secs`.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_depth: usize,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub job_timeout: Option<Duration>,
    pub ambiguity: AmbiguityPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            job_timeout: Some(DEFAULT_JOB_TIMEOUT),
            ambiguity: AmbiguityPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    FixedPoint,
    DepthLimit,
    TimedOut,
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Termination::FixedPoint => "fixed-point",
            Termination::DepthLimit => "depth-limit",
            Termination::TimedOut => "timed-out",
            Termination::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub run_id: String,
    pub seed: String,
    pub kind: EntityKind,
    pub composite_key: String,
    pub termination: Termination,
    pub depth_reached: usize,
    pub queries_performed: usize,
    pub queries_failed: usize,
    pub records_merged: usize,
    pub conflicts_detected: usize,
    pub ambiguous_matches: usize,
    pub identifiers_discovered: usize,
}

/// Per-run query log written to `runs/<run_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub seed: String,
    pub composite_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub termination: Termination,
    pub queries: Vec<QueryLogEntry>,
}

pub struct Orchestrator {
    adapters: Vec<Box<dyn IdentifierAdapter>>,
    resolver: Resolver,
    settings: OrchestratorSettings,
    overrides: Vec<ManualOverride>,
}

impl Orchestrator {
    /// Adapters are consulted in the order given.
    pub fn new(
        adapters: Vec<Box<dyn IdentifierAdapter>>,
        resolver: Resolver,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            adapters,
            resolver,
            settings,
            overrides: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Vec<ManualOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.iter().map(|adapter| adapter.source()).collect()
    }

    /// Runs one enrichment job to termination.
    pub fn enrich(
        &self,
        seed: &EntitySeed,
        store: &Store,
        cancel: &CancellationToken,
    ) -> Result<JobReport, KiraError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = self.settings.job_timeout.map(|budget| start + budget);
        let kind = seed.kind();
        let key = store.resolve_key(seed, &self.resolver)?;
        let mut job = Job {
            report: JobReport {
                run_id: Uuid::new_v4().to_string(),
                seed: seed.label(),
                kind,
                composite_key: key.clone(),
                termination: Termination::FixedPoint,
                depth_reached: 0,
                queries_performed: 0,
                queries_failed: 0,
                records_merged: 0,
                conflicts_detected: 0,
                ambiguous_matches: 0,
                identifiers_discovered: 0,
            },
            queries: Vec::new(),
        };
        tracing::info!(run_id = %job.report.run_id, key = %key, seed = %job.report.seed, "enrichment started");

        let seed_identifiers = seed.identifiers();
        store.ensure_entity(&key, kind, &seed_identifiers)?;
        self.apply_overrides(&mut job, store, kind, &seed_identifiers)?;

        let mut frontier = seed_identifiers
            .into_iter()
            .filter(|identifier| self.is_queryable(kind, identifier))
            .collect::<Vec<_>>();
        let mut visited = HashSet::new();
        let mut depth = 0;

        let termination = 'levels: loop {
            if frontier.is_empty() {
                break Termination::FixedPoint;
            }
            if depth >= self.settings.max_depth {
                break Termination::DepthLimit;
            }
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            job.report.depth_reached = depth;

            let mut next = Vec::new();
            for identifier in frontier {
                if !visited.insert(identifier.clone()) {
                    continue;
                }
                for adapter in self.adapters_for(kind, &identifier) {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        break 'levels Termination::TimedOut;
                    }
                    let merged =
                        self.query(&mut job, store, adapter, &identifier, depth)?;
                    for record in &merged {
                        for found in record.identifiers() {
                            if !visited.contains(&found)
                                && !next.contains(&found)
                                && self.is_queryable(kind, &found)
                            {
                                next.push(found);
                            }
                        }
                    }
                }
            }
            frontier = next;
            depth += 1;
        };

        job.report.termination = termination;
        store.record_run(
            &job.report.run_id,
            &RunLog {
                run_id: job.report.run_id.clone(),
                seed: job.report.seed.clone(),
                composite_key: key,
                started_at,
                finished_at: Utc::now(),
                termination,
                queries: job.queries,
            },
        )?;
        tracing::info!(
            run_id = %job.report.run_id,
            key = %job.report.composite_key,
            %termination,
            queries = job.report.queries_performed,
            failed = job.report.queries_failed,
            conflicts = job.report.conflicts_detected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "enrichment finished"
        );
        Ok(job.report)
    }

    fn adapters_for<'a>(
        &'a self,
        kind: EntityKind,
        identifier: &'a Identifier,
    ) -> impl Iterator<Item = &'a dyn IdentifierAdapter> + 'a {
        self.adapters
            .iter()
            .map(|adapter| &**adapter)
            .filter(move |adapter| adapter.serves(kind) && adapter.accepts(identifier.kind))
    }

    fn is_queryable(&self, kind: EntityKind, identifier: &Identifier) -> bool {
        self.adapters_for(kind, identifier).next().is_some()
    }

    /// One adapter call with retries; returns the records that were merged.
    fn query(
        &self,
        job: &mut Job,
        store: &Store,
        adapter: &dyn IdentifierAdapter,
        identifier: &Identifier,
        depth: usize,
    ) -> Result<Vec<SourceRecord>, KiraError> {
        let source = adapter.source();
        let started = Instant::now();
        tracing::debug!(%source, %identifier, depth, "query");
        job.report.queries_performed += 1;

        let (outcome, records) = match self.lookup_with_retries(adapter, identifier) {
            Ok(records) if records.is_empty() => (QueryOutcome::NotFound, records),
            Ok(records) => (
                QueryOutcome::Found {
                    records: records.len(),
                },
                records,
            ),
            Err((err, attempts)) => {
                job.report.queries_failed += 1;
                tracing::warn!(%source, %identifier, attempts, error = %err, "query failed");
                (
                    QueryOutcome::Failed {
                        message: err.to_string(),
                        attempts,
                    },
                    Vec::new(),
                )
            }
        };
        job.queries.push(QueryLogEntry {
            source_id: source,
            identifier_type: identifier.kind,
            identifier_value: identifier.value.clone(),
            depth,
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        let chosen = self.choose(job, store, source, identifier, records)?;
        let key = job.report.composite_key.clone();
        for record in &chosen {
            let outcome = store.merge_record(
                &key,
                job.report.kind,
                record,
                &self.resolver,
                &job.report.run_id,
            )?;
            job.report.records_merged += 1;
            job.report.identifiers_discovered += outcome.new_identifiers.len();
            job.report.conflicts_detected += outcome.conflicts.len();
            for conflict in &outcome.conflicts {
                tracing::warn!(
                    key = %conflict.composite_key,
                    field = %conflict.field,
                    winner = %conflict.winning_source,
                    loser = %conflict.losing_source,
                    reason = %conflict.resolution_reason,
                    "conflict"
                );
            }
        }
        Ok(chosen)
    }

    fn choose(
        &self,
        job: &mut Job,
        store: &Store,
        source: SourceId,
        identifier: &Identifier,
        mut records: Vec<SourceRecord>,
    ) -> Result<Vec<SourceRecord>, KiraError> {
        if records.len() <= 1 {
            return Ok(records);
        }
        job.report.ambiguous_matches += 1;
        let picked = match self.settings.ambiguity {
            AmbiguityPolicy::PickFirst => Some(records[0].native_identifier.clone()),
            AmbiguityPolicy::Review => None,
        };
        tracing::warn!(
            %source,
            %identifier,
            candidates = records.len(),
            picked = picked.as_deref().unwrap_or("none"),
            "ambiguous match"
        );
        store.record_ambiguity(&AmbiguousMatch {
            composite_key: job.report.composite_key.clone(),
            source_id: source,
            identifier: identifier.clone(),
            candidates: records
                .iter()
                .map(|record| record.native_identifier.clone())
                .collect(),
            picked: picked.clone(),
            detected_at: Utc::now(),
            run_id: job.report.run_id.clone(),
        })?;
        Ok(match picked {
            Some(_) => {
                records.truncate(1);
                records
            }
            None => Vec::new(),
        })
    }

    /// Transient failures are retried with linear backoff; the error carries
    /// the number of attempts made.
    fn lookup_with_retries(
        &self,
        adapter: &dyn IdentifierAdapter,
        identifier: &Identifier,
    ) -> Result<Vec<SourceRecord>, (LookupError, usize)> {
        let mut attempt = 0usize;
        loop {
            match adapter.lookup(identifier.kind, &identifier.value) {
                Ok(records) => return Ok(records),
                Err(err) if err.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    tracing::debug!(source = %adapter.source(), %identifier, attempt, error = %err, "retrying");
                    thread::sleep(self.settings.retry_base_delay * attempt as u32);
                }
                Err(err) => return Err((err, attempt + 1)),
            }
        }
    }

    fn apply_overrides(
        &self,
        job: &mut Job,
        store: &Store,
        kind: EntityKind,
        seed_identifiers: &[Identifier],
    ) -> Result<(), KiraError> {
        let key = job.report.composite_key.clone();
        let entity = store.get_required(&key)?;
        for pin in &self.overrides {
            let matches = seed_identifiers.contains(&pin.identifier) || entity.knows(&pin.identifier);
            if !matches {
                continue;
            }
            let conflict = store.apply_override(
                &key,
                kind,
                &pin.field,
                &pin.value,
                &self.resolver,
                &job.report.run_id,
            )?;
            tracing::info!(key = %key, field = %pin.field, "applied manual override");
            if conflict.is_some() {
                job.report.conflicts_detected += 1;
            }
        }
        Ok(())
    }
}

struct Job {
    report: JobReport,
    queries: Vec<QueryLogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_token_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn termination_labels() {
        assert_eq!(Termination::FixedPoint.to_string(), "fixed-point");
        assert_eq!(
            serde_json::to_string(&Termination::TimedOut).unwrap(),
            "\"timed-out\""
        );
    }
}
