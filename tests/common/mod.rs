#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_culture_enrich::adapters::IdentifierAdapter;
use kira_culture_enrich::domain::{EntityKind, IdentifierType, SourceId};
use kira_culture_enrich::entity::{FieldValue, SourceRecord};
use kira_culture_enrich::error::LookupError;
use kira_culture_enrich::store::Store;

pub type CallLog = Arc<Mutex<Vec<(SourceId, IdentifierType, String)>>>;

enum Scripted {
    Records(Vec<SourceRecord>),
    /// Fails transiently this many times, then answers with the records.
    FlakyThen(usize, Vec<SourceRecord>),
    Permanent,
}

/// In-memory adapter answering from a script; unscripted lookups are
/// "not found".
pub struct FakeAdapter {
    source: SourceId,
    kind: EntityKind,
    accepts: Vec<IdentifierType>,
    script: Mutex<HashMap<(IdentifierType, String), Scripted>>,
    delay: Duration,
    calls: CallLog,
}

impl FakeAdapter {
    pub fn new(source: SourceId, kind: EntityKind, accepts: &[IdentifierType]) -> Self {
        Self {
            source,
            kind,
            accepts: accepts.to_vec(),
            script: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: CallLog::default(),
        }
    }

    pub fn with_calls(mut self, calls: &CallLog) -> Self {
        self.calls = calls.clone();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn answer(self, kind: IdentifierType, value: &str, records: Vec<SourceRecord>) -> Self {
        self.script_entry(kind, value, Scripted::Records(records))
    }

    pub fn flaky(
        self,
        kind: IdentifierType,
        value: &str,
        failures: usize,
        records: Vec<SourceRecord>,
    ) -> Self {
        self.script_entry(kind, value, Scripted::FlakyThen(failures, records))
    }

    pub fn reject(self, kind: IdentifierType, value: &str) -> Self {
        self.script_entry(kind, value, Scripted::Permanent)
    }

    fn script_entry(self, kind: IdentifierType, value: &str, entry: Scripted) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert((kind, value.to_string()), entry);
        self
    }

    pub fn boxed(self) -> Box<dyn IdentifierAdapter> {
        Box::new(self)
    }
}

impl IdentifierAdapter for FakeAdapter {
    fn source(&self) -> SourceId {
        self.source
    }

    fn accepts(&self, kind: IdentifierType) -> bool {
        self.accepts.contains(&kind)
    }

    fn serves(&self, entity: EntityKind) -> bool {
        entity == self.kind
    }

    fn lookup(&self, kind: IdentifierType, value: &str) -> Result<Vec<SourceRecord>, LookupError> {
        self.calls
            .lock()
            .unwrap()
            .push((self.source, kind, value.to_string()));
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let mut script = self.script.lock().unwrap();
        match script.get_mut(&(kind, value.to_string())) {
            None => Ok(Vec::new()),
            Some(Scripted::Records(records)) => Ok(records.clone()),
            Some(Scripted::FlakyThen(remaining, records)) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(LookupError::transient(self.source, "HTTP 503"))
                } else {
                    Ok(records.clone())
                }
            }
            Some(Scripted::Permanent) => Err(LookupError::permanent(self.source, "HTTP 400")),
        }
    }
}

pub fn record(source: SourceId, native: &str, fields: &[(&str, &str)]) -> SourceRecord {
    fields
        .iter()
        .fold(SourceRecord::new(source, native), |record, (field, value)| {
            record.with_field(field, FieldValue::text(*value))
        })
}

pub fn temp_store() -> (TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_paths(root.join(".kira-ce"), root.join("cache"));
    (temp, store)
}

pub fn calls_for(calls: &CallLog, kind: IdentifierType, value: &str) -> usize {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, called_kind, called_value)| *called_kind == kind && called_value == value)
        .count()
}
