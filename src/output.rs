use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ConflictsResult, EnrichResult, ListResult, ProgressEvent, ProgressSink, ShowResult};
use crate::kgx::ExportSummary;
use crate::store::Rekeyed;

/// Machine-readable results on stdout; progress goes to the log on stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_enrich(result: &EnrichResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_show(result: &ShowResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_conflicts(result: &ConflictsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_rekey(result: &Rekeyed) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}
