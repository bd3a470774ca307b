//! Statistics and ranking collaborator.

use log::debug;
use shared::Record;

pub trait StatsEngine: Send + Sync {
    /// Formatted `(stats, rank)` strings for a persona on a title.
    fn stats_and_rank(&self, persona: &str, vers: &str) -> (String, String);

    /// Consumes a finished game's per-player report.
    fn record_report(&self, vers: &str, report: &Record);
}

/// Engine that keeps nothing and reports empty stats.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStats;

impl StatsEngine for NoStats {
    fn stats_and_rank(&self, _persona: &str, _vers: &str) -> (String, String) {
        (",,,,,,,,,".to_string(), String::new())
    }

    fn record_report(&self, vers: &str, report: &Record) {
        debug!("Dropping {} report with {} fields", vers, report.fields.len());
    }
}
