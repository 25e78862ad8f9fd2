//! Throughput and error-rate lines derived from the run counters.

use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::stats::IngestStats;

/// A point-in-time view of the run, ready to be logged.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    stats: &'a IngestStats,
    elapsed: Duration,
    file: &'a str,
}

impl<'a> Progress<'a> {
    pub fn new(stats: &'a IngestStats, elapsed: Duration, file: &'a str) -> Self {
        Self {
            stats,
            elapsed,
            file,
        }
    }

    pub fn lines_per_sec(&self) -> f64 {
        per_sec(self.stats.lines, self.elapsed)
    }

    /// Valid rows per second.
    pub fn rows_per_sec(&self) -> f64 {
        per_sec(self.stats.inserted, self.elapsed)
    }

    /// Share of lines that were skipped, 0.0 when nothing was read.
    pub fn error_rate(&self) -> f64 {
        if self.stats.lines == 0 {
            return 0.0;
        }
        self.stats.skipped() as f64 / self.stats.lines as f64
    }
}

fn per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    count as f64 / secs
}

impl fmt::Display for Progress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;
        write!(
            f,
            "#{} inserted:{} rejected:{} no_person:{} malformed:{} bad_url:{} empty_host:{} \
             host_failed:{} unknown_code:{} over_length:{} {:.2} L/s {:.2} rows/s err:{:.2}% {}({})",
            s.lines,
            s.inserted,
            s.exec_errors,
            s.bad_lookups,
            s.parse_errors,
            s.bad_urls,
            s.empty_hosts,
            s.host_errors,
            s.unknown_codes,
            s.over_length,
            self.lines_per_sec(),
            self.rows_per_sec(),
            self.error_rate() * 100.0,
            self.file,
            s.files,
        )
    }
}

/// Log one progress line. No effect on control flow.
pub fn report(stats: &IngestStats, elapsed: Duration, file: &str) {
    let progress = Progress::new(stats, elapsed, file);
    info!(
        lines = stats.lines,
        inserted = stats.inserted,
        skipped = stats.skipped(),
        rows_per_sec = progress.rows_per_sec(),
        file,
        "{progress}"
    );
}
