use std::fmt;

/// Run-wide counters. Monotonic; never reset while a run is in progress.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub files: u64,
    pub lines: u64,
    pub inserted: u64,
    pub parse_errors: u64,
    pub bad_lookups: u64,
    pub bad_urls: u64,
    pub empty_hosts: u64,
    pub host_errors: u64,
    pub unknown_codes: u64,
    pub exec_errors: u64,
    pub over_length: u64,
    pub committed_rows: u64,
    pub chunks: u64,
}

impl IngestStats {
    /// Lines dropped for any reason.
    pub fn skipped(&self) -> u64 {
        self.parse_errors
            + self.bad_lookups
            + self.bad_urls
            + self.empty_hosts
            + self.host_errors
            + self.unknown_codes
            + self.exec_errors
    }

    /// Counter growth since an earlier snapshot of the same run.
    pub fn since(&self, earlier: &IngestStats) -> IngestStats {
        IngestStats {
            files: self.files - earlier.files,
            lines: self.lines - earlier.lines,
            inserted: self.inserted - earlier.inserted,
            parse_errors: self.parse_errors - earlier.parse_errors,
            bad_lookups: self.bad_lookups - earlier.bad_lookups,
            bad_urls: self.bad_urls - earlier.bad_urls,
            empty_hosts: self.empty_hosts - earlier.empty_hosts,
            host_errors: self.host_errors - earlier.host_errors,
            unknown_codes: self.unknown_codes - earlier.unknown_codes,
            exec_errors: self.exec_errors - earlier.exec_errors,
            over_length: self.over_length - earlier.over_length,
            committed_rows: self.committed_rows - earlier.committed_rows,
            chunks: self.chunks - earlier.chunks,
        }
    }
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Ingest Complete ===")?;
        writeln!(f, "Files:            {}", self.files)?;
        writeln!(f, "Lines:            {}", self.lines)?;
        writeln!(f, "Inserted:         {}", self.inserted)?;
        writeln!(f, "Committed:        {} rows in {} chunks", self.committed_rows, self.chunks)?;
        writeln!(f, "\nSkipped:          {}", self.skipped())?;
        writeln!(f, "  Malformed:      {}", self.parse_errors)?;
        writeln!(f, "  Unknown actor:  {}", self.bad_lookups)?;
        writeln!(f, "  Bad URL:        {}", self.bad_urls)?;
        writeln!(f, "  Empty host:     {}", self.empty_hosts)?;
        writeln!(f, "  Host failed:    {}", self.host_errors)?;
        writeln!(f, "  Unknown code:   {}", self.unknown_codes)?;
        writeln!(f, "  Rejected row:   {}", self.exec_errors)?;
        if self.over_length > 0 {
            writeln!(f, "\nOver-length records: {}", self.over_length)?;
        }
        Ok(())
    }
}
