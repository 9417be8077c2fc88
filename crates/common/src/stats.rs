use serde::Serialize;

/// Aggregate counts reported by batch ingestion at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub processed: u64,
    pub inserted: u64,
    pub skipped_unparseable: u64,
    pub skipped_no_id: u64,
    pub skipped_no_vector: u64,
    pub skipped_duplicate: u64,
}

impl IngestReport {
    pub const fn skipped(&self) -> u64 {
        self.skipped_unparseable + self.skipped_no_id + self.skipped_no_vector + self.skipped_duplicate
    }

    pub fn merge(&mut self, other: &Self) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.skipped_unparseable += other.skipped_unparseable;
        self.skipped_no_id += other.skipped_no_id;
        self.skipped_no_vector += other.skipped_no_vector;
        self.skipped_duplicate += other.skipped_duplicate;
    }
}

#[cfg(test)]
mod tests {
    use super::IngestReport;

    #[test]
    fn skipped_sums_every_reason() {
        let mut report = IngestReport {
            processed: 10,
            inserted: 6,
            skipped_unparseable: 1,
            skipped_no_id: 1,
            skipped_no_vector: 1,
            skipped_duplicate: 1,
        };
        assert_eq!(report.skipped(), 4);
        report.merge(&IngestReport {
            processed: 2,
            inserted: 2,
            ..IngestReport::default()
        });
        assert_eq!(report.processed, 12);
        assert_eq!(report.inserted + report.skipped(), report.processed);
    }
}
