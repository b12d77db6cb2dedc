//! Per-phase accounting of attempted, loaded, and skipped records

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Why a record did not make it into the store. None of these abort a phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable { line: usize, error: String },
    MissingField { line: usize, field: &'static str },
    Malformed { line: usize, field: &'static str, value: String },
    Banner { line: usize, label: String },
    DuplicateKey { line: usize, key: String },
    UnresolvedSector { line: usize, community_code: String, sector_name: String },
    UnresolvedCommunity { line: usize, community_code: String, year: i32 },
    InsertFailed { line: usize, key: String, error: String },
}

impl SkipReason {
    pub fn line(&self) -> usize {
        match self {
            SkipReason::Unreadable { line, .. }
            | SkipReason::MissingField { line, .. }
            | SkipReason::Malformed { line, .. }
            | SkipReason::Banner { line, .. }
            | SkipReason::DuplicateKey { line, .. }
            | SkipReason::UnresolvedSector { line, .. }
            | SkipReason::UnresolvedCommunity { line, .. }
            | SkipReason::InsertFailed { line, .. } => *line,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::Unreadable { .. } => "unreadable",
            SkipReason::MissingField { .. } => "missing_field",
            SkipReason::Malformed { .. } => "malformed",
            SkipReason::Banner { .. } => "banner",
            SkipReason::DuplicateKey { .. } => "duplicate_key",
            SkipReason::UnresolvedSector { .. } => "unresolved_sector",
            SkipReason::UnresolvedCommunity { .. } => "unresolved_community",
            SkipReason::InsertFailed { .. } => "insert_failed",
        }
    }
}

/// Rows handed to one insert batch and how many of them landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub rows: usize,
    pub succeeded: usize,
}

/// Result of one load phase. `succeeded` is the authoritative load count;
/// `attempted` counts every data row read from the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    #[serde(serialize_with = "serialize_skip_counts")]
    pub skipped: Vec<SkipReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<BatchSummary>,
}

impl LoadOutcome {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        self.attempted += 1;
        self.skipped.push(reason);
    }

    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    pub fn skip_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for reason in &self.skipped {
            *counts.entry(reason.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.skipped.iter().filter(|r| r.kind() == kind).count()
    }
}

// The full reason list can run into thousands of entries; the summary
// only carries totals per kind.
fn serialize_skip_counts<S>(skipped: &[SkipReason], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for reason in skipped {
        *counts.entry(reason.kind()).or_insert(0) += 1;
    }
    counts.serialize(serializer)
}
