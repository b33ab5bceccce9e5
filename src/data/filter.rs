use super::model::{Compound, CorrectedMeasurement};

// ---------------------------------------------------------------------------
// Compound list filter (side panel)
// ---------------------------------------------------------------------------

/// Per-compound counts shown in the compound list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompoundSummary {
    pub compound: Compound,
    pub records: usize,
    pub dropped: usize,
    pub flagged: usize,
}

impl CompoundSummary {
    pub fn new(compound: Compound, records: &[CorrectedMeasurement], flagged: usize) -> Self {
        Self {
            compound,
            records: records.len(),
            dropped: records.iter().filter(|c| c.dropped).count(),
            flagged,
        }
    }
}

/// Which compounds the list shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundFilter {
    /// Case-insensitive substring of the compound name; empty shows all.
    pub query: String,
    /// Only compounds with at least one flagged point.
    pub flagged_only: bool,
}

impl CompoundFilter {
    pub fn matches(&self, summary: &CompoundSummary) -> bool {
        if self.flagged_only && summary.flagged == 0 {
            return false;
        }
        let query = self.query.trim();
        query.is_empty()
            || summary
                .compound
                .name()
                .to_lowercase()
                .contains(&query.to_lowercase())
    }
}

/// Indices of the summaries that pass the filter, in input order.
pub fn filtered_indices(summaries: &[CompoundSummary], filter: &CompoundFilter) -> Vec<usize> {
    summaries
        .iter()
        .enumerate()
        .filter(|(_, s)| filter.matches(s))
        .map(|(i, _)| i)
        .collect()
}
