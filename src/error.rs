use thiserror::Error;

use crate::correction::rules::RuleKindTag;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// A malformed rule table. Fatal: the run is aborted before any record is
/// corrected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("rule table names unknown compound '{0}'")]
    UnknownCompound(String),

    #[error("{compound}: overlapping {kind} windows ({first} and {second})")]
    OverlappingRuleWindow {
        compound: String,
        kind: RuleKindTag,
        first: String,
        second: String,
    },

    #[error("{compound}: {kind} window is empty ({window})")]
    InvalidWindow {
        compound: String,
        kind: RuleKindTag,
        window: String,
    },

    #[error("{compound}: {kind} parameter must be a positive number, got {value}")]
    InvalidParameter {
        compound: String,
        kind: RuleKindTag,
        value: f64,
    },

    #[error("{compound}: cannot parse date '{value}'")]
    InvalidDate { compound: String, value: String },

    #[error("cannot parse rule document: {0}")]
    Parse(String),
}

/// A problem with one measurement. The record is rejected and the batch
/// carries on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("compound '{0}' has no entry in the rule table")]
    UnknownCompound(String),

    #[error("{compound} at {timestamp}: negative mixing ratio {value}")]
    NegativeMixingRatio {
        compound: String,
        timestamp: String,
        value: f64,
    },

    #[error("{compound} at {timestamp}: averaged pair predates two-sample collection")]
    InvalidSampleCount { compound: String, timestamp: String },

    #[error("{compound} at {timestamp}: earlier than previous record {previous}")]
    OutOfOrder {
        compound: String,
        timestamp: String,
        previous: String,
    },
}

/// A rejected user interaction. The session state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionError {
    #[error("unknown axis field '{0}'")]
    UnknownField(String),

    #[error("drag box is below the minimum size")]
    DragTooSmall,

    #[error("no points loaded for {0}")]
    EmptySeries(String),
}

/// A failed save. The in-memory selection is kept so the user can retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("saving flags failed: {0}")]
    Store(String),

    #[error("save worker exited without reporting")]
    WorkerGone,
}
