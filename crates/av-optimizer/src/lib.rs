//! # av-optimizer
//!
//! Batch-size search and tuning session orchestration for autovram.
//!
//! Provides the two-phase batch-size search over a trial executor, the
//! candidate sources that propose templates to search, and the tuning run
//! that ranks results across templates.

mod candidates;
mod search;
mod tuning;

pub use candidates::{
    available_sources, resolve_source, CandidateSource, ExternalAutobatchSource,
    HeuristicSource, ServingSource,
};
pub use search::{SearchController, SearchSettings};
pub use tuning::{
    BestConfig, TrialSummary, TuningConfig, TuningId, TuningReport, TuningRun, TuningState,
};
