//! Backfill of tracked pairs
//!
//! [`BackfillOrchestrator`] runs ticks; [`TickSummary`] reports what each
//! tick did per pair.

mod orchestrator;
mod summary;

pub use orchestrator::{
    BackfillConfig, BackfillError, BackfillOrchestrator, BackfillOrchestratorBuilder, TickMode,
};
pub use summary::{PairError, PairOutcome, PairStats, TickSummary};
