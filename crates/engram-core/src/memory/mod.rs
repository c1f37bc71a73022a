//! Memory Model
//!
//! The tiered memory data model and its lifecycle operations:
//! raw turns (immutable), compressed insights (embedded, read-only),
//! a bounded working set, reflective episodes, and the stale archive.

mod tiers;
mod types;

pub use tiers::{CompressionOutcome, MemoryTiers, TierError};
pub use types::{
    ArchiveReason, Episode, GroundTruthQuery, Insight, RawTurn, ScoredEpisode, StaleItem,
    ValidationRecord, ValidationStatus, WorkingItem, WorkingUpsert,
};
