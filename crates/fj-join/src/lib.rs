#![forbid(unsafe_code)]

//! Relational joins (INNER, LEFT, RIGHT, CROSS) over [`fj_frame::Dataset`]
//! with memory-aware direct or chunked execution.
//!
//! [`JoinManager`] is the entry point: it validates a [`JoinConfig`], picks a
//! strategy from a memory estimate, executes, and reports match statistics
//! in a [`JoinResult`].

mod execute;
mod manager;
mod memory;
mod merge;
mod metadata;
mod model;
mod options;
mod validate;

pub use execute::{Phase, execute_chunked, execute_direct};
pub use manager::JoinManager;
pub use memory::{
    FixedMemoryProbe, MemoryProbe, SystemMemoryProbe, estimate_memory_mb, should_use_chunking,
};
pub use merge::{
    INDICATOR_COLUMN, MergeHow, MergeOutput, MergeSpec, Provenance, ProvenanceCounts,
    cross_product, merge, outer_provenance,
};
pub use metadata::compute_metadata;
pub use model::{
    DEFAULT_SUFFIXES, ExecutionStrategy, JoinConfig, JoinError, JoinMetadata, JoinResult,
    JoinType, Side, ValidationResult,
};
pub use options::{DEFAULT_ARENA_BUDGET_BYTES, ExecutionOptions};
pub use validate::validate_join;

/// Row limit used by hosts that do not pick their own preview size.
pub const DEFAULT_PREVIEW_ROWS: usize = 100;
