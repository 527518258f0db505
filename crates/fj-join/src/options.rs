use serde::{Deserialize, Serialize};

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Tunables for strategy selection and chunked execution.
///
/// Deserializes with `#[serde(default)]`, so a host config file only needs
/// the fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Chunk when the estimate exceeds this fraction of available memory.
    pub memory_fraction: f64,
    /// Multiplier applied to the raw cell estimate.
    pub overhead_factor: f64,
    pub bytes_per_cell: usize,
    /// Cross joins whose row product reaches this always chunk.
    pub cross_chunk_row_threshold: usize,
    pub cross_slice_divisor: usize,
    pub cross_min_slice_rows: usize,
    /// Keyed chunking needs at least this many rows on the smaller side.
    pub keyed_min_reference_rows: usize,
    pub keyed_max_slices: usize,
    pub keyed_min_slice_rows: usize,
    /// Build merge position vectors in a bump arena when they fit the budget.
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            memory_fraction: 0.5,
            overhead_factor: 1.5,
            bytes_per_cell: 8,
            cross_chunk_row_threshold: 1_000_000,
            cross_slice_divisor: 10,
            cross_min_slice_rows: 1_000,
            keyed_min_reference_rows: 10_000,
            keyed_max_slices: 5,
            keyed_min_slice_rows: 5_000,
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

impl ExecutionOptions {
    /// Slice length for the smaller side of a chunked cross join.
    #[must_use]
    pub fn cross_slice_rows(&self, rows: usize) -> usize {
        rows.div_ceil(self.cross_slice_divisor.max(1))
            .max(self.cross_min_slice_rows)
            .max(1)
    }

    /// Slice length for the split side of a chunked keyed join.
    #[must_use]
    pub fn keyed_slice_rows(&self, rows: usize) -> usize {
        rows.div_ceil(self.keyed_max_slices.max(1))
            .max(self.keyed_min_slice_rows)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionOptions;

    #[test]
    fn slice_sizes_respect_minimums() {
        let options = ExecutionOptions::default();
        assert_eq!(options.cross_slice_rows(500), 1_000);
        assert_eq!(options.cross_slice_rows(25_000), 2_500);
        assert_eq!(options.keyed_slice_rows(12_000), 5_000);
        assert_eq!(options.keyed_slice_rows(100_001), 20_001);
    }

    #[test]
    fn zero_divisors_do_not_panic() {
        let options = ExecutionOptions {
            cross_slice_divisor: 0,
            keyed_max_slices: 0,
            cross_min_slice_rows: 0,
            keyed_min_slice_rows: 0,
            ..ExecutionOptions::default()
        };
        assert_eq!(options.cross_slice_rows(0), 1);
        assert_eq!(options.keyed_slice_rows(7), 7);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let options: ExecutionOptions =
            serde_json::from_str(r#"{"memory_fraction": 0.25}"#).expect("parse");
        assert_eq!(options.memory_fraction, 0.25);
        assert_eq!(options.keyed_max_slices, 5);
    }
}
