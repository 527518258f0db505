use fj_frame::Dataset;
use sysinfo::System;

use crate::model::{JoinConfig, JoinType};
use crate::options::ExecutionOptions;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Source of the host's free memory, sampled once per join.
pub trait MemoryProbe {
    fn available_mb(&self) -> f64;
}

/// Reads available memory from the operating system on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_mb(&self) -> f64 {
        let mut system = System::new();
        system.refresh_memory();
        system.available_memory() as f64 / BYTES_PER_MB
    }
}

/// A pinned memory budget, for hosts that cap the engine and for tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedMemoryProbe(pub f64);

impl MemoryProbe for FixedMemoryProbe {
    fn available_mb(&self) -> f64 {
        self.0
    }
}

/// Estimated result footprint in MB.
///
/// Keyed joins use `max(left_rows, right_rows)`, which overestimates inner
/// joins and biases toward chunking.
#[must_use]
pub fn estimate_memory_mb(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
) -> f64 {
    let rows = match config.join_type() {
        JoinType::Cross => left.len().saturating_mul(right.len()),
        JoinType::Inner | JoinType::Left | JoinType::Right => left.len().max(right.len()),
    };
    let cols = left.num_columns() + right.num_columns();
    let bytes = rows as f64 * cols as f64 * options.bytes_per_cell as f64;
    bytes / BYTES_PER_MB * options.overhead_factor
}

#[must_use]
pub fn should_use_chunking(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    estimated_mb: f64,
    available_mb: f64,
    options: &ExecutionOptions,
) -> bool {
    if config.join_type() == JoinType::Cross
        && left.len().saturating_mul(right.len()) >= options.cross_chunk_row_threshold
    {
        return true;
    }
    estimated_mb > options.memory_fraction * available_mb
}

#[cfg(test)]
mod tests {
    use fj_frame::Dataset;
    use fj_types::Scalar;

    use super::{
        FixedMemoryProbe, MemoryProbe, SystemMemoryProbe, estimate_memory_mb, should_use_chunking,
    };
    use crate::model::{JoinConfig, JoinType};
    use crate::options::ExecutionOptions;

    fn frame(rows: i64, cols: usize) -> Dataset {
        let data = (0..cols)
            .map(|c| {
                (
                    ["a", "b", "c", "d"][c],
                    (0..rows).map(Scalar::Int64).collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>();
        Dataset::from_dict(data).expect("frame")
    }

    #[test]
    fn cross_estimate_uses_row_product() {
        let left = frame(1_000, 2);
        let right = frame(2_000, 2);
        let options = ExecutionOptions::default();
        let mb = estimate_memory_mb(&left, &right, &JoinConfig::cross(), &options);
        let expected = 2_000_000.0 * 4.0 * 8.0 / 1_048_576.0 * 1.5;
        assert!((mb - expected).abs() < 1e-9);
    }

    #[test]
    fn keyed_estimate_uses_larger_side() {
        let left = frame(100, 1);
        let right = frame(300, 2);
        let options = ExecutionOptions::default();
        let config = JoinConfig::on(JoinType::Inner, ["a"]);
        let mb = estimate_memory_mb(&left, &right, &config, &options);
        let expected = 300.0 * 3.0 * 8.0 / 1_048_576.0 * 1.5;
        assert!((mb - expected).abs() < 1e-12);
    }

    #[test]
    fn chunking_triggers_above_half_of_available_memory() {
        let left = frame(10, 1);
        let right = frame(10, 1);
        let options = ExecutionOptions::default();
        let config = JoinConfig::on(JoinType::Left, ["a"]);
        assert!(!should_use_chunking(&left, &right, &config, 50.0, 100.0, &options));
        assert!(should_use_chunking(&left, &right, &config, 50.1, 100.0, &options));
    }

    #[test]
    fn large_cross_products_always_chunk() {
        let left = frame(1_000, 1);
        let right = frame(1_000, 1);
        let options = ExecutionOptions::default();
        assert!(should_use_chunking(
            &left,
            &right,
            &JoinConfig::cross(),
            0.0,
            f64::MAX,
            &options
        ));
        let small = frame(999, 1);
        assert!(!should_use_chunking(
            &small,
            &right,
            &JoinConfig::cross(),
            0.0,
            f64::MAX,
            &options
        ));
    }

    #[test]
    fn probes_report_memory() {
        assert_eq!(FixedMemoryProbe(512.0).available_mb(), 512.0);
        assert!(SystemMemoryProbe.available_mb() >= 0.0);
    }
}
