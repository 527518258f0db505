use std::fmt;
use std::time::Instant;

use fj_frame::Dataset;
use tracing::{debug, info, warn};

use crate::execute::{Phase, execute_chunked, execute_direct};
use crate::memory::{self, MemoryProbe, SystemMemoryProbe};
use crate::metadata::compute_metadata;
use crate::model::{
    ExecutionStrategy, JoinConfig, JoinError, JoinResult, JoinType, ValidationResult,
};
use crate::options::ExecutionOptions;
use crate::validate;

/// Rows taken from each side before a preview cross join.
const CROSS_PREVIEW_ROWS: usize = 50;

/// Entry point for joining one pair of datasets.
///
/// Holds its own copies of both inputs; callers may drop or mutate theirs
/// while the manager is alive. Every call runs to completion on the calling
/// thread.
pub struct JoinManager {
    left: Dataset,
    right: Dataset,
    options: ExecutionOptions,
    probe: Box<dyn MemoryProbe>,
}

impl fmt::Debug for JoinManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinManager")
            .field("left_rows", &self.left.len())
            .field("right_rows", &self.right.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl JoinManager {
    #[must_use]
    pub fn new(left: &Dataset, right: &Dataset) -> Self {
        Self {
            left: left.clone(),
            right: right.clone(),
            options: ExecutionOptions::default(),
            probe: Box::new(SystemMemoryProbe),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_memory_probe(mut self, probe: impl MemoryProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    #[must_use]
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Validate, estimate, execute and describe one join.
    ///
    /// Never fails: configuration and execution problems come back as a
    /// result with `success() == false` and an error message.
    #[must_use]
    pub fn execute_join(&self, config: &JoinConfig) -> JoinResult {
        let started = Instant::now();
        debug!(phase = %Phase::Validating, join_type = %config.join_type(), "join phase");

        let validation = self.validate_join(config);
        if !validation.is_valid() {
            let message = validation.error_summary();
            debug!(phase = %Phase::Failed, %message, "join phase");
            return JoinResult::failed(config.clone(), message, elapsed(started));
        }

        debug!(phase = %Phase::Estimating, "join phase");
        let estimated_mb = self.estimate_memory(config);
        let available_mb = self.probe.available_mb();
        let chunked = self.should_use_chunking(config, estimated_mb, available_mb);
        info!(
            join_type = %config.join_type(),
            left_rows = self.left.len(),
            right_rows = self.right.len(),
            estimated_mb,
            available_mb,
            chunked,
            "selected join strategy"
        );

        let executed = if chunked {
            debug!(phase = %Phase::Chunked, "join phase");
            execute_chunked(&self.left, &self.right, config, &self.options)
        } else {
            debug!(phase = %Phase::Direct, "join phase");
            execute_direct(&self.left, &self.right, config, &self.options)
                .map(|data| (data, ExecutionStrategy::Direct))
        };

        let outcome = executed.and_then(|(data, strategy)| {
            debug!(phase = %Phase::ComputingMetadata, ?strategy, rows = data.len(), "join phase");
            self.describe(config, data, strategy, started)
        });

        match outcome {
            Ok(result) => {
                debug!(
                    phase = %Phase::Done,
                    result_rows = result.metadata().result_rows,
                    matched_rows = result.metadata().matched_rows,
                    "join phase"
                );
                result
            }
            Err(err) => {
                let message = execution_failure(&err);
                warn!(%message, "join failed");
                JoinResult::failed(config.clone(), message, elapsed(started))
            }
        }
    }

    /// Wraps `data` with its metadata. The processing time is taken after the
    /// metadata pass, so it spans the whole call from `started`.
    fn describe(
        &self,
        config: &JoinConfig,
        data: Dataset,
        strategy: ExecutionStrategy,
        started: Instant,
    ) -> Result<JoinResult, JoinError> {
        let metadata = compute_metadata(&self.left, &self.right, config, &data)?
            .with_processing_time(elapsed(started));
        Ok(JoinResult::succeeded(data, metadata, config.clone(), strategy))
    }

    #[must_use]
    pub fn validate_join(&self, config: &JoinConfig) -> ValidationResult {
        validate::validate_join(&self.left, &self.right, config, &self.options)
    }

    /// At most `max_rows` rows of the join's output; empty on any failure.
    ///
    /// Cross joins combine 50-row prefixes of each side, so the preview is
    /// indicative rather than a prefix of the real result.
    #[must_use]
    pub fn get_join_preview(&self, config: &JoinConfig, max_rows: usize) -> Dataset {
        let preview = if config.join_type() == JoinType::Cross {
            self.left.head(CROSS_PREVIEW_ROWS).and_then(|left| {
                self.right
                    .head(CROSS_PREVIEW_ROWS)
                    .map(|right| (left, right))
            })
            .map_err(JoinError::from)
            .and_then(|(left, right)| execute_direct(&left, &right, config, &self.options))
        } else {
            execute_direct(&self.left, &self.right, config, &self.options)
        };

        match preview.and_then(|data| Ok(data.head(max_rows)?)) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "join preview failed; returning empty dataset");
                Dataset::empty()
            }
        }
    }

    #[must_use]
    pub fn estimate_memory(&self, config: &JoinConfig) -> f64 {
        memory::estimate_memory_mb(&self.left, &self.right, config, &self.options)
    }

    #[must_use]
    pub fn should_use_chunking(
        &self,
        config: &JoinConfig,
        estimated_mb: f64,
        available_mb: f64,
    ) -> bool {
        memory::should_use_chunking(
            &self.left,
            &self.right,
            config,
            estimated_mb,
            available_mb,
            &self.options,
        )
    }

    /// Free memory as reported by the configured probe, sampled now.
    #[must_use]
    pub fn available_memory_mb(&self) -> f64 {
        self.probe.available_mb()
    }
}

fn execution_failure(err: &JoinError) -> String {
    format!("Join execution failed: {err}")
}

fn elapsed(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use fj_frame::Dataset;
    use fj_types::Scalar;

    use super::JoinManager;
    use crate::memory::FixedMemoryProbe;
    use crate::model::{ExecutionStrategy, JoinConfig, JoinType};
    use crate::options::ExecutionOptions;

    fn frame(key: &str, values: &[i64], extra: &str) -> Dataset {
        Dataset::from_dict(vec![
            (key, values.iter().copied().map(Scalar::Int64).collect()),
            (
                extra,
                values.iter().map(|v| Scalar::Utf8(format!("{extra}{v}"))).collect(),
            ),
        ])
        .expect("frame")
    }

    fn manager() -> JoinManager {
        JoinManager::new(
            &frame("id", &[1, 2, 3, 4], "lhs"),
            &frame("id", &[1, 2, 3, 5], "rhs"),
        )
        .with_memory_probe(FixedMemoryProbe(1_024.0))
    }

    #[test]
    fn invalid_config_short_circuits_with_validation_message() {
        let manager = manager();
        let config = JoinConfig::on(JoinType::Inner, ["missing_col"]);
        let validation = manager.validate_join(&config);
        let result = manager.execute_join(&config);
        assert!(!result.success());
        assert_eq!(result.error_message(), Some(validation.error_summary().as_str()));
        assert!(result.error_message().is_some_and(|m| m.contains("missing_col")));
        assert!(result.data().is_empty());
    }

    #[test]
    fn execution_errors_are_wrapped_not_raised() {
        let left = Dataset::from_dict(vec![("k", vec![Scalar::Int64(1)])]).expect("left");
        let right = Dataset::from_dict(vec![("k", vec![Scalar::from("1")])]).expect("right");
        let manager = JoinManager::new(&left, &right).with_memory_probe(FixedMemoryProbe(1e6));
        let result = manager.execute_join(&JoinConfig::on(JoinType::Inner, ["k"]));
        assert!(!result.success());
        assert!(
            result
                .error_message()
                .is_some_and(|m| m.starts_with("Join execution failed: "))
        );
        assert_eq!(result.metadata().result_rows, 0);
    }

    #[test]
    fn low_memory_selects_chunked_strategy() {
        let options = ExecutionOptions {
            keyed_min_reference_rows: 1,
            keyed_min_slice_rows: 1,
            ..ExecutionOptions::default()
        };
        let roomy = manager().with_options(options.clone());
        let starved = manager()
            .with_options(options)
            .with_memory_probe(FixedMemoryProbe(0.0));
        let config = JoinConfig::on(JoinType::Left, ["id"]);

        let direct = roomy.execute_join(&config);
        let chunked = starved.execute_join(&config);
        assert_eq!(direct.strategy(), Some(ExecutionStrategy::Direct));
        assert_eq!(chunked.strategy(), Some(ExecutionStrategy::Chunked));
        assert_eq!(direct.metadata().result_rows, chunked.metadata().result_rows);
        assert_eq!(direct.metadata().matched_rows, chunked.metadata().matched_rows);
    }

    #[test]
    fn preview_truncates_and_degrades_to_empty() {
        let manager = manager();
        let preview = manager.get_join_preview(&JoinConfig::cross(), 5);
        assert_eq!(preview.len(), 5);
        assert_eq!(preview.num_columns(), 4);

        let keyed = manager.get_join_preview(&JoinConfig::on(JoinType::Left, ["id"]), 2);
        assert_eq!(keyed.len(), 2);

        let broken = manager.get_join_preview(&JoinConfig::on(JoinType::Left, ["nope"]), 10);
        assert!(broken.is_empty());
        assert_eq!(broken.num_columns(), 0);
    }

    #[test]
    fn processing_time_is_stamped_after_metadata() {
        let manager = manager();
        let config = JoinConfig::on(JoinType::Left, ["id"]);
        let data = manager.get_join_preview(&config, usize::MAX);
        let started = Instant::now();
        thread::sleep(Duration::from_millis(10));
        let before_metadata = started.elapsed().as_secs_f64();

        let result = manager
            .describe(&config, data, ExecutionStrategy::Direct, started)
            .expect("describe");
        assert!(result.processing_time() >= before_metadata);
        assert_eq!(
            result.processing_time(),
            result.metadata().processing_time_seconds
        );
        assert_eq!(result.metadata().matched_rows, 3);
    }

    #[test]
    fn processing_time_stays_within_the_call() {
        let manager = manager();
        let wall = Instant::now();
        let result = manager.execute_join(&JoinConfig::on(JoinType::Inner, ["id"]));
        let wall = wall.elapsed().as_secs_f64();
        assert!(result.success());
        assert!(result.processing_time() <= wall);
        assert_eq!(
            result.processing_time(),
            result.metadata().processing_time_seconds
        );
    }

    #[test]
    fn manager_keeps_its_own_copies() {
        let mut left = frame("id", &[1, 2], "lhs");
        let right = frame("id", &[2], "rhs");
        let manager = JoinManager::new(&left, &right).with_memory_probe(FixedMemoryProbe(1e6));
        left = Dataset::empty();
        assert!(left.is_empty());
        let result = manager.execute_join(&JoinConfig::on(JoinType::Inner, ["id"]));
        assert!(result.success());
        assert_eq!(result.metadata().left_rows, 2);
        assert_eq!(result.metadata().result_rows, 1);
    }
}
