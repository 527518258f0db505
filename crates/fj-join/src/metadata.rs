use chrono::Utc;
use fj_frame::Dataset;

use crate::merge::{ProvenanceCounts, outer_provenance};
use crate::model::{JoinConfig, JoinError, JoinMetadata, JoinType};

/// Match statistics for a finished join.
///
/// Keyed counts come from an independent outer merge over the full inputs,
/// so they do not depend on which strategy produced `result`. INNER reports
/// no unmatched rows since none reach its result; LEFT and RIGHT report both
/// unmatched counts.
///
/// `processing_time_seconds` is left at zero; the caller stamps the wall
/// time with [`JoinMetadata::with_processing_time`] once this pass is done.
pub fn compute_metadata(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    result: &Dataset,
) -> Result<JoinMetadata, JoinError> {
    let counts = match config.join_type() {
        JoinType::Cross => ProvenanceCounts {
            both: result.len(),
            left_only: 0,
            right_only: 0,
        },
        JoinType::Inner => ProvenanceCounts {
            left_only: 0,
            right_only: 0,
            ..outer_counts(left, right, config)?
        },
        JoinType::Left | JoinType::Right => outer_counts(left, right, config)?,
    };

    Ok(JoinMetadata {
        left_rows: left.len(),
        right_rows: right.len(),
        result_rows: result.len(),
        join_type: config.join_type(),
        join_keys: config.left_keys().to_vec(),
        matched_rows: counts.both,
        left_only_rows: counts.left_only,
        right_only_rows: counts.right_only,
        memory_usage_mb: result.memory_usage_mb(),
        processing_time_seconds: 0.0,
        timestamp: Utc::now(),
    })
}

fn outer_counts(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
) -> Result<ProvenanceCounts, JoinError> {
    let tags = outer_provenance(left, right, config.left_keys(), config.right_keys())?;
    Ok(ProvenanceCounts::tally(&tags))
}

#[cfg(test)]
mod tests {
    use fj_frame::Dataset;
    use fj_types::Scalar;

    use super::compute_metadata;
    use crate::model::{JoinConfig, JoinType};

    fn keys(values: &[i64]) -> Dataset {
        Dataset::from_dict(vec![(
            "id",
            values.iter().copied().map(Scalar::Int64).collect(),
        )])
        .expect("frame")
    }

    #[test]
    fn left_join_reports_unmatched_rows_on_both_sides() {
        let (left, right) = (keys(&[1, 2, 3, 4]), keys(&[1, 2, 3, 5]));
        let config = JoinConfig::on(JoinType::Left, ["id"]);
        let meta = compute_metadata(&left, &right, &config, &left).expect("metadata");
        assert_eq!(meta.matched_rows, 3);
        assert_eq!(meta.left_only_rows, 1);
        assert_eq!(meta.right_only_rows, 1);
        assert_eq!(meta.join_keys, vec!["id".to_owned()]);
        assert!((meta.left_coverage() - 0.75).abs() < f64::EPSILON);
        assert_eq!(meta.processing_time_seconds, 0.0);
        assert_eq!(meta.with_processing_time(1.25).processing_time_seconds, 1.25);
    }

    #[test]
    fn inner_join_has_no_unmatched_rows() {
        let (left, right) = (keys(&[1, 2, 9]), keys(&[1, 2, 3]));
        let config = JoinConfig::on(JoinType::Inner, ["id"]);
        let meta = compute_metadata(&left, &right, &config, &keys(&[1, 2]))
            .expect("metadata");
        assert_eq!(meta.matched_rows, meta.result_rows);
        assert_eq!((meta.left_only_rows, meta.right_only_rows), (0, 0));
    }

    #[test]
    fn cross_join_counts_every_row_as_matched() {
        let (left, right) = (keys(&[1, 2]), keys(&[3, 4, 5]));
        let result = keys(&[0; 6]);
        let meta = compute_metadata(&left, &right, &JoinConfig::cross(), &result)
            .expect("metadata");
        assert_eq!(meta.matched_rows, 6);
        assert_eq!((meta.left_only_rows, meta.right_only_rows), (0, 0));
        assert!(meta.memory_usage_mb > 0.0);
    }
}
