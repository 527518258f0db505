//! Direct and chunked join execution plus the shared post-processing
//! (indicator, sort, projection).

use std::fmt;

use fj_columnar::Column;
use fj_frame::Dataset;
use fj_types::Scalar;
use tracing::debug;

use crate::merge::{
    INDICATOR_COLUMN, KeyIndex, MergeHow, MergeSpec, Provenance, cross_product, merge_using,
};
use crate::model::{ExecutionStrategy, JoinConfig, JoinError, JoinType, Side};
use crate::options::ExecutionOptions;

/// Lifecycle of one `execute_join` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Failed,
    Estimating,
    Direct,
    Chunked,
    ComputingMetadata,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::Failed => "failed",
            Self::Estimating => "estimating",
            Self::Direct => "direct",
            Self::Chunked => "chunked",
            Self::ComputingMetadata => "computing_metadata",
            Self::Done => "done",
        })
    }
}

fn merge_how(join_type: JoinType) -> MergeHow {
    match join_type {
        JoinType::Inner | JoinType::Cross => MergeHow::Inner,
        JoinType::Left => MergeHow::Left,
        JoinType::Right => MergeHow::Right,
    }
}

/// Join one pair of (possibly sliced) inputs, appending `_merge` on request.
/// `index`, when given, covers the unsliced side of a keyed join.
fn join_part(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
    index: Option<&KeyIndex>,
) -> Result<Dataset, JoinError> {
    if config.join_type() == JoinType::Cross {
        let data = cross_product(left, right, config.suffixes())?;
        if !config.indicator() {
            return Ok(data);
        }
        let tags = vec![Scalar::Utf8(Provenance::Both.as_str().to_owned()); data.len()];
        return Ok(data.with_column(INDICATOR_COLUMN, Column::from_values(tags)?)?);
    }

    let spec = MergeSpec {
        left_on: config.left_keys(),
        right_on: config.right_keys(),
        suffixes: config.suffixes(),
    };
    let output = merge_using(left, right, merge_how(config.join_type()), &spec, options, index)?;
    if !config.indicator() {
        return Ok(output.data);
    }
    let indicator = output.indicator_column()?;
    Ok(output.data.with_column(INDICATOR_COLUMN, indicator)?)
}

/// The whole join as one in-memory operation.
pub fn execute_direct(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
) -> Result<Dataset, JoinError> {
    let data = join_part(left, right, config, options, None)?;
    finish(data, config)
}

/// The join as a sequence of slice joins, concatenated.
///
/// Keyed joins fall back to direct execution when the smaller side is below
/// `keyed_min_reference_rows`; the returned strategy reports what actually ran.
pub fn execute_chunked(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
) -> Result<(Dataset, ExecutionStrategy), JoinError> {
    let data = match config.join_type() {
        JoinType::Cross => cross_chunks(left, right, config, options)?,
        JoinType::Inner | JoinType::Left | JoinType::Right => {
            let reference_rows = left.len().min(right.len());
            if reference_rows < options.keyed_min_reference_rows {
                debug!(
                    reference_rows,
                    min = options.keyed_min_reference_rows,
                    "reference side too small for keyed chunking; running direct"
                );
                return Ok((
                    execute_direct(left, right, config, options)?,
                    ExecutionStrategy::Direct,
                ));
            }
            keyed_chunks(left, right, config, options)?
        }
    };
    Ok((finish(data, config)?, ExecutionStrategy::Chunked))
}

fn cross_chunks(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
) -> Result<Dataset, JoinError> {
    let split = if left.len() <= right.len() {
        Side::Left
    } else {
        Side::Right
    };
    let split_rows = match split {
        Side::Left => left.len(),
        Side::Right => right.len(),
    };
    let slice_rows = options.cross_slice_rows(split_rows);
    run_slices(split, split_rows, slice_rows, |start| match split {
        Side::Left => join_part(&left.slice(start, slice_rows)?, right, config, options, None),
        Side::Right => join_part(left, &right.slice(start, slice_rows)?, config, options, None),
    })
    .unwrap_or_else(|| join_part(left, right, config, options, None))
}

fn keyed_chunks(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
) -> Result<Dataset, JoinError> {
    // Splitting the preserved side keeps each unmatched row in exactly one slice.
    let split = match config.join_type() {
        JoinType::Left => Side::Left,
        JoinType::Right => Side::Right,
        JoinType::Inner | JoinType::Cross => {
            if left.len() >= right.len() {
                Side::Left
            } else {
                Side::Right
            }
        }
    };
    let split_rows = match split {
        Side::Left => left.len(),
        Side::Right => right.len(),
    };
    let slice_rows = options.keyed_slice_rows(split_rows);
    // The unsplit side is indexed once; every slice probes the same index.
    let index = match split {
        Side::Left => KeyIndex::build(right, config.right_keys(), Side::Right)?,
        Side::Right => KeyIndex::build(left, config.left_keys(), Side::Left)?,
    };
    let data = run_slices(split, split_rows, slice_rows, |start| match split {
        Side::Left => {
            let slice = left.slice(start, slice_rows)?;
            join_part(&slice, right, config, options, Some(&index))
        }
        Side::Right => {
            let slice = right.slice(start, slice_rows)?;
            join_part(left, &slice, config, options, Some(&index))
        }
    })
    .unwrap_or_else(|| join_part(left, right, config, options, Some(&index)))?;

    if config.join_type() == JoinType::Inner {
        let before = data.len();
        let deduped = data.drop_duplicates()?;
        debug!(
            removed = before - deduped.len(),
            "de-duplicated chunked inner join"
        );
        return Ok(deduped);
    }
    Ok(data)
}

/// Runs `part` once per slice start and concatenates the pieces in order.
/// Returns `None` when the split side is empty.
fn run_slices<F>(
    split: Side,
    split_rows: usize,
    slice_rows: usize,
    mut part: F,
) -> Option<Result<Dataset, JoinError>>
where
    F: FnMut(usize) -> Result<Dataset, JoinError>,
{
    if split_rows == 0 {
        return None;
    }
    let total = split_rows.div_ceil(slice_rows);
    let mut pieces = Vec::with_capacity(total);
    for (chunk, start) in (0..split_rows).step_by(slice_rows).enumerate() {
        debug!(
            %split,
            chunk = chunk + 1,
            total,
            start,
            rows = slice_rows.min(split_rows - start),
            "joining chunk"
        );
        match part(start) {
            Ok(piece) => pieces.push(piece),
            Err(err) => return Some(Err(err)),
        }
    }
    let refs = pieces.iter().collect::<Vec<_>>();
    Some(Dataset::concat(&refs).map_err(JoinError::from))
}

/// Sort and projection, identical for direct and chunked results.
fn finish(data: Dataset, config: &JoinConfig) -> Result<Dataset, JoinError> {
    let data = if config.sort_results() {
        match sort_column(&data, config) {
            Some(name) => data.sort_by_column(&name, true)?,
            None => data,
        }
    } else {
        data
    };
    project(data, config.include_columns())
}

/// Output name of the first left key: unchanged, or suffixed when it
/// collided with a right-side column.
fn sort_column(data: &Dataset, config: &JoinConfig) -> Option<String> {
    let key = config.left_keys().first()?;
    if data.has_column(key) {
        return Some(key.clone());
    }
    let suffixed = format!("{key}{}", config.suffixes().0);
    data.has_column(&suffixed).then_some(suffixed)
}

/// Keeps the allow-listed columns in allow-list order. An allow-list that
/// names none of the result's columns keeps them all.
fn project(data: Dataset, include: &[String]) -> Result<Dataset, JoinError> {
    if include.is_empty() {
        return Ok(data);
    }
    let mut kept = Vec::with_capacity(include.len());
    for name in include {
        if data.has_column(name) && !kept.contains(name) {
            kept.push(name.clone());
        }
    }
    if kept.is_empty() {
        debug!(?include, "include_columns matched no result column; keeping all");
        return Ok(data);
    }
    Ok(data.select(&kept)?)
}
