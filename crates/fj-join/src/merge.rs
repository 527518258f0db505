//! Equality-merge and cartesian-product primitives.
//!
//! A merge runs in two phases. Pairing walks the probe side against a hash
//! index of the build side and emits `(left_pos, right_pos, provenance)`
//! triples; materialization gathers every output column by position once.

use std::collections::{BTreeSet, HashMap};
use std::mem::size_of;

use bumpalo::{Bump, collections::Vec as BumpVec};
use fj_columnar::{Column, ColumnError};
use fj_frame::Dataset;
use fj_types::{Scalar, ScalarKey, common_dtype};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{JoinError, Side};
use crate::options::ExecutionOptions;

pub const INDICATOR_COLUMN: &str = "_merge";

/// Which side(s) of the merge produced an output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Both,
    LeftOnly,
    RightOnly,
}

impl Provenance {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::LeftOnly => "left_only",
            Self::RightOnly => "right_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeHow {
    Inner,
    Left,
    Right,
    Outer,
}

/// Key column names for both sides plus the suffix pair for overlaps.
#[derive(Debug, Clone, Copy)]
pub struct MergeSpec<'a> {
    pub left_on: &'a [String],
    pub right_on: &'a [String],
    pub suffixes: (&'a str, &'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    pub data: Dataset,
    pub provenance: Vec<Provenance>,
}

impl MergeOutput {
    /// The provenance tags as a `_merge`-style Utf8 column.
    pub fn indicator_column(&self) -> Result<Column, JoinError> {
        let values = self
            .provenance
            .iter()
            .map(|tag| Scalar::Utf8(tag.as_str().to_owned()))
            .collect();
        Ok(Column::from_values(values)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MergeTrace {
    pub used_arena: bool,
    pub reused_index: bool,
    pub output_rows: usize,
    pub estimated_bytes: usize,
}

/// Counts of each provenance category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvenanceCounts {
    pub both: usize,
    pub left_only: usize,
    pub right_only: usize,
}

impl ProvenanceCounts {
    #[must_use]
    pub fn tally(tags: &[Provenance]) -> Self {
        let mut counts = Self::default();
        for tag in tags {
            match tag {
                Provenance::Both => counts.both += 1,
                Provenance::LeftOnly => counts.left_only += 1,
                Provenance::RightOnly => counts.right_only += 1,
            }
        }
        counts
    }
}

fn key_columns<'a>(
    frame: &'a Dataset,
    names: &[String],
    side: Side,
) -> Result<Vec<&'a Column>, JoinError> {
    names
        .iter()
        .map(|name| {
            frame.column(name).ok_or_else(|| JoinError::MissingKeyColumn {
                side,
                column: name.clone(),
            })
        })
        .collect()
}

fn check_key_dtypes(
    spec: &MergeSpec<'_>,
    left_keys: &[&Column],
    right_keys: &[&Column],
) -> Result<(), JoinError> {
    for (idx, (left, right)) in left_keys.iter().zip(right_keys).enumerate() {
        if common_dtype(left.dtype(), right.dtype()).is_err() {
            return Err(JoinError::IncompatibleKeyTypes {
                left: spec.left_on[idx].clone(),
                right: spec.right_on[idx].clone(),
                left_dtype: left.dtype(),
                right_dtype: right.dtype(),
            });
        }
    }
    Ok(())
}

pub(crate) fn row_key(columns: &[&Column], row: usize) -> Vec<ScalarKey> {
    columns
        .iter()
        .map(|column| column.value(row).map_or(ScalarKey::Missing, ScalarKey::from))
        .collect()
}

fn build_key_index(columns: &[&Column], len: usize) -> HashMap<Vec<ScalarKey>, Vec<usize>> {
    let mut index = HashMap::<Vec<ScalarKey>, Vec<usize>>::with_capacity(len);
    for pos in 0..len {
        index.entry(row_key(columns, pos)).or_default().push(pos);
    }
    index
}

/// Hash index over one whole side's key tuples. Chunked joins build it once
/// for the unsplit side and merge every slice of the other side against it.
#[derive(Debug)]
pub(crate) struct KeyIndex {
    side: Side,
    rows: usize,
    map: HashMap<Vec<ScalarKey>, Vec<usize>>,
}

impl KeyIndex {
    pub(crate) fn build(frame: &Dataset, keys: &[String], side: Side) -> Result<Self, JoinError> {
        let columns = key_columns(frame, keys, side)?;
        Ok(Self {
            side,
            rows: frame.len(),
            map: build_key_index(&columns, frame.len()),
        })
    }
}

/// Build-side matches for every probe row, in probe order.
fn probe_matches<'m>(
    index: &'m HashMap<Vec<ScalarKey>, Vec<usize>>,
    probe_columns: &[&Column],
    probe_len: usize,
) -> Vec<Option<&'m [usize]>> {
    (0..probe_len)
        .map(|pos| {
            index
                .get(&row_key(probe_columns, pos))
                .map(Vec::as_slice)
        })
        .collect()
}

/// The side held in the hash index. RIGHT builds on the left and LEFT/OUTER
/// on the right; INNER builds on whichever side a prebuilt index covers.
fn build_side(how: MergeHow, prebuilt: Option<&KeyIndex>) -> Side {
    match (how, prebuilt) {
        (MergeHow::Right, _) => Side::Left,
        (MergeHow::Inner, Some(index)) => index.side,
        _ => Side::Right,
    }
}

fn estimate_output_rows(how: MergeHow, matches: &[Option<&[usize]>]) -> usize {
    matches
        .iter()
        .map(|slot| match slot {
            Some(found) => found.len(),
            None if matches!(how, MergeHow::Inner) => 0,
            None => 1,
        })
        .sum()
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(
        size_of::<Option<usize>>()
            .saturating_mul(2)
            .saturating_add(size_of::<Provenance>()),
    )
}

fn pair_rows<F>(
    how: MergeHow,
    probe_left: bool,
    matches: &[Option<&[usize]>],
    build_len: usize,
    mut emit: F,
) where
    F: FnMut(Option<usize>, Option<usize>, Provenance),
{
    let mut build_matched = if matches!(how, MergeHow::Outer) {
        vec![false; build_len]
    } else {
        Vec::new()
    };

    for (probe_pos, slot) in matches.iter().enumerate() {
        match slot {
            Some(found) => {
                for &build_pos in *found {
                    if let Some(flag) = build_matched.get_mut(build_pos) {
                        *flag = true;
                    }
                    if probe_left {
                        emit(Some(probe_pos), Some(build_pos), Provenance::Both);
                    } else {
                        emit(Some(build_pos), Some(probe_pos), Provenance::Both);
                    }
                }
            }
            None => match how {
                MergeHow::Inner => {}
                MergeHow::Left | MergeHow::Outer => {
                    emit(Some(probe_pos), None, Provenance::LeftOnly);
                }
                MergeHow::Right => emit(None, Some(probe_pos), Provenance::RightOnly),
            },
        }
    }

    for (build_pos, matched) in build_matched.iter().enumerate() {
        if !matched {
            emit(None, Some(build_pos), Provenance::RightOnly);
        }
    }
}

/// Equality merge of `left` and `right` on the key pairs in `spec`.
///
/// Missing keys match each other. Row order follows the probe side: left for
/// INNER/LEFT/OUTER, right for RIGHT; OUTER appends unmatched right rows.
pub fn merge(
    left: &Dataset,
    right: &Dataset,
    how: MergeHow,
    spec: &MergeSpec<'_>,
    options: &ExecutionOptions,
) -> Result<MergeOutput, JoinError> {
    merge_using(left, right, how, spec, options, None)
}

/// [`merge`] that probes against `prebuilt` when it indexes the build side.
pub(crate) fn merge_using(
    left: &Dataset,
    right: &Dataset,
    how: MergeHow,
    spec: &MergeSpec<'_>,
    options: &ExecutionOptions,
    prebuilt: Option<&KeyIndex>,
) -> Result<MergeOutput, JoinError> {
    let (output, trace) = merge_with_trace(left, right, how, spec, options, prebuilt)?;
    debug!(
        ?how,
        output_rows = trace.output_rows,
        used_arena = trace.used_arena,
        reused_index = trace.reused_index,
        estimated_bytes = trace.estimated_bytes,
        "merged"
    );
    Ok(output)
}

pub(crate) fn merge_with_trace(
    left: &Dataset,
    right: &Dataset,
    how: MergeHow,
    spec: &MergeSpec<'_>,
    options: &ExecutionOptions,
    prebuilt: Option<&KeyIndex>,
) -> Result<(MergeOutput, MergeTrace), JoinError> {
    let left_keys = key_columns(left, spec.left_on, Side::Left)?;
    let right_keys = key_columns(right, spec.right_on, Side::Right)?;
    if left_keys.len() != right_keys.len() {
        return Err(JoinError::InvalidConfig(format!(
            "key count mismatch: {} left vs {} right",
            left_keys.len(),
            right_keys.len()
        )));
    }
    check_key_dtypes(spec, &left_keys, &right_keys)?;

    let build = build_side(how, prebuilt);
    let probe_left = build == Side::Right;
    let (build_columns, build_len, probe_columns, probe_len) = if probe_left {
        (&right_keys, right.len(), &left_keys, left.len())
    } else {
        (&left_keys, left.len(), &right_keys, right.len())
    };
    let reusable = prebuilt.filter(|index| index.side == build && index.rows == build_len);
    let fresh;
    let index = match reusable {
        Some(index) => &index.map,
        None => {
            fresh = build_key_index(build_columns, build_len);
            &fresh
        }
    };
    let matches = probe_matches(index, probe_columns, probe_len);

    let output_rows = estimate_output_rows(how, &matches);
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    let output = if use_arena {
        let arena = Bump::new();
        let mut left_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        let mut right_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        let mut provenance = Vec::with_capacity(output_rows);
        pair_rows(how, probe_left, &matches, build_len, |l, r, tag| {
            left_positions.push(l);
            right_positions.push(r);
            provenance.push(tag);
        });
        let data = materialize(
            left,
            right,
            spec,
            left_positions.as_slice(),
            right_positions.as_slice(),
        )?;
        MergeOutput { data, provenance }
    } else {
        let mut left_positions = Vec::<Option<usize>>::with_capacity(output_rows);
        let mut right_positions = Vec::<Option<usize>>::with_capacity(output_rows);
        let mut provenance = Vec::with_capacity(output_rows);
        pair_rows(how, probe_left, &matches, build_len, |l, r, tag| {
            left_positions.push(l);
            right_positions.push(r);
            provenance.push(tag);
        });
        let data = materialize(left, right, spec, &left_positions, &right_positions)?;
        MergeOutput { data, provenance }
    };

    Ok((
        output,
        MergeTrace {
            used_arena: use_arena,
            reused_index: reusable.is_some(),
            output_rows,
            estimated_bytes,
        },
    ))
}

/// Provenance of a full outer merge without materializing any column.
pub fn outer_provenance(
    left: &Dataset,
    right: &Dataset,
    left_on: &[String],
    right_on: &[String],
) -> Result<Vec<Provenance>, JoinError> {
    let left_keys = key_columns(left, left_on, Side::Left)?;
    let right_keys = key_columns(right, right_on, Side::Right)?;
    let index = build_key_index(&right_keys, right.len());
    let matches = probe_matches(&index, &left_keys, left.len());

    let mut tags = Vec::with_capacity(estimate_output_rows(MergeHow::Outer, &matches));
    pair_rows(MergeHow::Outer, true, &matches, right.len(), |_, _, tag| {
        tags.push(tag);
    });
    Ok(tags)
}

/// Cartesian product in left-major order.
pub fn cross_product(
    left: &Dataset,
    right: &Dataset,
    suffixes: (&str, &str),
) -> Result<Dataset, JoinError> {
    let rows = left.len().saturating_mul(right.len());
    let mut left_positions = Vec::with_capacity(rows);
    let mut right_positions = Vec::with_capacity(rows);
    for l in 0..left.len() {
        for r in 0..right.len() {
            left_positions.push(Some(l));
            right_positions.push(Some(r));
        }
    }
    let spec = MergeSpec {
        left_on: &[],
        right_on: &[],
        suffixes,
    };
    materialize(left, right, &spec, &left_positions, &right_positions)
}

/// Output name for each input column: same-named key pairs collapse into one
/// column, every other overlapping name takes its side's suffix.
fn output_columns(
    left: &Dataset,
    right: &Dataset,
    spec: &MergeSpec<'_>,
) -> (Vec<(String, String)>, Vec<(String, String)>, BTreeSet<String>) {
    let shared_keys = spec
        .left_on
        .iter()
        .zip(spec.right_on)
        .filter(|(l, r)| l == r)
        .map(|(l, _)| l.clone())
        .collect::<BTreeSet<_>>();

    let left_out = left
        .column_names()
        .iter()
        .map(|name| {
            let out = if !shared_keys.contains(name) && right.has_column(name) {
                format!("{name}{}", spec.suffixes.0)
            } else {
                name.clone()
            };
            (name.clone(), out)
        })
        .collect();

    let right_out = right
        .column_names()
        .iter()
        .filter(|name| !shared_keys.contains(*name))
        .map(|name| {
            let out = if left.has_column(name) {
                format!("{name}{}", spec.suffixes.1)
            } else {
                name.clone()
            };
            (name.clone(), out)
        })
        .collect();

    (left_out, right_out, shared_keys)
}

fn coalesce_key_column(
    left: &Column,
    right: &Column,
    left_positions: &[Option<usize>],
    right_positions: &[Option<usize>],
) -> Result<Column, JoinError> {
    let dtype = common_dtype(left.dtype(), right.dtype()).map_err(ColumnError::from)?;
    let values = left_positions
        .iter()
        .zip(right_positions)
        .map(|(l, r)| {
            let picked = match (l, r) {
                (Some(pos), _) => left.value(*pos),
                (None, Some(pos)) => right.value(*pos),
                (None, None) => None,
            };
            picked
                .cloned()
                .unwrap_or_else(|| Scalar::missing_for_dtype(dtype))
        })
        .collect();
    Ok(Column::new(dtype, values)?)
}

fn materialize(
    left: &Dataset,
    right: &Dataset,
    spec: &MergeSpec<'_>,
    left_positions: &[Option<usize>],
    right_positions: &[Option<usize>],
) -> Result<Dataset, JoinError> {
    let (left_out, right_out, shared_keys) = output_columns(left, right, spec);
    let mut columns = Vec::with_capacity(left_out.len() + right_out.len());

    for (name, out) in left_out {
        let Some(left_column) = left.column(&name) else {
            continue;
        };
        let column = match (shared_keys.contains(&name), right.column(&name)) {
            (true, Some(right_column)) => {
                coalesce_key_column(left_column, right_column, left_positions, right_positions)?
            }
            _ => left_column.reindex_by_positions(left_positions)?,
        };
        columns.push((out, column));
    }
    for (name, out) in right_out {
        if let Some(right_column) = right.column(&name) {
            columns.push((out, right_column.reindex_by_positions(right_positions)?));
        }
    }

    Ok(Dataset::with_row_count(left_positions.len(), columns)?)
}
