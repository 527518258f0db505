use std::collections::{BTreeSet, HashSet};

use fj_frame::Dataset;
use fj_types::common_dtype;

use crate::merge::row_key;
use crate::model::{JoinConfig, JoinType, Side, ValidationResult};
use crate::options::ExecutionOptions;

const SUGGESTION_SIMILARITY: f64 = 0.8;

/// Check `config` against both schemas.
///
/// Errors invalidate the result; warnings and suggestions never do. A join
/// type outside the supported set cannot reach here: it is rejected when the
/// `JoinType` is parsed.
#[must_use]
pub fn validate_join(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    options: &ExecutionOptions,
) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.join_type() == JoinType::Cross {
        if !config.left_keys().is_empty() || !config.right_keys().is_empty() {
            result.add_warning(
                "Cross join ignores join keys; the configured keys will not be used",
            );
        }
        let rows = left.len().saturating_mul(right.len());
        if rows >= options.cross_chunk_row_threshold {
            result.add_warning(format!(
                "Cross join will produce {rows} rows and will run in chunks"
            ));
        }
        check_overlap(left, right, config, &mut result);
        return result;
    }

    let (left_keys, right_keys) = (config.left_keys(), config.right_keys());
    if left_keys.is_empty() {
        result.add_error("Left join keys cannot be empty");
    }
    if right_keys.is_empty() {
        result.add_error("Right join keys cannot be empty");
    }
    if left_keys.len() != right_keys.len() {
        result.add_error(format!(
            "Number of left keys ({}) must match number of right keys ({})",
            left_keys.len(),
            right_keys.len()
        ));
    }

    let left_found = check_keys_exist(left, left_keys, Side::Left, &mut result);
    let right_found = check_keys_exist(right, right_keys, Side::Right, &mut result);

    if config.validate_integrity() && left_found && right_found {
        check_key_dtypes(left, right, config, &mut result);
        if left_keys.len() == right_keys.len()
            && !left_keys.is_empty()
            && has_duplicate_keys(left, left_keys)
            && has_duplicate_keys(right, right_keys)
        {
            result.add_warning(
                "Both datasets contain duplicate key values; this many-to-many join may multiply rows",
            );
        }
    }

    check_overlap(left, right, config, &mut result);
    result
}

/// Adds one error naming every missing key, plus a suggestion per key that
/// closely resembles an existing column. Returns whether all keys exist.
fn check_keys_exist(
    frame: &Dataset,
    keys: &[String],
    side: Side,
    result: &mut ValidationResult,
) -> bool {
    let missing = keys
        .iter()
        .filter(|key| !frame.has_column(key))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return true;
    }

    let label = match side {
        Side::Left => "Left",
        Side::Right => "Right",
    };
    let names = missing
        .iter()
        .map(|key| key.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    result.add_error(format!("{label} key columns not found: {names}"));

    for key in missing {
        if let Some(candidate) = closest_column(frame, key) {
            result.add_suggestion(format!(
                "Did you mean '{candidate}' instead of '{key}' in the {side} dataset?"
            ));
        }
    }
    false
}

fn closest_column<'a>(frame: &'a Dataset, wanted: &str) -> Option<&'a str> {
    frame
        .column_names()
        .iter()
        .map(|name| (name.as_str(), strsim::jaro_winkler(wanted, name)))
        .filter(|(_, score)| *score >= SUGGESTION_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
}

fn check_key_dtypes(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    result: &mut ValidationResult,
) {
    for (left_key, right_key) in config.key_pairs() {
        let (Some(left_dtype), Some(right_dtype)) =
            (left.dtype_of(left_key), right.dtype_of(right_key))
        else {
            continue;
        };
        if left_dtype == right_dtype {
            continue;
        }
        let compatible = common_dtype(left_dtype, right_dtype).is_ok();
        result.add_warning(format!(
            "Key columns '{left_key}' ({left_dtype}) and '{right_key}' ({right_dtype}) have different data types{}",
            if compatible { "" } else { " and cannot be compared" }
        ));
    }
}

fn has_duplicate_keys(frame: &Dataset, keys: &[String]) -> bool {
    let columns = keys
        .iter()
        .filter_map(|key| frame.column(key))
        .collect::<Vec<_>>();
    let mut seen = HashSet::with_capacity(frame.len());
    (0..frame.len()).any(|row| !seen.insert(row_key(&columns, row)))
}

/// Overlapping names other than same-named key pairs get suffixed downstream.
fn check_overlap(
    left: &Dataset,
    right: &Dataset,
    config: &JoinConfig,
    result: &mut ValidationResult,
) {
    let shared_keys = config
        .key_pairs()
        .filter(|(l, r)| l == r && config.join_type().is_keyed())
        .map(|(l, _)| l)
        .collect::<BTreeSet<_>>();
    let overlap = left
        .column_names()
        .iter()
        .filter(|name| right.has_column(name) && !shared_keys.contains(name.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    if overlap.is_empty() {
        return;
    }

    let (left_suffix, right_suffix) = config.suffixes();
    result.add_warning(format!(
        "Overlapping non-key columns: {}",
        overlap.join(", ")
    ));
    result.add_suggestion(format!(
        "Set custom suffixes to tell overlapping columns apart (currently '{left_suffix}' and '{right_suffix}')"
    ));
}
