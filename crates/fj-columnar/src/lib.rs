#![forbid(unsafe_code)]

//! Typed value columns. Every value in a column either has the column's
//! dtype or is that dtype's missing marker.

use fj_types::{DType, Scalar, TypeError, cast_scalar, common_dtype, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("rows {start}..{end} are out of range for a column of {len} rows")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Build a column of `dtype`, casting values that carry another dtype.
    /// Missing values are normalized to the dtype's missing marker.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let values = values
            .into_iter()
            .map(|value| {
                if value.dtype() == dtype && !matches!(value, Scalar::Null(_)) {
                    Ok(value)
                } else {
                    cast_scalar(value, dtype)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dtype, values })
    }

    /// Build a column whose dtype is the common dtype of `values`.
    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, row: usize) -> Option<&Scalar> {
        self.values.get(row)
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|value| value.is_missing()).count()
    }

    /// Gather rows by position. `None` yields the missing marker, which is how
    /// unmatched join rows get their empty cells.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let missing = Scalar::missing_for_dtype(self.dtype);
        let mut values = Vec::with_capacity(positions.len());
        for slot in positions {
            let value = match slot {
                Some(row) => self.values.get(*row).ok_or(ColumnError::OutOfBounds {
                    start: *row,
                    end: row + 1,
                    len: self.len(),
                })?,
                None => &missing,
            };
            values.push(value.clone());
        }
        Ok(Self {
            dtype: self.dtype,
            values,
        })
    }

    /// Gather rows by position; every position must be in range.
    pub fn take(&self, rows: &[usize]) -> Result<Self, ColumnError> {
        let positions = rows.iter().copied().map(Some).collect::<Vec<_>>();
        self.reindex_by_positions(&positions)
    }

    /// Up to `len` rows starting at `start`. Fails only when `start` lies
    /// past the end.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self, ColumnError> {
        let Some(tail) = self.values.get(start..) else {
            return Err(ColumnError::OutOfBounds {
                start,
                end: start.saturating_add(len),
                len: self.len(),
            });
        };
        Ok(Self {
            dtype: self.dtype,
            values: tail.iter().take(len).cloned().collect(),
        })
    }

    /// Stack columns vertically under the common dtype of every part.
    pub fn concat(parts: &[&Self]) -> Result<Self, ColumnError> {
        let dtype = parts
            .iter()
            .try_fold(DType::Null, |acc, part| common_dtype(acc, part.dtype))?;
        let values = parts
            .iter()
            .flat_map(|part| part.values.iter().cloned())
            .collect();
        Self::new(dtype, values)
    }

    /// Deep size of the stored values in bytes.
    #[must_use]
    pub fn footprint_bytes(&self) -> usize {
        self.values.iter().map(Scalar::footprint_bytes).sum()
    }
}
