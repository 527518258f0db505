#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};

use fj_columnar::{Column, ColumnError};
use fj_types::{DType, Scalar, ScalarKey, compare_scalars_na_last};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column '{column}' has length {actual}, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name: '{0}'")]
    DuplicateColumn(String),
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("cannot concatenate datasets with different columns: {0}")]
    SchemaMismatch(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Ordered, named-column table. Rows are addressed by position only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: BTreeMap<String, Column>,
    column_order: Vec<String>,
    len: usize,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl Dataset {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            columns: BTreeMap::new(),
            column_order: Vec::new(),
            len: 0,
        }
    }

    /// Build a dataset from `(name, column)` pairs; input order is column order.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let len = columns.first().map_or(0, |(_, column)| column.len());
        Self::with_row_count(len, columns)
    }

    /// Like [`Dataset::new`] but with an explicit row count, so zero-column
    /// datasets can still carry rows (e.g. a projection of nothing).
    pub fn with_row_count(len: usize, columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let mut map = BTreeMap::new();
        let mut order = Vec::with_capacity(columns.len());
        for (name, column) in columns {
            if column.len() != len {
                return Err(FrameError::LengthMismatch {
                    column: name,
                    expected: len,
                    actual: column.len(),
                });
            }
            if map.contains_key(&name) {
                return Err(FrameError::DuplicateColumn(name));
            }
            order.push(name.clone());
            map.insert(name, column);
        }
        Ok(Self {
            columns: map,
            column_order: order,
            len,
        })
    }

    /// Build a dataset from raw value vectors, inferring each column's dtype.
    pub fn from_dict(data: Vec<(&str, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let columns = data
            .into_iter()
            .map(|(name, values)| Ok((name.to_owned(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.column_order.len()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    #[must_use]
    pub fn dtype_of(&self, name: &str) -> Option<DType> {
        self.columns.get(name).map(Column::dtype)
    }

    /// Columns in observable order.
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &Column)> + '_ {
        self.column_order
            .iter()
            .filter_map(|name| self.columns.get(name).map(|column| (name.as_str(), column)))
    }

    /// Values of one row in column order; `None` past the end.
    #[must_use]
    pub fn row_values(&self, row: usize) -> Option<Vec<Scalar>> {
        if row >= self.len {
            return None;
        }
        Some(
            self.iter_columns()
                .filter_map(|(_, column)| column.value(row).cloned())
                .collect(),
        )
    }

    fn map_columns<F>(&self, len: usize, mut f: F) -> Result<Self, FrameError>
    where
        F: FnMut(&Column) -> Result<Column, ColumnError>,
    {
        let columns = self
            .iter_columns()
            .map(|(name, column)| Ok((name.to_owned(), f(column)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::with_row_count(len, columns)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        self.map_columns(positions.len(), |column| column.take(positions))
    }

    /// Gather rows by optional position; `None` yields an all-missing row.
    pub fn reindex_rows(&self, positions: &[Option<usize>]) -> Result<Self, FrameError> {
        self.map_columns(positions.len(), |column| {
            column.reindex_by_positions(positions)
        })
    }

    pub fn slice(&self, start: usize, len: usize) -> Result<Self, FrameError> {
        let start = start.min(self.len);
        let out_len = len.min(self.len - start);
        self.map_columns(out_len, |column| column.slice(start, len))
    }

    pub fn head(&self, n: usize) -> Result<Self, FrameError> {
        if n >= self.len {
            return Ok(self.clone());
        }
        self.slice(0, n)
    }

    /// Vertical concatenation. Every part must carry the same column names;
    /// the first part fixes column order and dtypes widen per column.
    pub fn concat(parts: &[&Self]) -> Result<Self, FrameError> {
        let Some(first) = parts.first() else {
            return Ok(Self::empty());
        };
        let expected: BTreeSet<&String> = first.column_order.iter().collect();
        for part in &parts[1..] {
            let actual: BTreeSet<&String> = part.column_order.iter().collect();
            if actual != expected {
                let mut diff = expected
                    .symmetric_difference(&actual)
                    .map(|name| name.as_str())
                    .collect::<Vec<_>>();
                diff.sort_unstable();
                return Err(FrameError::SchemaMismatch(diff.join(", ")));
            }
        }

        let len = parts.iter().map(|part| part.len).sum();
        let mut columns = Vec::with_capacity(first.num_columns());
        for name in &first.column_order {
            let pieces = parts
                .iter()
                .map(|part| {
                    part.columns
                        .get(name)
                        .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            columns.push((name.clone(), Column::concat(&pieces)?));
        }
        Self::with_row_count(len, columns)
    }

    /// Project to `names`, in selector order. Missing names fail closed.
    pub fn select(&self, names: &[String]) -> Result<Self, FrameError> {
        let mut seen = HashSet::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let column = self
                .columns
                .get(name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.clone()))?;
            if !seen.insert(name) {
                return Err(FrameError::DuplicateColumn(name.clone()));
            }
            columns.push((name.clone(), column.clone()));
        }
        Self::with_row_count(self.len, columns)
    }

    /// Append a column at the end of the column order.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column: Column,
    ) -> Result<Self, FrameError> {
        let name = name.into();
        if column.len() != self.len {
            return Err(FrameError::LengthMismatch {
                column: name,
                expected: self.len,
                actual: column.len(),
            });
        }
        if self.columns.contains_key(&name) {
            return Err(FrameError::DuplicateColumn(name));
        }
        self.column_order.push(name.clone());
        self.columns.insert(name, column);
        Ok(self)
    }

    /// Stable sort by one column; missing values sort last.
    pub fn sort_by_column(&self, name: &str, ascending: bool) -> Result<Self, FrameError> {
        let sort_column = self
            .columns
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
        let values = sort_column.values();

        let mut order = (0..self.len).collect::<Vec<_>>();
        order.sort_by(|&left, &right| {
            compare_scalars_na_last(&values[left], &values[right], ascending)
        });

        self.take(&order)
    }

    fn row_key(&self, row: usize) -> Vec<ScalarKey> {
        self.iter_columns()
            .map(|(_, column)| {
                column
                    .value(row)
                    .map_or(ScalarKey::Missing, ScalarKey::from)
            })
            .collect()
    }

    /// Drop rows equal on every column to an earlier row; keeps first occurrences.
    pub fn drop_duplicates(&self) -> Result<Self, FrameError> {
        let mut seen = HashSet::with_capacity(self.len);
        let keep = (0..self.len)
            .filter(|&row| seen.insert(self.row_key(row)))
            .collect::<Vec<_>>();
        if keep.len() == self.len {
            return Ok(self.clone());
        }
        self.take(&keep)
    }

    /// Number of rows equal on every column to an earlier row.
    #[must_use]
    pub fn duplicate_row_count(&self) -> usize {
        let mut seen = HashSet::with_capacity(self.len);
        (0..self.len)
            .filter(|&row| !seen.insert(self.row_key(row)))
            .count()
    }

    /// Deep footprint of all column data, including string payloads.
    #[must_use]
    pub fn memory_usage_bytes(&self) -> usize {
        self.columns.values().map(Column::footprint_bytes).sum()
    }

    #[must_use]
    pub fn memory_usage_mb(&self) -> f64 {
        self.memory_usage_bytes() as f64 / 1_048_576.0
    }
}

#[cfg(test)]
mod tests {
    use fj_columnar::Column;
    use fj_types::{DType, NullKind, Scalar};

    use super::{Dataset, FrameError};

    fn people() -> Dataset {
        Dataset::from_dict(vec![
            ("id", vec![Scalar::Int64(3), Scalar::Int64(1), Scalar::Int64(2)]),
            (
                "name",
                vec!["c".into(), "a".into(), Scalar::Null(NullKind::Null)],
            ),
        ])
        .expect("frame")
    }

    #[test]
    fn new_rejects_ragged_columns() {
        let err = Dataset::from_dict(vec![
            ("a", vec![Scalar::Int64(1), Scalar::Int64(2)]),
            ("b", vec![Scalar::Int64(1)]),
        ])
        .expect_err("must fail");
        assert!(matches!(err, FrameError::LengthMismatch { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn new_rejects_duplicate_names() {
        let column = Column::from_values(vec![Scalar::Int64(1)]).expect("col");
        let err = Dataset::new(vec![("a".into(), column.clone()), ("a".into(), column)])
            .expect_err("must fail");
        assert!(matches!(err, FrameError::DuplicateColumn(name) if name == "a"));
    }

    #[test]
    fn column_order_follows_input_order() {
        let frame = Dataset::from_dict(vec![
            ("zeta", vec![Scalar::Int64(1)]),
            ("alpha", vec![Scalar::Int64(2)]),
        ])
        .expect("frame");
        assert_eq!(frame.column_names(), &["zeta".to_owned(), "alpha".to_owned()]);
        assert_eq!(
            frame.row_values(0).expect("row"),
            vec![Scalar::Int64(1), Scalar::Int64(2)]
        );
        assert!(frame.row_values(1).is_none());
    }

    #[test]
    fn sort_is_stable_and_puts_missing_last() {
        let frame = Dataset::from_dict(vec![
            (
                "k",
                vec![
                    Scalar::Int64(2),
                    Scalar::Null(NullKind::Null),
                    Scalar::Int64(1),
                    Scalar::Int64(2),
                ],
            ),
            (
                "tag",
                vec!["first".into(), "null".into(), "one".into(), "second".into()],
            ),
        ])
        .expect("frame");
        let sorted = frame.sort_by_column("k", true).expect("sort");
        let tags = sorted.column("tag").expect("tag").values().to_vec();
        assert_eq!(
            tags,
            vec![
                Scalar::from("one"),
                Scalar::from("first"),
                Scalar::from("second"),
                Scalar::from("null")
            ]
        );
    }

    #[test]
    fn head_and_slice_clamp() {
        let frame = people();
        assert_eq!(frame.head(2).expect("head").len(), 2);
        assert_eq!(frame.head(10).expect("head").len(), 3);
        let tail = frame.slice(2, 5).expect("slice");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.column("id").expect("id").values(), &[Scalar::Int64(2)]);
        assert_eq!(frame.slice(9, 1).expect("past end").len(), 0);
    }

    #[test]
    fn concat_widens_dtypes_and_checks_schema() {
        let ints = Dataset::from_dict(vec![("v", vec![Scalar::Int64(1)])]).expect("ints");
        let floats = Dataset::from_dict(vec![("v", vec![Scalar::Float64(1.5)])]).expect("floats");
        let out = Dataset::concat(&[&ints, &floats]).expect("concat");
        assert_eq!(out.len(), 2);
        assert_eq!(out.dtype_of("v"), Some(DType::Float64));

        let other = Dataset::from_dict(vec![("w", vec![Scalar::Int64(1)])]).expect("other");
        let err = Dataset::concat(&[&ints, &other]).expect_err("schema mismatch");
        assert!(matches!(err, FrameError::SchemaMismatch(diff) if diff == "v, w"));
    }

    #[test]
    fn select_follows_selector_order_and_fails_closed() {
        let frame = people();
        let out = frame
            .select(&["name".to_owned(), "id".to_owned()])
            .expect("select");
        assert_eq!(out.column_names(), &["name".to_owned(), "id".to_owned()]);
        assert!(matches!(
            frame.select(&["nope".to_owned()]),
            Err(FrameError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn drop_duplicates_keeps_first_and_treats_missing_as_equal() {
        let frame = Dataset::from_dict(vec![
            (
                "a",
                vec![
                    Scalar::Int64(1),
                    Scalar::Int64(1),
                    Scalar::Int64(2),
                    Scalar::Int64(1),
                ],
            ),
            (
                "b",
                vec![
                    Scalar::Float64(f64::NAN),
                    Scalar::Null(NullKind::NaN),
                    Scalar::Float64(1.0),
                    Scalar::Float64(2.0),
                ],
            ),
        ])
        .expect("frame");
        assert_eq!(frame.duplicate_row_count(), 1);
        let out = frame.drop_duplicates().expect("dedupe");
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.column("a").expect("a").values(),
            &[Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(1)]
        );
    }

    #[test]
    fn with_column_appends_and_validates() {
        let frame = people();
        let flag = Column::from_values(vec![Scalar::Bool(true); 3]).expect("flag");
        let out = frame.clone().with_column("flag", flag).expect("append");
        assert_eq!(out.column_names().last().map(String::as_str), Some("flag"));

        let short = Column::from_values(vec![Scalar::Bool(true)]).expect("short");
        assert!(frame.with_column("flag", short).is_err());
    }

    #[test]
    fn memory_usage_grows_with_rows() {
        let small = people().head(1).expect("head");
        let full = people();
        assert!(full.memory_usage_bytes() > small.memory_usage_bytes());
        assert_eq!(Dataset::empty().memory_usage_bytes(), 0);
    }

    #[test]
    fn reindex_rows_fills_missing_rows() {
        let out = people().reindex_rows(&[Some(2), None]).expect("reindex");
        assert_eq!(out.len(), 2);
        assert_eq!(
            out.column("id").expect("id").values(),
            &[Scalar::Int64(2), Scalar::Null(NullKind::Null)]
        );
    }
}
