use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fj_columnar::ColumnError;
use fj_frame::{Dataset, FrameError};
use fj_types::DType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SUFFIXES: (&str, &str) = ("_x", "_y");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
            Self::Cross => "cross",
        }
    }

    /// INNER, LEFT and RIGHT match rows by key equality; CROSS does not.
    #[must_use]
    pub fn is_keyed(self) -> bool {
        !matches!(self, Self::Cross)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinType {
    type Err = JoinError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "cross" => Ok(Self::Cross),
            _ => Err(JoinError::UnsupportedJoinType(raw.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("unsupported join type '{0}' (expected inner, left, right or cross)")]
    UnsupportedJoinType(String),
    #[error("{0}")]
    InvalidConfig(String),
    #[error("key column '{column}' not found in {side} dataset")]
    MissingKeyColumn { side: Side, column: String },
    #[error(
        "cannot join on '{left}' ({left_dtype}) and '{right}' ({right_dtype}): incompatible key dtypes"
    )]
    IncompatibleKeyTypes {
        left: String,
        right: String,
        left_dtype: DType,
        right_dtype: DType,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Everything needed to describe one join. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    join_type: JoinType,
    left_keys: Vec<String>,
    right_keys: Vec<String>,
    suffixes: (String, String),
    validate_integrity: bool,
    sort_results: bool,
    indicator: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    include_columns: Vec<String>,
}

impl JoinConfig {
    pub fn new<L, R>(join_type: JoinType, left_keys: L, right_keys: R) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            join_type,
            left_keys: left_keys.into_iter().map(Into::into).collect(),
            right_keys: right_keys.into_iter().map(Into::into).collect(),
            suffixes: (DEFAULT_SUFFIXES.0.to_owned(), DEFAULT_SUFFIXES.1.to_owned()),
            validate_integrity: true,
            sort_results: false,
            indicator: false,
            include_columns: Vec::new(),
        }
    }

    /// Keyed join on columns that share a name on both sides.
    pub fn on<K>(join_type: JoinType, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        Self::new(join_type, keys.clone(), keys)
    }

    #[must_use]
    pub fn cross() -> Self {
        Self::new(JoinType::Cross, Vec::<String>::new(), Vec::<String>::new())
    }

    #[must_use]
    pub fn with_suffixes(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.suffixes = (left.into(), right.into());
        self
    }

    #[must_use]
    pub fn with_validate_integrity(mut self, enabled: bool) -> Self {
        self.validate_integrity = enabled;
        self
    }

    #[must_use]
    pub fn with_sort_results(mut self, enabled: bool) -> Self {
        self.sort_results = enabled;
        self
    }

    #[must_use]
    pub fn with_indicator(mut self, enabled: bool) -> Self {
        self.indicator = enabled;
        self
    }

    #[must_use]
    pub fn with_include_columns<C>(mut self, columns: C) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.include_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    #[must_use]
    pub fn left_keys(&self) -> &[String] {
        &self.left_keys
    }

    #[must_use]
    pub fn right_keys(&self) -> &[String] {
        &self.right_keys
    }

    #[must_use]
    pub fn suffixes(&self) -> (&str, &str) {
        (&self.suffixes.0, &self.suffixes.1)
    }

    #[must_use]
    pub fn validate_integrity(&self) -> bool {
        self.validate_integrity
    }

    #[must_use]
    pub fn sort_results(&self) -> bool {
        self.sort_results
    }

    #[must_use]
    pub fn indicator(&self) -> bool {
        self.indicator
    }

    #[must_use]
    pub fn include_columns(&self) -> &[String] {
        &self.include_columns
    }

    /// Ordered `(left, right)` key pairs.
    pub fn key_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.left_keys
            .iter()
            .zip(&self.right_keys)
            .map(|(left, right)| (left.as_str(), right.as_str()))
    }
}

/// Outcome of checking a [`JoinConfig`] against both schemas.
///
/// Only `add_error` can clear `is_valid`; warnings and suggestions are
/// advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    is_valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    suggestions: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn add_suggestion(&mut self, message: impl Into<String>) {
        self.suggestions.push(message.into());
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Errors joined with `"; "`, the form surfaced as a failed join's message.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Direct,
    Chunked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinMetadata {
    pub left_rows: usize,
    pub right_rows: usize,
    pub result_rows: usize,
    pub join_type: JoinType,
    pub join_keys: Vec<String>,
    pub matched_rows: usize,
    pub left_only_rows: usize,
    pub right_only_rows: usize,
    pub memory_usage_mb: f64,
    pub processing_time_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

impl JoinMetadata {
    /// Metadata with every row count zeroed, used for failed joins.
    #[must_use]
    pub fn zeroed(config: &JoinConfig, processing_time_seconds: f64) -> Self {
        Self {
            left_rows: 0,
            right_rows: 0,
            result_rows: 0,
            join_type: config.join_type(),
            join_keys: config.left_keys().to_vec(),
            matched_rows: 0,
            left_only_rows: 0,
            right_only_rows: 0,
            memory_usage_mb: 0.0,
            processing_time_seconds,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time_seconds = seconds;
        self
    }

    /// Fraction of left rows that found a match (`matched / left_rows`).
    #[must_use]
    pub fn left_coverage(&self) -> f64 {
        ratio(self.matched_rows, self.left_rows)
    }

    /// Fraction of right rows that found a match (`matched / right_rows`).
    #[must_use]
    pub fn right_coverage(&self) -> f64 {
        ratio(self.matched_rows, self.right_rows)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResult {
    data: Dataset,
    metadata: JoinMetadata,
    config: JoinConfig,
    success: bool,
    error_message: Option<String>,
    processing_time: f64,
    strategy: Option<ExecutionStrategy>,
}

impl JoinResult {
    #[must_use]
    pub fn succeeded(
        data: Dataset,
        metadata: JoinMetadata,
        config: JoinConfig,
        strategy: ExecutionStrategy,
    ) -> Self {
        let processing_time = metadata.processing_time_seconds;
        Self {
            data,
            metadata,
            config,
            success: true,
            error_message: None,
            processing_time,
            strategy: Some(strategy),
        }
    }

    /// A failed result: empty data and zeroed row counts.
    #[must_use]
    pub fn failed(config: JoinConfig, message: impl Into<String>, processing_time: f64) -> Self {
        Self {
            data: Dataset::empty(),
            metadata: JoinMetadata::zeroed(&config, processing_time),
            config,
            success: false,
            error_message: Some(message.into()),
            processing_time,
            strategy: None,
        }
    }

    #[must_use]
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Dataset {
        self.data
    }

    #[must_use]
    pub fn metadata(&self) -> &JoinMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    #[must_use]
    pub fn processing_time(&self) -> f64 {
        self.processing_time
    }

    #[must_use]
    pub fn strategy(&self) -> Option<ExecutionStrategy> {
        self.strategy
    }
}
