#![forbid(unsafe_code)]

//! Scalar values, dtypes and the coercion rules shared by every frankenjoin
//! crate.

use std::cmp::Ordering;
use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flavor of a missing value: float columns carry `NaN`, all others `Null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
}

/// One cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
        }
    }

    /// True for either null marker and for a float `NaN`.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Null(_)) || matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        if dtype == DType::Float64 {
            Self::Null(NullKind::NaN)
        } else {
            Self::Null(NullKind::Null)
        }
    }

    /// Numeric view of bools, ints and floats.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(v) => Some(f64::from(u8::from(*v))),
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            Self::Null(_) | Self::Utf8(_) => None,
        }
    }

    /// Bytes held by this value, counting string payloads.
    #[must_use]
    pub fn footprint_bytes(&self) -> usize {
        match self {
            Self::Utf8(v) => size_of::<Self>() + v.capacity(),
            _ => size_of::<Self>(),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

/// Hashable equality key for a scalar, used to match join keys.
///
/// All missing markers collapse to `Missing` so missing keys match each
/// other, and integral floats collapse to `Int` so `1` and `1.0` match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKey {
    Missing,
    Bool(bool),
    Int(i64),
    Float(u64),
    Utf8(String),
}

impl From<&Scalar> for ScalarKey {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Null(_) => Self::Missing,
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int(*v),
            Scalar::Float64(v) if v.is_nan() => Self::Missing,
            Scalar::Float64(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Self::Int(*v as i64)
            }
            Scalar::Float64(v) => Self::Float(v.to_bits()),
            Scalar::Utf8(v) => Self::Utf8(v.clone()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("no common dtype for {left} and {right}")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast {from} value to {to}")]
    InvalidCast { from: DType, to: DType },
    #[error("float {value} does not fit int64 exactly")]
    LossyFloatToInt { value: f64 },
}

/// The dtype two columns widen to when combined: nulls adopt the other side
/// and bool < int64 < float64. Text mixes with nothing but itself.
pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Float64, Int64, Null};

    match (left, right) {
        (a, b) if a == b => Ok(a),
        (Null, other) | (other, Null) => Ok(other),
        (Bool | Int64, Int64) | (Int64, Bool) => Ok(Int64),
        (Bool | Int64 | Float64, Float64) | (Float64, Bool | Int64) => Ok(Float64),
        _ => Err(TypeError::IncompatibleDtypes { left, right }),
    }
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    values
        .iter()
        .try_fold(DType::Null, |acc, value| common_dtype(acc, value.dtype()))
}

/// Convert `value` to `target`. Missing values become the target's missing
/// marker; floats convert to int64 only when exact.
pub fn cast_scalar(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    if matches!(value, Scalar::Null(_)) {
        return Ok(Scalar::missing_for_dtype(target));
    }
    let from = value.dtype();
    match (value, target) {
        (value, target) if from == target => Ok(value),
        (Scalar::Bool(v), DType::Int64) => Ok(Scalar::Int64(i64::from(v))),
        (Scalar::Float64(v), DType::Int64) => {
            if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                Ok(Scalar::Int64(v as i64))
            } else {
                Err(TypeError::LossyFloatToInt { value: v })
            }
        }
        (Scalar::Bool(v), DType::Float64) => Ok(Scalar::Float64(f64::from(u8::from(v)))),
        (Scalar::Int64(v), DType::Float64) => Ok(Scalar::Float64(v as f64)),
        _ => Err(TypeError::InvalidCast { from, to: target }),
    }
}

/// Ordering for stable sorts. Missing values go last in either direction.
#[must_use]
pub fn compare_scalars_na_last(left: &Scalar, right: &Scalar, ascending: bool) -> Ordering {
    match (left.is_missing(), right.is_missing()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    let order = match (left, right) {
        (Scalar::Utf8(a), Scalar::Utf8(b)) => a.cmp(b),
        (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
        (Scalar::Int64(a), Scalar::Int64(b)) => a.cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => left.dtype().cmp(&right.dtype()),
        },
    };
    if ascending { order } else { order.reverse() }
}
