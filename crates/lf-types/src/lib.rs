#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical column type shared by plan expressions and realized results.
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
    /// Numeric in the pandas sense: bool counts, strings do not.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int64 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Int64 => "Int64",
            Self::Float64 => "Float64",
            Self::Utf8 => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
}

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
    pub const NULL: Self = Self::Null(NullKind::Null);

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

    /// SQL-null check. A float NaN is a value to the engine, not a null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Missing in the pandas sense: SQL null or a float NaN.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.is_null() || matches!(self, Self::Float64(v) if v.is_nan())
    }

    /// Marker a missing value takes once it lands in a column of `dtype`.
    #[must_use]
    pub fn missing_of(dtype: DType) -> Self {
        if dtype == DType::Float64 {
            Self::Null(NullKind::NaN)
        } else {
            Self::NULL
        }
    }

    /// Equality that treats every missing marker as equal to every other.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        if self.is_missing() || other.is_missing() {
            return self.is_missing() && other.is_missing();
        }
        self == other
    }

    fn numeric_error(&self) -> TypeError {
        match self {
            Self::Null(_) => TypeError::Missing,
            other => TypeError::NotNumeric {
                dtype: other.dtype(),
            },
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match *self {
            Self::Bool(flag) => Ok(f64::from(u8::from(flag))),
            Self::Int64(n) => Ok(n as f64),
            Self::Float64(x) => Ok(x),
            _ => Err(self.numeric_error()),
        }
    }

    pub fn to_i64(&self) -> Result<i64, TypeError> {
        match *self {
            Self::Bool(flag) => Ok(i64::from(flag)),
            Self::Int64(n) => Ok(n),
            Self::Float64(x) => float_to_int(x),
            _ => Err(self.numeric_error()),
        }
    }

    pub fn to_bool(&self) -> Result<bool, TypeError> {
        match self {
            Self::Bool(flag) => Ok(*flag),
            Self::Null(_) => Err(TypeError::Missing),
            other => Err(TypeError::UnsupportedCast {
                from: other.dtype(),
                to: DType::Bool,
            }),
        }
    }

    /// Ordering between two non-null scalars of compatible dtypes.
    ///
    /// Numeric values compare by value across int/float/bool; NaN sorts after
    /// every other float. Returns `None` for nulls and for string/number mixes.
    #[must_use]
    pub fn value_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (lhs, rhs) if lhs.dtype().is_numeric() && rhs.dtype().is_numeric() => {
                Some(lhs.to_f64().ok()?.total_cmp(&rhs.to_f64().ok()?))
            }
            _ => None,
        }
    }
}

fn float_to_int(x: f64) -> Result<i64, TypeError> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if x.is_finite() && x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        Ok(x as i64)
    } else {
        Err(TypeError::InexactInteger { value: x })
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("{left} and {right} have no common type")]
    NoCommonType { left: DType, right: DType },
    #[error("no cast from {from} to {to}")]
    UnsupportedCast { from: DType, to: DType },
    #[error("{value} is not an exact integer")]
    InexactInteger { value: f64 },
    #[error("expected a numeric value, found {dtype}")]
    NotNumeric { dtype: DType },
    #[error("value is missing")]
    Missing,
}

/// Type both operands promote to. Null adopts the other side; bool widens
/// to int and int widens to float. Strings only meet strings.
pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    if left == right || right == DType::Null {
        return Ok(left);
    }
    if left == DType::Null {
        return Ok(right);
    }
    if left.is_numeric() && right.is_numeric() {
        return Ok(left.max(right));
    }
    Err(TypeError::NoCommonType { left, right })
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    values
        .iter()
        .try_fold(DType::Null, |acc, value| common_dtype(acc, value.dtype()))
}

/// Converts `value` to `target`, mapping missing values to the target's
/// missing marker.
pub fn cast_value(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    if value.is_null() {
        return Ok(Scalar::missing_of(target));
    }
    let from = value.dtype();
    if from == target {
        return Ok(value);
    }
    let out = match (value, target) {
        (_, DType::Null) => Scalar::NULL,
        (Scalar::Int64(n), DType::Bool) => Scalar::Bool(n != 0),
        (Scalar::Float64(x), DType::Bool) => Scalar::Bool(x != 0.0),
        (Scalar::Bool(flag), DType::Int64) => Scalar::Int64(i64::from(flag)),
        (Scalar::Float64(x), DType::Int64) => Scalar::Int64(float_to_int(x)?),
        (Scalar::Bool(flag), DType::Float64) => Scalar::Float64(f64::from(u8::from(flag))),
        (Scalar::Int64(n), DType::Float64) => Scalar::Float64(n as f64),
        _ => return Err(TypeError::UnsupportedCast { from, to: target }),
    };
    Ok(out)
}
