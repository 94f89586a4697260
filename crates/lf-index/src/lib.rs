#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use lf_columnar::{Column, ColumnError};
use lf_types::Scalar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl IndexLabel {
    #[must_use]
    pub fn from_scalar(value: &Scalar) -> Self {
        match value {
            Scalar::Null(_) => Self::Null,
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) if v.is_nan() => Self::Null,
            Scalar::Float64(v) => Self::Float64(*v),
            Scalar::Utf8(v) => Self::Utf8(v.clone()),
        }
    }

    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        match self {
            Self::Null => Scalar::NULL,
            Self::Bool(v) => Scalar::Bool(*v),
            Self::Int64(v) => Scalar::Int64(*v),
            Self::Float64(v) => Scalar::Float64(*v),
            Self::Utf8(v) => Scalar::Utf8(v.clone()),
        }
    }
}

// Float labels compare bitwise so that labels can key hash maps.
impl PartialEq for IndexLabel {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for IndexLabel {}

impl Hash for IndexLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<NA>"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index length ({index_len}) does not match row count ({row_count})")]
    LengthMismatch { index_len: usize, row_count: usize },
}

/// Realized row labels with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    name: Option<String>,
    labels: Vec<IndexLabel>,
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self { name: None, labels }
    }

    /// Default positional labels `0..len`.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new((0..len as i64).map(IndexLabel::Int64).collect())
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(values.into_iter().map(IndexLabel::from).collect())
    }

    #[must_use]
    pub fn from_column(column: &Column) -> Self {
        Self::new(column.values().iter().map(IndexLabel::from_scalar).collect())
    }

    /// Labels as a value column, for uploading the index alongside the data.
    pub fn to_column(&self) -> Result<Column, ColumnError> {
        Column::from_values(self.labels.iter().map(IndexLabel::to_scalar).collect())
    }

    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.labels.len());
        self.labels.iter().any(|label| !seen.insert(label))
    }

    #[must_use]
    pub fn position(&self, needle: &IndexLabel) -> Option<usize> {
        self.labels.iter().position(|label| label == needle)
    }

    pub fn validate_row_count(&self, row_count: usize) -> Result<(), IndexError> {
        if self.labels.len() != row_count {
            return Err(IndexError::LengthMismatch {
                index_len: self.labels.len(),
                row_count,
            });
        }
        Ok(())
    }
}
