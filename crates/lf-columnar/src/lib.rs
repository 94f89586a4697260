#![forbid(unsafe_code)]

use std::collections::HashSet;

use lf_types::{DType, Scalar, TypeError, cast_value, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: expected={expected}, found={found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("duplicate column name: {0}")]
    DuplicateName(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("row position {position} out of bounds for length {len}")]
    OutOfBounds { position: usize, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let coerced = values
            .into_iter()
            .map(|value| cast_value(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

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
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Gather rows by position; used when the engine output is reordered or trimmed.
    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|&position| {
                self.values
                    .get(position)
                    .cloned()
                    .ok_or(ColumnError::OutOfBounds {
                        position,
                        len: self.values.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.dtype, values)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.same_as(right))
    }
}

/// Rows returned by the engine: uniquely named columns in select-list order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RealizedTable {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl RealizedTable {
    pub fn new(names: Vec<String>, columns: Vec<Column>) -> Result<Self, ColumnError> {
        if names.len() != columns.len() {
            return Err(ColumnError::LengthMismatch {
                expected: names.len(),
                found: columns.len(),
            });
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ColumnError::DuplicateName(name.clone()));
            }
        }

        if let Some(first) = columns.first() {
            for column in &columns[1..] {
                if column.len() != first.len() {
                    return Err(ColumnError::LengthMismatch {
                        expected: first.len(),
                        found: column.len(),
                    });
                }
            }
        }

        Ok(Self { names, columns })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ColumnError>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let (names, columns): (Vec<String>, Vec<Column>) = pairs
            .into_iter()
            .map(|(name, column)| (name.into(), column))
            .unzip();
        Self::new(names, columns)
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|idx| &self.columns[idx])
    }

    /// Keep only `names`, in the order given.
    pub fn select(&self, names: &[&str]) -> Result<Self, ColumnError> {
        let mut out_names = Vec::with_capacity(names.len());
        let mut out_columns = Vec::with_capacity(names.len());
        for name in names {
            let column = self
                .column(name)
                .ok_or_else(|| ColumnError::UnknownColumn((*name).to_owned()))?;
            out_names.push((*name).to_owned());
            out_columns.push(column.clone());
        }
        Self::new(out_names, out_columns)
    }

    /// Split off one column, returning it alongside the remaining table.
    pub fn remove(mut self, name: &str) -> Result<(Column, Self), ColumnError> {
        let idx = self
            .position(name)
            .ok_or_else(|| ColumnError::UnknownColumn(name.to_owned()))?;
        self.names.remove(idx);
        let column = self.columns.remove(idx);
        Ok((column, self))
    }
}

#[cfg(test)]
mod tests {
    use lf_types::{DType, NullKind, Scalar};

    use super::{Column, ColumnError, RealizedTable};

    fn ints(values: &[i64]) -> Column {
        Column::from_values(values.iter().copied().map(Scalar::Int64).collect()).expect("ints")
    }

    #[test]
    fn new_coerces_nulls_to_dtype_marker() {
        let column = Column::new(DType::Float64, vec![Scalar::Int64(1), Scalar::NULL])
            .expect("column should build");
        assert_eq!(
            column.values(),
            &[Scalar::Float64(1.0), Scalar::Null(NullKind::NaN)]
        );
        assert_eq!(column.validity().valid_count(), 1);
    }

    #[test]
    fn take_rejects_out_of_range_positions() {
        let err = ints(&[1, 2]).take(&[0, 5]).expect_err("must fail");
        assert_eq!(err, ColumnError::OutOfBounds { position: 5, len: 2 });
    }

    #[test]
    fn table_rejects_duplicate_names() {
        let err = RealizedTable::from_pairs([("a", ints(&[1])), ("a", ints(&[2]))])
            .expect_err("duplicate");
        assert_eq!(err, ColumnError::DuplicateName("a".to_owned()));
    }

    #[test]
    fn table_rejects_ragged_columns() {
        let err = RealizedTable::from_pairs([("a", ints(&[1, 2])), ("b", ints(&[2]))])
            .expect_err("ragged");
        assert!(matches!(err, ColumnError::LengthMismatch { .. }));
    }

    #[test]
    fn remove_splits_column_from_table() {
        let table = RealizedTable::from_pairs([("id", ints(&[1, 2])), ("val", ints(&[10, 20]))])
            .expect("table");
        let (id, rest) = table.remove("id").expect("remove");
        assert_eq!(id.values(), &[Scalar::Int64(1), Scalar::Int64(2)]);
        assert_eq!(rest.names(), &["val".to_owned()]);
        assert_eq!(rest.num_rows(), 2);
    }

    #[test]
    fn table_deserializes_from_json_fixture() {
        let table = RealizedTable::from_pairs([("x", ints(&[7]))]).expect("table");
        let json = serde_json::to_string(&table).expect("serialize");
        let back: RealizedTable = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, table);
    }
}
