use std::fmt;

use lf_core::{Block, CoreError, LocalFrame, RowIdentity};
use lf_expr::{ColumnExpr, OrderingColumnReference, WindowSpec};
use lf_ops::{AggregateOp, WindowOp};
use lf_runtime::api_call;
use lf_types::DType;

use crate::{FrameError, FromBlock, GroupBy, Operand, Rolling, Series, SharedClient};

const CLASS: &str = "DataFrame";

/// A lazily evaluated table: named value columns over one index.
#[derive(Clone)]
pub struct DataFrame {
    block: Block,
    client: SharedClient,
}

impl fmt::Debug for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFrame")
            .field("columns", &self.block.value_column_names())
            .field("index_columns", &self.block.index_columns())
            .finish_non_exhaustive()
    }
}

impl FromBlock for DataFrame {
    fn from_block(block: Block, client: SharedClient) -> Result<Self, FrameError> {
        Ok(Self::new(block, client))
    }
}

impl DataFrame {
    #[must_use]
    pub fn new(block: Block, client: SharedClient) -> Self {
        Self { block, client }
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.block
    }

    #[must_use]
    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    fn with_block(&self, block: Block) -> Self {
        Self::new(block, self.client.clone())
    }

    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.block
            .value_column_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        self.block.index().name()
    }

    #[must_use]
    pub fn dtypes(&self) -> Vec<(String, DType)> {
        self.block
            .value_columns()
            .into_iter()
            .map(|column| (column.name().to_owned(), column.dtype()))
            .collect()
    }

    /// `df[name]`.
    pub fn get(&self, name: &str) -> Result<Series, FrameError> {
        api_call(CLASS, "__getitem__", || {
            Series::from_block(self.block.select_columns(&[name])?, self.client.clone())
        })
    }

    /// `df[[a, b]]`.
    pub fn select(&self, names: &[&str]) -> Result<Self, FrameError> {
        api_call(CLASS, "__getitem__", || {
            Ok(self.with_block(self.block.select_columns(names)?))
        })
    }

    /// `df.assign(name=value)`: adds the column or replaces it in place.
    pub fn assign<'a>(&self, name: &str, value: impl Into<Operand<'a>>) -> Result<Self, FrameError> {
        let value = value.into();
        api_call(CLASS, "assign", || {
            let expr = value.resolve(&self.block)?;
            Ok(self.with_block(self.block.with_column(name, expr)?))
        })
    }

    pub fn drop(&self, names: &[&str]) -> Result<Self, FrameError> {
        api_call(CLASS, "drop", || {
            for name in names {
                self.block.value_column(name)?;
            }
            let kept = self
                .block
                .value_columns()
                .into_iter()
                .filter(|column| !names.contains(&column.name()))
                .cloned()
                .collect();
            Ok(self.with_block(self.block.copy(Some(kept))?))
        })
    }

    /// Rename value columns by `(old, new)` pairs.
    pub fn rename(&self, mapping: &[(&str, &str)]) -> Result<Self, FrameError> {
        api_call(CLASS, "rename", || {
            for (old, _) in mapping {
                self.block.value_column(old)?;
            }
            let renamed = self
                .block
                .value_columns()
                .into_iter()
                .map(|column| {
                    match mapping.iter().find(|(old, _)| *old == column.name()) {
                        Some((_, new)) => column.renamed(*new),
                        None => column.clone(),
                    }
                })
                .collect::<Vec<ColumnExpr>>();
            Ok(self.with_block(self.block.copy(Some(renamed))?))
        })
    }

    /// `df[mask]`: keep rows where the boolean Series is true.
    pub fn filter(&self, mask: &Series) -> Result<Self, FrameError> {
        api_call(CLASS, "__getitem__", || {
            let predicate = self.block.align_column(mask.block(), mask.name())?;
            Ok(self.with_block(self.block.filter(&predicate)?))
        })
    }

    pub fn sort_values(&self, by: &[&str], ascending: bool) -> Result<Self, FrameError> {
        api_call(CLASS, "sort_values", || {
            let keys = by
                .iter()
                .map(|column| {
                    if ascending {
                        OrderingColumnReference::asc(*column)
                    } else {
                        OrderingColumnReference::desc(*column)
                    }
                })
                .collect::<Vec<_>>();
            Ok(self.with_block(self.block.order_by(&keys)?))
        })
    }

    /// A positional index is already in order, so only a labelled index sorts.
    pub fn sort_index(&self, ascending: bool) -> Result<Self, FrameError> {
        api_call(CLASS, "sort_index", || match self.block.index().column_id() {
            Some(column) => {
                let key = if ascending {
                    OrderingColumnReference::asc(column)
                } else {
                    OrderingColumnReference::desc(column)
                };
                Ok(self.with_block(self.block.order_by(&[key])?))
            }
            None => Ok(self.clone()),
        })
    }

    pub fn head(&self, n: u64) -> Result<Self, FrameError> {
        api_call(CLASS, "head", || Ok(self.with_block(self.block.head(n)?)))
    }

    pub fn tail(&self, n: u64) -> Result<Self, FrameError> {
        api_call(CLASS, "tail", || Ok(self.with_block(self.block.tail(n)?)))
    }

    pub fn set_index(&self, column: &str) -> Result<Self, FrameError> {
        api_call(CLASS, "set_index", || {
            self.block.value_column(column)?;
            Ok(self.with_block(self.block.set_index(column)?))
        })
    }

    pub fn reset_index(&self) -> Result<Self, FrameError> {
        api_call(CLASS, "reset_index", || {
            Ok(self.with_block(self.block.reset_index()?))
        })
    }

    /// Group by one value column. Every other value column is aggregated.
    pub fn groupby(&self, by: &str, dropna: bool) -> Result<GroupBy, FrameError> {
        api_call(CLASS, "groupby", || {
            self.block.value_column(by)?;
            let columns = self
                .block
                .value_column_names()
                .into_iter()
                .filter(|name| *name != by)
                .map(str::to_owned)
                .collect();
            Ok(GroupBy::new(
                self.block.clone(),
                by.to_owned(),
                columns,
                dropna,
                self.client.clone(),
            ))
        })
    }

    pub fn rolling(&self, window: u64, min_periods: Option<u64>) -> Result<Rolling<Self>, FrameError> {
        api_call(CLASS, "rolling", || {
            let spec = WindowSpec::rolling(window, min_periods)?;
            Ok(Rolling::new(
                self.block.clone(),
                self.columns(),
                spec,
                self.client.clone(),
            ))
        })
    }

    pub fn cumsum(&self) -> Result<Self, FrameError> {
        api_call(CLASS, "cumsum", || {
            let spec = WindowSpec::cumulative();
            let mut block = self.block.clone();
            for column in self.columns() {
                block = block.apply_window_op(
                    &column,
                    WindowOp::Cumulative(AggregateOp::Sum),
                    &spec,
                    &column,
                )?;
            }
            Ok(self.with_block(block))
        })
    }

    /// Run the query and return the labelled rows.
    pub fn to_local(&self) -> Result<LocalFrame, FrameError> {
        api_call(CLASS, "to_local", || {
            Ok(self.block.compute(self.client.as_ref(), None)?)
        })
    }

    /// Compiled SQL for [`DataFrame::to_local`], without running it.
    pub fn sql(&self) -> Result<String, FrameError> {
        api_call(CLASS, "sql", || Ok(self.block.sql(None)?))
    }

    /// Number of rows. Runs a `COUNT(*)` query.
    pub fn len(&self) -> Result<usize, FrameError> {
        api_call(CLASS, "__len__", || {
            let positions = RowIdentity::derive(self.block.expr(), &[], None)?;
            Ok(positions.compute(self.client.as_ref())?.len())
        })
    }

    pub fn is_empty(&self) -> Result<bool, FrameError> {
        Ok(self.len()? == 0)
    }

    /// Reduce every value column to a single row.
    pub fn aggregate(&self, op: AggregateOp) -> Result<LocalFrame, FrameError> {
        api_call(CLASS, op.name(), || {
            let names = self.columns();
            let aggregations = names
                .iter()
                .map(|name| (name.as_str(), op))
                .collect::<Vec<_>>();
            if aggregations.is_empty() {
                return Err(CoreError::InvalidArgument(format!(
                    "{} needs at least one value column",
                    op.name()
                ))
                .into());
            }
            let reduced = self.block.aggregate(None, &aggregations, false)?;
            Ok(reduced.compute(self.client.as_ref(), None)?)
        })
    }
}
