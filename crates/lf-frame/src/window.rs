//! Deferred window and group-by objects returned by `rolling` and `groupby`.

use std::fmt;
use std::marker::PhantomData;

use lf_core::Block;
use lf_expr::{Expr, UnaryOp, WindowSpec};
use lf_ops::{AggregateOp, WindowOp};
use lf_runtime::api_call;

use crate::{DataFrame, FrameError, FromBlock, SharedClient};

/// A rolling window over some columns, waiting for its aggregation.
pub struct Rolling<T> {
    block: Block,
    columns: Vec<String>,
    spec: WindowSpec,
    client: SharedClient,
    _output: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Rolling<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rolling")
            .field("columns", &self.columns)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl<T: FromBlock> Rolling<T> {
    pub(crate) fn new(
        block: Block,
        columns: Vec<String>,
        spec: WindowSpec,
        client: SharedClient,
    ) -> Self {
        Self {
            block,
            columns,
            spec,
            client,
            _output: PhantomData,
        }
    }

    #[must_use]
    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    fn apply(&self, method: &'static str, op: AggregateOp) -> Result<T, FrameError> {
        api_call("Rolling", method, || {
            let mut block = self.block.clone();
            for column in &self.columns {
                block = block.apply_window_op(column, WindowOp::Aggregate(op), &self.spec, column)?;
            }
            let names = self.columns.iter().map(String::as_str).collect::<Vec<_>>();
            T::from_block(block.select_columns(&names)?, self.client.clone())
        })
    }

    pub fn sum(&self) -> Result<T, FrameError> {
        self.apply("sum", AggregateOp::Sum)
    }

    pub fn mean(&self) -> Result<T, FrameError> {
        self.apply("mean", AggregateOp::Mean)
    }

    pub fn min(&self) -> Result<T, FrameError> {
        self.apply("min", AggregateOp::Min)
    }

    pub fn max(&self) -> Result<T, FrameError> {
        self.apply("max", AggregateOp::Max)
    }

    pub fn count(&self) -> Result<T, FrameError> {
        self.apply("count", AggregateOp::Count)
    }
}

/// `df.groupby(by)`: one grouping key over the frame's value columns.
#[derive(Clone)]
pub struct GroupBy {
    block: Block,
    by: String,
    columns: Vec<String>,
    dropna: bool,
    client: SharedClient,
}

impl fmt::Debug for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBy")
            .field("by", &self.by)
            .field("columns", &self.columns)
            .field("dropna", &self.dropna)
            .finish_non_exhaustive()
    }
}

impl GroupBy {
    pub(crate) fn new(
        block: Block,
        by: String,
        columns: Vec<String>,
        dropna: bool,
        client: SharedClient,
    ) -> Self {
        Self {
            block,
            by,
            columns,
            dropna,
            client,
        }
    }

    #[must_use]
    pub fn by(&self) -> &str {
        &self.by
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Narrow the aggregated columns, as `df.groupby(k)[[a, b]]`.
    pub fn select(&self, columns: &[&str]) -> Result<Self, FrameError> {
        api_call("GroupBy", "__getitem__", || {
            for column in columns {
                self.block.value_column(column)?;
            }
            Ok(Self {
                columns: columns.iter().map(|column| (*column).to_owned()).collect(),
                ..self.clone()
            })
        })
    }

    /// Apply a possibly different aggregation per column.
    pub fn agg(&self, aggregations: &[(&str, AggregateOp)]) -> Result<DataFrame, FrameError> {
        api_call("GroupBy", "agg", || self.aggregate(aggregations))
    }

    fn aggregate(&self, aggregations: &[(&str, AggregateOp)]) -> Result<DataFrame, FrameError> {
        let block = self.block.aggregate(Some(self.by.as_str()), aggregations, self.dropna)?;
        DataFrame::from_block(block, self.client.clone())
    }

    fn uniform(&self, method: &'static str, op: AggregateOp) -> Result<DataFrame, FrameError> {
        api_call("GroupBy", method, || {
            let aggregations = self
                .columns
                .iter()
                .map(|column| (column.as_str(), op))
                .collect::<Vec<_>>();
            self.aggregate(&aggregations)
        })
    }

    pub fn sum(&self) -> Result<DataFrame, FrameError> {
        self.uniform("sum", AggregateOp::Sum)
    }

    pub fn mean(&self) -> Result<DataFrame, FrameError> {
        self.uniform("mean", AggregateOp::Mean)
    }

    pub fn min(&self) -> Result<DataFrame, FrameError> {
        self.uniform("min", AggregateOp::Min)
    }

    pub fn max(&self) -> Result<DataFrame, FrameError> {
        self.uniform("max", AggregateOp::Max)
    }

    pub fn count(&self) -> Result<DataFrame, FrameError> {
        self.uniform("count", AggregateOp::Count)
    }

    pub fn all(&self) -> Result<DataFrame, FrameError> {
        self.uniform("all", AggregateOp::All)
    }

    pub fn any(&self) -> Result<DataFrame, FrameError> {
        self.uniform("any", AggregateOp::Any)
    }

    fn grouped_window(&self, method: &'static str, op: AggregateOp) -> Result<DataFrame, FrameError> {
        api_call("GroupBy", method, || {
            let mut block = self.block.clone();
            if self.dropna {
                let key = block.expr().get_column(&self.by)?.expr().clone();
                block = block.filter(&Expr::unary(UnaryOp::NotNull, key)?)?;
            }
            let spec = WindowSpec::cumulative().with_grouping_keys([self.by.as_str()]);
            for column in &self.columns {
                block = block.apply_window_op(column, WindowOp::Cumulative(op), &spec, column)?;
            }
            let names = self.columns.iter().map(String::as_str).collect::<Vec<_>>();
            DataFrame::from_block(block.select_columns(&names)?, self.client.clone())
        })
    }

    /// Running sum within each group, in the frame's row order.
    pub fn cumsum(&self) -> Result<DataFrame, FrameError> {
        self.grouped_window("cumsum", AggregateOp::Sum)
    }

    pub fn cummax(&self) -> Result<DataFrame, FrameError> {
        self.grouped_window("cummax", AggregateOp::Max)
    }

    pub fn cummin(&self) -> Result<DataFrame, FrameError> {
        self.grouped_window("cummin", AggregateOp::Min)
    }
}
