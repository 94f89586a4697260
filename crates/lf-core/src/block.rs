//! The mutable handle that `DataFrame` and `Series` hold.
//!
//! A [`Block`] pairs an [`ExpressionTree`] with the column ids that form its
//! index and the [`RowIdentity`] derived from them. Every public mutation
//! either succeeds completely or leaves the Block untouched.

use lf_columnar::{Column, RealizedTable};
use lf_expr::{
    BinaryOp, ColumnExpr, Expr, OrderingColumnReference, SortExpr, UnaryOp, WindowClause,
    WindowFunc, WindowSpec, is_reserved,
};
use lf_index::Index;
use lf_ops::{AggregateOp, WindowOp};
use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::client::QueryClient;
use crate::index::RowIdentity;
use crate::tree::ExpressionTree;

/// Column id given to a positional index turned into a column.
const DEFAULT_INDEX_LABEL: &str = "index";

/// Materialized rows with their index, as handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    index: Index,
    table: RealizedTable,
}

impl LocalFrame {
    #[must_use]
    pub fn new(index: Index, table: RealizedTable) -> Self {
        Self { index, table }
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn table(&self) -> &RealizedTable {
        &self.table
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.table.column(name)
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    #[must_use]
    pub fn into_parts(self) -> (Index, RealizedTable) {
        (self.index, self.table)
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    expr: ExpressionTree,
    index_columns: Vec<String>,
    index: RowIdentity,
}

impl Block {
    /// The index display name defaults to the index column id.
    pub fn new(expr: ExpressionTree, index_columns: Vec<String>) -> Result<Self, CoreError> {
        let name = index_columns.first().cloned();
        let index = RowIdentity::derive(&expr, &index_columns, name)?;
        Ok(Self {
            expr,
            index_columns,
            index,
        })
    }

    #[must_use]
    pub fn expr(&self) -> &ExpressionTree {
        &self.expr
    }

    /// Swap the tree and re-derive the index against the same index columns.
    /// On error the Block keeps its previous tree.
    pub fn set_expr(&mut self, expr: ExpressionTree) -> Result<(), CoreError> {
        let name = self.index.name().map(str::to_owned);
        let index = RowIdentity::derive(&expr, &self.index_columns, name)?;
        self.expr = expr;
        self.index = index;
        Ok(())
    }

    #[must_use]
    pub fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    /// Re-point the index. The display name resets to the new column id.
    pub fn set_index_columns<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<(), CoreError> {
        let columns = columns
            .iter()
            .map(|column| column.as_ref().to_owned())
            .collect::<Vec<_>>();
        let index = RowIdentity::derive(&self.expr, &columns, columns.first().cloned())?;
        self.index_columns = columns;
        self.index = index;
        Ok(())
    }

    #[must_use]
    pub fn index(&self) -> &RowIdentity {
        &self.index
    }

    pub fn set_index_name(&mut self, name: Option<String>) {
        self.index = self.index.with_name(name);
    }

    /// Visible data columns: everything but the index and reserved columns.
    #[must_use]
    pub fn value_columns(&self) -> Vec<&ColumnExpr> {
        self.expr
            .columns()
            .iter()
            .filter(|column| {
                !self.index_columns.iter().any(|index| index == column.name())
                    && !is_reserved(column.name())
            })
            .collect()
    }

    #[must_use]
    pub fn value_column_names(&self) -> Vec<&str> {
        self.value_columns().into_iter().map(ColumnExpr::name).collect()
    }

    /// A value column by id. Index columns are not addressable this way.
    pub fn value_column(&self, name: &str) -> Result<&ColumnExpr, CoreError> {
        self.value_columns()
            .into_iter()
            .find(|column| column.name() == name)
            .ok_or_else(|| CoreError::UnknownColumn(name.to_owned()))
    }

    /// Independent copy, optionally with a different set of value columns.
    pub fn copy(&self, columns: Option<Vec<ColumnExpr>>) -> Result<Self, CoreError> {
        let mut out = self.clone();
        if let Some(columns) = columns {
            out.replace_value_columns(columns)?;
        }
        Ok(out)
    }

    /// Project index columns followed by `columns`. Reserved columns that
    /// carry the ordering survive the projection.
    pub fn replace_value_columns(&mut self, columns: Vec<ColumnExpr>) -> Result<(), CoreError> {
        let mut projected = self
            .index_columns
            .iter()
            .map(|name| self.expr.get_column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        projected.extend(columns);
        for column in self.expr.columns() {
            if is_reserved(column.name()) && !projected.iter().any(|kept| kept.name() == column.name())
            {
                projected.push(column.clone());
            }
        }
        let expr = self.expr.projection(projected)?;
        self.set_expr(expr)
    }

    fn with_tree(&self, expr: ExpressionTree) -> Result<Self, CoreError> {
        let mut out = self.clone();
        out.set_expr(expr)?;
        Ok(out)
    }

    /// Add or replace one value column.
    pub fn with_column(&self, name: &str, expr: Expr) -> Result<Self, CoreError> {
        if self.index_columns.iter().any(|index| index == name) || is_reserved(name) {
            return Err(CoreError::DuplicateColumn(name.to_owned()));
        }
        self.with_tree(self.expr.with_columns(vec![ColumnExpr::new(name, expr)])?)
    }

    /// Keep only `names` as value columns, in that order.
    pub fn select_columns(&self, names: &[&str]) -> Result<Self, CoreError> {
        let columns = names
            .iter()
            .map(|name| self.value_column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        self.copy(Some(columns))
    }

    /// Fetch the index and the requested value columns (all by default).
    pub fn compute(
        &self,
        client: &dyn QueryClient,
        value_keys: Option<&[&str]>,
    ) -> Result<LocalFrame, CoreError> {
        let table = self.projected_tree(value_keys)?.materialize(client)?;
        self.index.relabel(table)
    }

    /// Engine SQL for what [`Block::compute`] would run.
    pub fn sql(&self, value_keys: Option<&[&str]>) -> Result<String, CoreError> {
        Ok(self
            .projected_tree(value_keys)?
            .to_compiled_query()
            .sql()
            .to_owned())
    }

    fn projected_tree(&self, value_keys: Option<&[&str]>) -> Result<ExpressionTree, CoreError> {
        let values = match value_keys {
            Some(keys) => keys
                .iter()
                .map(|key| self.value_column(key).cloned())
                .collect::<Result<Vec<_>, _>>()?,
            None => self.value_columns().into_iter().cloned().collect(),
        };
        let mut columns = self
            .index_columns
            .iter()
            .map(|name| self.expr.get_column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        columns.extend(values);
        Ok(self.expr.projection(columns)?)
    }

    pub fn filter(&self, predicate: &Expr) -> Result<Self, CoreError> {
        self.with_tree(self.expr.filter(predicate)?)
    }

    /// Stable sort by value or index columns, nulls last.
    pub fn order_by(&self, keys: &[OrderingColumnReference]) -> Result<Self, CoreError> {
        let sorts = keys
            .iter()
            .map(|key| {
                self.expr.get_column(&key.column_id).map(|column| SortExpr {
                    expr: column.expr().clone(),
                    direction: key.direction,
                    nulls_last: true,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.with_tree(self.expr.order_by(sorts)?)
    }

    pub fn head(&self, n: u64) -> Result<Self, CoreError> {
        self.with_tree(self.expr.head(n))
    }

    pub fn tail(&self, n: u64) -> Result<Self, CoreError> {
        self.with_tree(self.expr.tail(n))
    }

    fn promoted(&self) -> ExpressionTree {
        if self.expr.needs_promotion() {
            self.expr.to_subquery()
        } else {
            self.expr.clone()
        }
    }

    /// Reduce value columns, per distinct `by` value or to a single row.
    ///
    /// Each aggregated column keeps its id. With `by`, the key becomes the
    /// index and rows come back sorted by it; `dropna` drops the NULL key.
    pub fn aggregate(
        &self,
        by: Option<&str>,
        aggregations: &[(&str, AggregateOp)],
        dropna: bool,
    ) -> Result<Self, CoreError> {
        for (column, op) in aggregations {
            op.check_input(self.expr.get_column(column)?.expr())?;
        }
        let mut base = self.promoted();
        let keys = match by {
            Some(key) => {
                let key = base.get_column(key)?.clone();
                if dropna {
                    let present = Expr::unary(UnaryOp::NotNull, key.expr().clone())?;
                    base = base.filter(&present)?;
                }
                vec![key]
            }
            None => Vec::new(),
        };
        let aggregates = aggregations
            .iter()
            .map(|(column, op)| {
                let input = base.get_column(column)?;
                Ok(ColumnExpr::new(*column, op.aggregate(input.expr())?))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        let index_columns = by.map(|key| vec![key.to_owned()]).unwrap_or_default();
        Self::new(base.aggregate(keys, aggregates)?, index_columns)
    }

    /// Evaluate `op` over `column` as a window and store it as `result_id`.
    ///
    /// The tree is wrapped in a sub-select only when the window reads
    /// another window's output or the rows are limited or grouped.
    pub fn apply_window_op(
        &self,
        column: &str,
        op: WindowOp,
        spec: &WindowSpec,
        result_id: &str,
    ) -> Result<Self, CoreError> {
        if self.index_columns.iter().any(|index| index == result_id) || is_reserved(result_id) {
            return Err(CoreError::DuplicateColumn(result_id.to_owned()));
        }
        let mut base = self.expr.clone();
        let mut parts = window_inputs(&base, column, op, spec)?;
        if base.needs_promotion_for(&parts.exprs()) {
            base = base.to_subquery();
            parts = window_inputs(&base, column, op, spec)?;
        }
        let over = WindowClause {
            partition_by: parts.partition_by,
            order_by: parts.order_by,
            frame: spec.frame(),
        };
        let value = op.apply(&parts.input, over, spec.min_periods)?;
        self.with_tree(base.with_columns(vec![ColumnExpr::new(result_id, value)])?)
    }

    /// Stack this Block's rows on top of `others`, as `pd.concat`.
    ///
    /// Every input must have the same value columns in the same order. With
    /// `ignore_index`, or when every input has a positional index, the result
    /// is positional; otherwise every input needs a labelled index, and the
    /// labels are stacked under this Block's index column id.
    pub fn concat(&self, others: &[Self], ignore_index: bool) -> Result<Self, CoreError> {
        let names = self.value_column_names();
        let labelled = !ignore_index && !self.index_columns.is_empty();
        let mut parts = Vec::with_capacity(others.len() + 1);
        for block in std::iter::once(self).chain(others) {
            if !ignore_index && block.index_columns.is_empty() == labelled {
                return Err(CoreError::NotImplemented(
                    "concat of labelled and positional indexes".to_owned(),
                ));
            }
            if block.value_column_names() != names {
                return Err(CoreError::InvalidArgument(format!(
                    "concat inputs must share value columns: {names:?} vs {:?}",
                    block.value_column_names()
                )));
            }
            let mut columns = Vec::with_capacity(names.len() + 1);
            if labelled {
                let own = block.index.column_id().ok_or_else(|| {
                    CoreError::NotImplemented("concat of a hierarchical index".to_owned())
                })?;
                columns.push(block.expr.get_column(own)?.renamed(&self.index_columns[0]));
            }
            columns.extend(block.value_columns().into_iter().cloned());
            parts.push(block.expr.projection(columns)?);
        }

        let tree = ExpressionTree::union_all(&parts)?;
        if !labelled {
            return Self::new(tree, Vec::new());
        }
        let mut out = Self::new(tree, self.index_columns.clone())?;
        let name = self.index.name();
        let shared = others.iter().all(|block| block.index.name() == name);
        out.set_index_name(if shared { name.map(str::to_owned) } else { None });
        Ok(out)
    }

    /// Move the index into the value columns and fall back to positions.
    ///
    /// A labelled index becomes a leading column named after the index (or
    /// `index` when unnamed). A positional index is numbered `0..n` in the
    /// current row order.
    pub fn reset_index(&self) -> Result<Self, CoreError> {
        match self.index.column_id() {
            Some(column) => {
                let label = self.index.name().unwrap_or(DEFAULT_INDEX_LABEL);
                if label != column && self.expr.contains_column(label) {
                    return Err(CoreError::DuplicateColumn(label.to_owned()));
                }
                let mut columns = vec![self.expr.get_column(column)?.renamed(label)];
                columns.extend(
                    self.expr
                        .columns()
                        .iter()
                        .filter(|existing| existing.name() != column)
                        .cloned(),
                );
                Self::new(self.expr.projection(columns)?, Vec::new())
            }
            None => {
                if self.expr.contains_column(DEFAULT_INDEX_LABEL) {
                    return Err(CoreError::DuplicateColumn(DEFAULT_INDEX_LABEL.to_owned()));
                }
                let base = self.promoted();
                let number = Expr::window(
                    WindowFunc::RowNumber,
                    Vec::new(),
                    WindowClause {
                        order_by: base.ordering().to_vec(),
                        ..WindowClause::default()
                    },
                )?;
                let position = Expr::binary(BinaryOp::Sub, number, Expr::literal(1_i64))?;
                let mut columns = vec![ColumnExpr::new(DEFAULT_INDEX_LABEL, position)];
                columns.extend(base.columns().iter().cloned());
                Self::new(base.projection(columns)?, Vec::new())
            }
        }
    }

    /// Make `column` the index. The previous labelled index is dropped.
    pub fn set_index(&self, column: &str) -> Result<Self, CoreError> {
        let mut columns = vec![self.expr.get_column(column)?.clone()];
        columns.extend(
            self.expr
                .columns()
                .iter()
                .filter(|existing| {
                    existing.name() != column
                        && !self.index_columns.iter().any(|index| index == existing.name())
                })
                .cloned(),
        );
        Self::new(self.expr.projection(columns)?, vec![column.to_owned()])
    }

    /// Resolve `column` of `other` as an expression usable in this Block.
    ///
    /// Only rows that already line up are supported: the same relation,
    /// filters and limit, and the same index.
    pub fn align_column(&self, other: &Self, column: &str) -> Result<Expr, CoreError> {
        if !self.expr.same_rows(&other.expr) {
            return Err(CoreError::NotImplemented(
                "aligning objects with different row sets requires a join".to_owned(),
            ));
        }
        let same_index = match (self.index.expr(), other.index.expr()) {
            (None, None) => true,
            (Some(left), Some(right)) => left == right,
            _ => false,
        };
        if !same_index {
            return Err(CoreError::NotImplemented(
                "aligning objects with different indexes requires a join".to_owned(),
            ));
        }
        Ok(other.expr.get_column(column)?.expr().clone())
    }
}

/// Expressions a window reads, resolved against one tree.
struct WindowInputs {
    input: Expr,
    partition_by: Vec<Expr>,
    order_by: Vec<SortExpr>,
}

impl WindowInputs {
    fn exprs(&self) -> Vec<&Expr> {
        std::iter::once(&self.input)
            .chain(&self.partition_by)
            .chain(self.order_by.iter().map(|sort| &sort.expr))
            .collect()
    }
}

/// Grouping keys partition the rows. Ordering comes from `spec`, else the
/// tree's ambient row order; whole-partition aggregates ignore ordering.
fn window_inputs(
    tree: &ExpressionTree,
    column: &str,
    op: WindowOp,
    spec: &WindowSpec,
) -> Result<WindowInputs, CoreError> {
    let input = tree.get_column(column)?.expr().clone();
    let partition_by = spec
        .grouping_keys
        .iter()
        .map(|key| tree.get_column(key).map(|column| column.expr().clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let order_by = match op {
        WindowOp::Aggregate(_) if spec.frame().is_none() => Vec::new(),
        WindowOp::Cut { .. } => Vec::new(),
        _ if spec.ordering.is_empty() => tree.ordering().to_vec(),
        _ => spec
            .ordering
            .iter()
            .map(|key| {
                tree.get_column(&key.column_id).map(|column| SortExpr {
                    expr: column.expr().clone(),
                    direction: key.direction,
                    nulls_last: true,
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(WindowInputs {
        input,
        partition_by,
        order_by,
    })
}

#[cfg(test)]
mod tests {
    use lf_columnar::{Column, RealizedTable};
    use lf_expr::{
        BaseTableRef, BinaryOp, ColumnExpr, Expr, OrderingColumnReference, TableId, WindowSpec,
    };
    use lf_index::{Index, IndexLabel};
    use lf_ops::{AggregateOp, WindowOp, floordiv_op, mod_op};
    use lf_types::{DType, Scalar};

    use super::{Block, LocalFrame};
    use crate::CoreError;
    use crate::client::QueryClient;
    use crate::local::LocalEngine;
    use crate::tree::ExpressionTree;

    fn column(values: Vec<Scalar>) -> Column {
        Column::from_values(values).expect("column")
    }

    fn ints(values: &[i64]) -> Column {
        column(values.iter().copied().map(Scalar::Int64).collect())
    }

    fn bind(engine: &LocalEngine, table: &str) -> ExpressionTree {
        let id = TableId::new("p", "d", table);
        let schema = engine.get_table(&id).expect("schema");
        ExpressionTree::new(BaseTableRef::bind(id, schema), None).expect("tree")
    }

    fn fixture() -> (LocalEngine, Block) {
        let table = RealizedTable::from_pairs([("id", ints(&[1, 2, 3])), ("val", ints(&[10, 20, 30]))])
            .expect("table");
        let engine = LocalEngine::new().with_table(TableId::new("p", "d", "t"), table);
        let block = Block::new(bind(&engine, "t"), vec!["id".to_owned()]).expect("block");
        (engine, block)
    }

    fn values(frame: &LocalFrame, name: &str) -> Vec<Scalar> {
        frame.column(name).expect("column").values().to_vec()
    }

    #[test]
    fn compute_returns_values_indexed_by_index_column() {
        let (engine, block) = fixture();
        let frame = block.compute(&engine, None).expect("compute");
        assert_eq!(frame.table().names(), &["val"]);
        assert_eq!(
            values(&frame, "val"),
            vec![Scalar::Int64(10), Scalar::Int64(20), Scalar::Int64(30)]
        );
        assert_eq!(
            frame.index(),
            &Index::from_i64(vec![1, 2, 3]).with_name(Some("id".to_owned()))
        );
    }

    #[test]
    fn local_frame_serializes_with_its_index() {
        let (engine, block) = fixture();
        let frame = block.compute(&engine, None).expect("compute");
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: LocalFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, frame);
    }

    #[test]
    fn hierarchical_index_is_rejected_without_mutation() {
        let (_, mut block) = fixture();
        let err = block.set_index_columns(&["id", "val"]).expect_err("multi");
        assert!(matches!(err, CoreError::NotImplemented(_)));
        assert_eq!(block.index_columns(), &["id".to_owned()]);
        assert_eq!(block.index().column_id(), Some("id"));
    }

    #[test]
    fn index_is_rederived_when_the_tree_changes() {
        let (engine, mut block) = fixture();
        block.set_index_columns(&["val"]).expect("index by val");
        assert_eq!(block.index().column_id(), Some("val"));
        assert_eq!(block.index().name(), Some("val"));

        let id = block.expr().get_column("id").expect("id").expr().clone();
        let doubled = Expr::binary(BinaryOp::Mul, id, Expr::literal(2_i64)).expect("mul");
        let tree = block
            .expr()
            .with_columns(vec![ColumnExpr::new("id", doubled)])
            .expect("tree");
        block.set_expr(tree.clone()).expect("swap tree");
        assert!(block.index().tree().ptr_eq(&tree));
        assert_eq!(block.index().column_id(), Some("val"));

        let frame = block.compute(&engine, None).expect("compute");
        assert_eq!(
            values(&frame, "id"),
            vec![Scalar::Int64(2), Scalar::Int64(4), Scalar::Int64(6)]
        );
        assert_eq!(
            frame.index(),
            &Index::from_i64(vec![10, 20, 30]).with_name(Some("val".to_owned()))
        );
    }

    #[test]
    fn concat_stacks_rows_in_input_order() {
        let (engine, block) = fixture();
        let val = block.value_column("val").expect("val").expr().clone();
        let small = block
            .filter(&Expr::binary(BinaryOp::Lt, val, Expr::literal(25_i64)).expect("lt"))
            .expect("filter");
        let stacked = block.concat(&[small], false).expect("concat");
        assert_eq!(stacked.value_column_names(), vec!["val"]);
        let frame = stacked.compute(&engine, None).expect("compute");
        assert_eq!(
            values(&frame, "val"),
            [10, 20, 30, 10, 20].map(Scalar::Int64).to_vec()
        );
        assert_eq!(
            frame.index(),
            &Index::from_i64(vec![1, 2, 3, 1, 2]).with_name(Some("id".to_owned()))
        );
        assert_eq!(engine.query_count(), 1);

        let positional = block.concat(std::slice::from_ref(&block), true).expect("ignore index");
        assert!(positional.index_columns().is_empty());
        assert_eq!(positional.compute(&engine, None).expect("compute").num_rows(), 6);
    }

    #[test]
    fn concat_rejects_mismatched_inputs() {
        let (_, block) = fixture();
        let renamed = block
            .copy(Some(vec![block.value_column("val").expect("val").renamed("other")]))
            .expect("copy");
        assert!(matches!(
            block.concat(&[renamed], false),
            Err(CoreError::InvalidArgument(_))
        ));
        let positional = block.reset_index().expect("reset");
        assert!(matches!(
            block.concat(&[positional], false),
            Err(CoreError::NotImplemented(_))
        ));
    }

    #[test]
    fn set_expr_failure_keeps_previous_tree() {
        let (_, mut block) = fixture();
        let only_val = block
            .expr()
            .projection(vec![block.expr().get_column("val").expect("val").clone()])
            .expect("projection");
        let err = block.set_expr(only_val).expect_err("index column dropped");
        assert_eq!(err, CoreError::UnknownColumn("id".to_owned()));
        assert_eq!(block.expr().column_names(), vec!["id", "val"]);
    }

    #[test]
    fn copy_is_independent_and_shares_nodes() {
        let (_, block) = fixture();
        let val = block.value_column("val").expect("val").clone();
        let renamed = val.renamed("v2");
        let copy = block.copy(Some(vec![renamed.clone()])).expect("copy");
        assert_eq!(block.value_column_names(), vec!["val"]);
        assert_eq!(copy.value_column_names(), vec!["v2"]);
        assert!(copy.value_column("v2").expect("v2").same_as(&renamed));
        assert!(copy.index().column_id() == Some("id"));
    }

    #[test]
    fn index_columns_are_not_value_columns() {
        let (_, block) = fixture();
        assert!(matches!(
            block.value_column("id"),
            Err(CoreError::UnknownColumn(_))
        ));
        assert!(matches!(
            block.with_column("id", Expr::literal(1_i64)),
            Err(CoreError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn filter_and_head_compose() {
        let (engine, block) = fixture();
        let val = block.value_column("val").expect("val").expr().clone();
        let mask = Expr::binary(BinaryOp::Gt, val, Expr::literal(10_i64)).expect("gt");
        let frame = block
            .filter(&mask)
            .expect("filter")
            .head(1)
            .expect("head")
            .compute(&engine, None)
            .expect("compute");
        assert_eq!(values(&frame, "val"), vec![Scalar::Int64(20)]);
        assert_eq!(frame.index().labels(), &[IndexLabel::from(2)]);
    }

    #[test]
    fn pandas_modulo_and_floor_division_survive_the_engine() {
        let table = RealizedTable::from_pairs([
            ("x", ints(&[7, -7, 7, 5])),
            ("y", ints(&[-2, 2, 0, 0])),
        ])
        .expect("table");
        let engine = LocalEngine::new().with_table(TableId::new("p", "d", "m"), table);
        let block = Block::new(bind(&engine, "m"), Vec::new()).expect("block");
        let x = block.value_column("x").expect("x").expr().clone();
        let y = block.value_column("y").expect("y").expr().clone();
        let frame = block
            .copy(Some(vec![
                ColumnExpr::new("mod", mod_op(&x, &y).expect("mod")),
                ColumnExpr::new("floordiv", floordiv_op(&x, &y).expect("floordiv")),
            ]))
            .expect("copy")
            .compute(&engine, None)
            .expect("compute");
        assert_eq!(
            values(&frame, "mod"),
            vec![Scalar::Int64(-1), Scalar::Int64(1), Scalar::Int64(0), Scalar::Int64(0)]
        );
        assert_eq!(
            values(&frame, "floordiv"),
            vec![Scalar::Int64(-4), Scalar::Int64(-4), Scalar::Int64(0), Scalar::Int64(0)]
        );
        assert_eq!(frame.index(), &Index::range(4));
    }

    #[test]
    fn all_and_any_over_no_rows_return_identities() {
        let (engine, block) = fixture();
        let val = block.value_column("val").expect("val").expr().clone();
        let none = Expr::binary(BinaryOp::Gt, val, Expr::literal(100_i64)).expect("gt");
        let empty = block.filter(&none).expect("filter");
        let all = empty
            .aggregate(None, &[("val", AggregateOp::All)], false)
            .expect("all")
            .compute(&engine, None)
            .expect("compute");
        let any = empty
            .aggregate(None, &[("val", AggregateOp::Any)], false)
            .expect("any")
            .compute(&engine, None)
            .expect("compute");
        assert_eq!(values(&all, "val"), vec![Scalar::Bool(true)]);
        assert_eq!(values(&any, "val"), vec![Scalar::Bool(false)]);
    }

    #[test]
    fn non_numeric_aggregation_fails_before_any_query() {
        let table = RealizedTable::from_pairs([(
            "name",
            column(vec![Scalar::from("a"), Scalar::from("b")]),
        )])
        .expect("table");
        let engine = LocalEngine::new().with_table(TableId::new("p", "d", "s"), table);
        let block = Block::new(bind(&engine, "s"), Vec::new()).expect("block");
        let err = block
            .aggregate(None, &[("name", AggregateOp::Sum)], false)
            .expect_err("non numeric");
        assert!(matches!(err, CoreError::Op(_)));
        assert_eq!(engine.query_count(), 0);
    }

    #[test]
    fn groupby_sorts_keys_and_drops_null_key() {
        let table = RealizedTable::from_pairs([
            (
                "k",
                Column::new(
                    DType::Utf8,
                    vec![Scalar::from("b"), Scalar::NULL, Scalar::from("a"), Scalar::from("b")],
                )
                .expect("k"),
            ),
            ("v", ints(&[1, 2, 3, 4])),
        ])
        .expect("table");
        let engine = LocalEngine::new().with_table(TableId::new("p", "d", "g"), table);
        let block = Block::new(bind(&engine, "g"), Vec::new()).expect("block");
        let frame = block
            .aggregate(Some("k"), &[("v", AggregateOp::Sum)], true)
            .expect("groupby")
            .compute(&engine, None)
            .expect("compute");
        assert_eq!(values(&frame, "v"), vec![Scalar::Int64(3), Scalar::Int64(5)]);
        assert_eq!(
            frame.index().labels(),
            &[IndexLabel::from("a"), IndexLabel::from("b")]
        );
        assert_eq!(frame.index().name(), Some("k"));
    }

    #[test]
    fn rolling_mean_honours_min_periods() {
        let (engine, block) = fixture();
        let block = block
            .order_by(&[OrderingColumnReference::asc("id")])
            .expect("order");
        let spec = WindowSpec::rolling(2, None).expect("spec");
        let frame = block
            .apply_window_op("val", WindowOp::Aggregate(AggregateOp::Mean), &spec, "avg")
            .expect("rolling")
            .compute(&engine, Some(&["avg"][..]))
            .expect("compute");
        assert_eq!(
            values(&frame, "avg"),
            vec![
                Scalar::Null(lf_types::NullKind::NaN),
                Scalar::Float64(15.0),
                Scalar::Float64(25.0)
            ]
        );
    }

    #[test]
    fn reset_index_moves_labels_into_values() {
        let (engine, block) = fixture();
        let reset = block.reset_index().expect("reset");
        assert!(reset.index().is_implicit());
        assert_eq!(reset.value_column_names(), vec!["id", "val"]);

        let numbered = reset
            .order_by(&[OrderingColumnReference::desc("val")])
            .expect("order")
            .set_index("val")
            .expect("set_index")
            .reset_index()
            .expect("reset");
        assert_eq!(numbered.value_column_names(), vec!["val", "id"]);

        let positional = reset.reset_index().expect("second reset");
        let frame = positional.compute(&engine, None).expect("compute");
        assert_eq!(
            values(&frame, "index"),
            vec![Scalar::Int64(0), Scalar::Int64(1), Scalar::Int64(2)]
        );
    }

    #[test]
    fn alignment_requires_identical_rows() {
        let (engine, block) = fixture();
        let same = block.copy(None).expect("copy");
        let aligned = block.align_column(&same, "val").expect("aligned");
        assert!(aligned.ptr_eq(block.value_column("val").expect("val").expr()));

        let other = Block::new(bind(&engine, "t"), vec!["id".to_owned()]).expect("other");
        let err = block.align_column(&other, "val").expect_err("different relation");
        assert!(matches!(err, CoreError::NotImplemented(_)));
    }
}
