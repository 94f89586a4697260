//! The immutable logical plan.
//!
//! An [`ExpressionTree`] is a single `SELECT`: a source relation (a bound base
//! table or another tree used as a sub-select), a flat list of named column
//! expressions over that source, and optional predicates, grouping, ordering
//! and row limit. Transformations return new trees that share every unchanged
//! expression node with their parent.

use std::collections::BTreeSet;
use std::sync::Arc;

use lf_columnar::RealizedTable;
use lf_expr::sql::{
    SelectSql, quote_identifier, render_expr, render_expr_qualified, render_sort_qualified,
    table_reference,
};
use lf_expr::{
    BaseTableRef, ColumnExpr, Expr, ExprError, ORDERING_ID_COLUMN, QueryRef, RelationId, SortExpr,
    WindowClause, WindowFunc, is_reserved,
};
use lf_types::{DType, common_dtype};

use crate::CoreError;
use crate::client::{QueryClient, QueryJob};

const STAGE_PREFIX: &str = "_lf_stage_";
const HIDDEN_ORDER_PREFIX: &str = "_lf_order_";
/// Which input of a `UNION ALL` a row came from.
pub const UNION_PART_COLUMN: &str = "_lf_union_part";
/// Row position within its `UNION ALL` input.
pub const UNION_ROW_COLUMN: &str = "_lf_union_row";

#[derive(Debug, Clone)]
pub enum Source {
    Table(BaseTableRef),
    Query(QueryRef),
    Subquery(ExpressionTree),
    /// `UNION ALL` of trees projecting the same column names and types.
    Union(Vec<ExpressionTree>),
}

#[derive(Debug, Clone)]
struct TreeNode {
    source: Source,
    relation: RelationId,
    columns: Vec<ColumnExpr>,
    predicates: Vec<Expr>,
    group_by: Vec<Expr>,
    grouped: bool,
    ordering: Vec<SortExpr>,
    limit: Option<u64>,
}

/// Immutable plan node. Cloning is a reference-count bump.
#[derive(Debug, Clone)]
pub struct ExpressionTree {
    node: Arc<TreeNode>,
}

/// A tree lowered to engine SQL, together with the plan it came from.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    sql: String,
    output_columns: Vec<String>,
    plan: ExpressionTree,
}

impl CompiledQuery {
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    #[must_use]
    pub fn plan(&self) -> &ExpressionTree {
        &self.plan
    }
}

fn fresh_name(prefix: &str, columns: &[ColumnExpr]) -> String {
    let mut counter = 0_usize;
    loop {
        let candidate = format!("{prefix}{counter}");
        if !columns.iter().any(|column| column.name() == candidate) {
            return candidate;
        }
        counter += 1;
    }
}

impl ExpressionTree {
    /// Bind `table`. Without `columns`, every schema column is bound in the
    /// table's native order.
    pub fn new(table: BaseTableRef, columns: Option<Vec<ColumnExpr>>) -> Result<Self, CoreError> {
        let columns = columns.unwrap_or_else(|| table.columns());
        let relation = table.relation();
        Self::over(Source::Table(table), relation, columns)
    }

    /// Bind the result of a raw SQL query, every reported column included.
    pub fn from_query(query: QueryRef) -> Result<Self, CoreError> {
        let columns = query.columns();
        let relation = query.relation();
        Self::over(Source::Query(query), relation, columns)
    }

    fn over(source: Source, relation: RelationId, columns: Vec<ColumnExpr>) -> Result<Self, CoreError> {
        let empty = Self::from_node(TreeNode {
            source,
            relation,
            columns: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            grouped: false,
            ordering: Vec::new(),
            limit: None,
        });
        empty.projection(columns)
    }

    fn from_node(node: TreeNode) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    fn derive(&self, edit: impl FnOnce(&mut TreeNode)) -> Self {
        let mut node = (*self.node).clone();
        edit(&mut node);
        Self::from_node(node)
    }

    /// Whether both handles point at the same plan node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    #[must_use]
    pub fn source(&self) -> &Source {
        &self.node.source
    }

    /// The base table at the bottom of any sub-select chain. `None` when
    /// the rows come from a raw query or a union.
    #[must_use]
    pub fn base_table(&self) -> Option<&BaseTableRef> {
        match &self.node.source {
            Source::Table(table) => Some(table),
            Source::Subquery(inner) => inner.base_table(),
            Source::Query(_) | Source::Union(_) => None,
        }
    }

    /// The relation every column of this tree reads from.
    #[must_use]
    pub fn relation(&self) -> RelationId {
        self.node.relation
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnExpr] {
        &self.node.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.node.columns.iter().map(ColumnExpr::name).collect()
    }

    #[must_use]
    pub fn contains_column(&self, name: &str) -> bool {
        self.node.columns.iter().any(|column| column.name() == name)
    }

    pub fn get_column(&self, name: &str) -> Result<&ColumnExpr, CoreError> {
        self.node
            .columns
            .iter()
            .find(|column| column.name() == name)
            .ok_or_else(|| CoreError::UnknownColumn(name.to_owned()))
    }

    #[must_use]
    pub fn predicates(&self) -> &[Expr] {
        &self.node.predicates
    }

    #[must_use]
    pub fn group_by(&self) -> &[Expr] {
        &self.node.group_by
    }

    #[must_use]
    pub fn is_grouped(&self) -> bool {
        self.node.grouped
    }

    #[must_use]
    pub fn ordering(&self) -> &[SortExpr] {
        &self.node.ordering
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.node.limit
    }

    fn check_provenance(&self, name: &str, expr: &Expr) -> Result<(), CoreError> {
        if expr
            .relations()
            .iter()
            .all(|relation| *relation == self.node.relation)
        {
            Ok(())
        } else {
            Err(CoreError::ForeignColumn {
                column: name.to_owned(),
            })
        }
    }

    /// New tree over the same source with exactly `columns`.
    pub fn projection(&self, columns: Vec<ColumnExpr>) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        for column in &columns {
            if !seen.insert(column.name()) {
                return Err(CoreError::DuplicateColumn(column.name().to_owned()));
            }
            self.check_provenance(column.name(), column.expr())?;
        }
        Ok(self.derive(|node| node.columns = columns))
    }

    /// Replace same-named columns in place and append the rest.
    pub fn with_columns(&self, columns: Vec<ColumnExpr>) -> Result<Self, CoreError> {
        let mut out = self.node.columns.clone();
        for column in columns {
            match out.iter().position(|existing| existing.name() == column.name()) {
                Some(position) => out[position] = column,
                None => out.push(column),
            }
        }
        self.projection(out)
    }

    pub fn drop_columns(&self, names: &[&str]) -> Result<Self, CoreError> {
        let kept = self
            .node
            .columns
            .iter()
            .filter(|column| !names.contains(&column.name()))
            .cloned()
            .collect();
        self.projection(kept)
    }

    /// Whether a filter, window or aggregate stacked on this tree must first
    /// wrap it as a sub-select to keep pandas' order of evaluation.
    #[must_use]
    pub fn needs_promotion(&self) -> bool {
        self.node.limit.is_some()
            || self.node.grouped
            || self
                .node
                .columns
                .iter()
                .any(|column| column.expr().contains_window())
            || self
                .node
                .ordering
                .iter()
                .any(|sort| sort.expr.contains_window())
    }

    /// Whether a window over `inputs` stacked on this tree must first wrap
    /// it as a sub-select. Windows over plain columns share the select list
    /// with windows already there.
    #[must_use]
    pub fn needs_promotion_for(&self, inputs: &[&Expr]) -> bool {
        self.node.limit.is_some()
            || self.node.grouped
            || inputs.iter().any(|expr| expr.contains_window())
    }

    /// Wrap this tree as a sub-select. The outer tree exposes the same column
    /// names as plain references and keeps the row order; ordering keys that
    /// are not already columns travel as hidden `_lf_order_<n>` columns.
    #[must_use]
    pub fn to_subquery(&self) -> Self {
        let mut inner_columns = self.node.columns.clone();
        let mut order_names = Vec::with_capacity(self.node.ordering.len());
        for sort in &self.node.ordering {
            let existing = inner_columns
                .iter()
                .find(|column| column.expr().ptr_eq(&sort.expr) || *column.expr() == sort.expr)
                .map(|column| column.name().to_owned());
            let name = existing.unwrap_or_else(|| {
                let name = fresh_name(HIDDEN_ORDER_PREFIX, &inner_columns);
                inner_columns.push(ColumnExpr::new(&name, sort.expr.clone()));
                name
            });
            order_names.push(name);
        }

        let inner = self.derive(|node| node.columns = inner_columns);
        let relation = RelationId::fresh();
        let columns = self
            .node
            .columns
            .iter()
            .map(|column| {
                ColumnExpr::new(
                    column.name(),
                    Expr::column(relation, column.name(), column.dtype()),
                )
            })
            .collect();
        let ordering = self
            .node
            .ordering
            .iter()
            .zip(&order_names)
            .map(|(sort, name)| SortExpr {
                expr: Expr::column(relation, name, sort.expr.dtype()),
                direction: sort.direction,
                nulls_last: sort.nulls_last,
            })
            .collect();

        Self::from_node(TreeNode {
            source: Source::Subquery(inner),
            relation,
            columns,
            predicates: Vec::new(),
            group_by: Vec::new(),
            grouped: false,
            ordering,
            limit: None,
        })
    }

    /// Promote, carrying `exprs` through the sub-select as hidden columns.
    /// Returns the promoted tree (hidden columns excluded from its list) and
    /// references to each carried expression.
    fn promote_with(&self, exprs: &[Expr]) -> Result<(Self, Vec<Expr>), CoreError> {
        let mut staged = self.node.columns.clone();
        let mut names = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let name = fresh_name(STAGE_PREFIX, &staged);
            self.check_provenance(&name, expr)?;
            staged.push(ColumnExpr::new(&name, expr.clone()));
            names.push(name);
        }
        let promoted = self.projection(staged)?.to_subquery();
        let refs = names
            .iter()
            .map(|name| promoted.get_column(name).map(|column| column.expr().clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let hidden = names.iter().map(String::as_str).collect::<Vec<_>>();
        Ok((promoted.drop_columns(&hidden)?, refs))
    }

    /// Keep rows where `predicate` is TRUE.
    pub fn filter(&self, predicate: &Expr) -> Result<Self, CoreError> {
        if !matches!(predicate.dtype(), DType::Bool | DType::Null) {
            return Err(CoreError::InvalidArgument(format!(
                "filter predicate must be boolean, got {}",
                predicate.dtype()
            )));
        }
        if predicate.contains_aggregate() {
            return Err(CoreError::InvalidArgument(
                "filter predicate cannot contain an aggregate".to_owned(),
            ));
        }
        self.check_provenance("<predicate>", predicate)?;

        if self.needs_promotion() || predicate.contains_window() {
            let (promoted, refs) = self.promote_with(std::slice::from_ref(predicate))?;
            let mask = refs.into_iter().next().ok_or_else(|| {
                CoreError::InvalidArgument("predicate was not carried".to_owned())
            })?;
            return promoted.filter(&mask);
        }
        Ok(self.derive(|node| node.predicates.push(predicate.clone())))
    }

    /// Sort by `keys`, breaking ties with the existing ordering.
    pub fn order_by(&self, keys: Vec<SortExpr>) -> Result<Self, CoreError> {
        if keys.is_empty() {
            return Ok(self.clone());
        }
        if self.node.limit.is_some() || self.node.grouped {
            let exprs = keys.iter().map(|key| key.expr.clone()).collect::<Vec<_>>();
            let (promoted, refs) = self.promote_with(&exprs)?;
            let keys = keys
                .into_iter()
                .zip(refs)
                .map(|(key, expr)| SortExpr { expr, ..key })
                .collect();
            return promoted.order_by(keys);
        }
        for key in &keys {
            self.check_provenance("<sort key>", &key.expr)?;
        }
        Ok(self.derive(|node| {
            let previous = std::mem::take(&mut node.ordering);
            node.ordering = keys;
            node.ordering.extend(previous);
        }))
    }

    /// Replace the ambient ordering outright.
    pub fn with_ordering(&self, ordering: Vec<SortExpr>) -> Result<Self, CoreError> {
        for key in &ordering {
            self.check_provenance("<sort key>", &key.expr)?;
        }
        Ok(self.derive(|node| node.ordering = ordering))
    }

    #[must_use]
    pub fn head(&self, n: u64) -> Self {
        self.derive(|node| node.limit = Some(node.limit.map_or(n, |limit| limit.min(n))))
    }

    /// Last `n` rows in the current order: limit under the reversed order,
    /// then restore the original direction one level up.
    #[must_use]
    pub fn tail(&self, n: u64) -> Self {
        let base = if self.node.limit.is_some() {
            self.to_subquery()
        } else {
            self.clone()
        };
        let reversed = base.derive(|node| {
            node.ordering = node.ordering.iter().map(SortExpr::reversed).collect();
            node.limit = Some(n);
        });
        reversed
            .to_subquery()
            .derive(|node| node.ordering = node.ordering.iter().map(SortExpr::reversed).collect())
    }

    /// Group by `keys` and compute `aggregates` per group. The result is
    /// already a sub-select ordered by the keys ascending; with no keys it is
    /// a single row.
    pub fn aggregate(
        &self,
        keys: Vec<ColumnExpr>,
        aggregates: Vec<ColumnExpr>,
    ) -> Result<Self, CoreError> {
        if self.needs_promotion() {
            return Err(CoreError::InvalidArgument(
                "aggregate over limited, grouped or windowed input needs to_subquery first"
                    .to_owned(),
            ));
        }
        if let Some(key) = keys.iter().find(|key| key.expr().contains_aggregate()) {
            return Err(CoreError::InvalidArgument(format!(
                "group key {:?} cannot contain an aggregate",
                key.name()
            )));
        }
        if let Some(column) = aggregates
            .iter()
            .find(|column| column.expr().contains_window() || !column.expr().contains_aggregate())
        {
            return Err(CoreError::InvalidArgument(format!(
                "column {:?} is not a plain aggregate",
                column.name()
            )));
        }

        let key_names = keys
            .iter()
            .map(|key| key.name().to_owned())
            .collect::<Vec<_>>();
        let group_by = keys.iter().map(|key| key.expr().clone()).collect();
        let mut columns = keys;
        columns.extend(aggregates);
        let grouped = self.projection(columns)?.derive(|node| {
            node.group_by = group_by;
            node.grouped = true;
            node.ordering.clear();
        });

        let promoted = grouped.to_subquery();
        let ordering = key_names
            .iter()
            .map(|name| {
                promoted
                    .get_column(name)
                    .map(|column| SortExpr::asc(column.expr().clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        promoted.with_ordering(ordering)
    }

    /// Add the reserved total-order column and make it the ambient ordering.
    ///
    /// Row numbers follow the existing ordering, or every visible column when
    /// there is none, and are promoted into a sub-select so later windows can
    /// reference them as a plain column.
    pub fn with_ordering_id(&self) -> Result<Self, CoreError> {
        let base = if self.needs_promotion() {
            self.to_subquery()
        } else {
            self.clone()
        };
        let order_by = if base.ordering().is_empty() {
            base.columns()
                .iter()
                .filter(|column| !is_reserved(column.name()))
                .map(|column| SortExpr::asc(column.expr().clone()))
                .collect()
        } else {
            base.ordering().to_vec()
        };
        let row_number = Expr::window(
            WindowFunc::RowNumber,
            Vec::new(),
            WindowClause {
                order_by,
                ..WindowClause::default()
            },
        )?;
        let promoted = base
            .with_columns(vec![ColumnExpr::new(ORDERING_ID_COLUMN, row_number)])?
            .derive(|node| node.ordering.clear())
            .to_subquery();
        let key = promoted.get_column(ORDERING_ID_COLUMN)?.expr().clone();
        promoted.with_ordering(vec![SortExpr::asc(key)])
    }

    /// Stack `parts` with `UNION ALL`.
    ///
    /// Every part must expose the same visible column names in the same
    /// order; types are promoted to a common type. Reserved columns are
    /// dropped. Rows keep their order within each part, parts follow each
    /// other, and the result carries hidden part and row columns that make
    /// that order its ambient ordering.
    pub fn union_all(parts: &[Self]) -> Result<Self, CoreError> {
        let [first, rest @ ..] = parts else {
            return Err(CoreError::InvalidArgument(
                "union needs at least one input".to_owned(),
            ));
        };
        let visible = |tree: &Self| {
            tree.columns()
                .iter()
                .filter(|column| !is_reserved(column.name()))
                .cloned()
                .collect::<Vec<_>>()
        };
        let head = visible(first);
        let mut dtypes = head.iter().map(ColumnExpr::dtype).collect::<Vec<_>>();
        for part in rest {
            let columns = visible(part);
            if columns.iter().map(ColumnExpr::name).ne(head.iter().map(ColumnExpr::name)) {
                return Err(CoreError::InvalidArgument(format!(
                    "union inputs must share columns: {:?} vs {:?}",
                    head.iter().map(ColumnExpr::name).collect::<Vec<_>>(),
                    columns.iter().map(ColumnExpr::name).collect::<Vec<_>>(),
                )));
            }
            for (dtype, column) in dtypes.iter_mut().zip(&columns) {
                *dtype = common_dtype(*dtype, column.dtype()).map_err(ExprError::from)?;
            }
        }

        let mut inputs = Vec::with_capacity(parts.len());
        for (position, part) in parts.iter().enumerate() {
            let base = if part.needs_promotion() {
                part.to_subquery()
            } else {
                part.clone()
            };
            let order_by = if base.ordering().is_empty() {
                visible(&base)
                    .iter()
                    .map(|column| SortExpr::asc(column.expr().clone()))
                    .collect()
            } else {
                base.ordering().to_vec()
            };
            let mut columns = visible(&base)
                .into_iter()
                .zip(&dtypes)
                .map(|(column, dtype)| {
                    if column.dtype() == *dtype {
                        column
                    } else {
                        ColumnExpr::new(column.name(), Expr::cast(column.expr().clone(), *dtype))
                    }
                })
                .collect::<Vec<_>>();
            columns.push(ColumnExpr::new(
                UNION_PART_COLUMN,
                Expr::literal(i64::try_from(position).unwrap_or(i64::MAX)),
            ));
            columns.push(ColumnExpr::new(
                UNION_ROW_COLUMN,
                Expr::window(
                    WindowFunc::RowNumber,
                    Vec::new(),
                    WindowClause {
                        order_by,
                        ..WindowClause::default()
                    },
                )?,
            ));
            inputs.push(base.projection(columns)?);
        }

        let relation = RelationId::fresh();
        let columns = inputs[0]
            .columns()
            .iter()
            .map(|column| {
                ColumnExpr::new(
                    column.name(),
                    Expr::column(relation, column.name(), column.dtype()),
                )
            })
            .collect::<Vec<_>>();
        let ordering = [UNION_PART_COLUMN, UNION_ROW_COLUMN]
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .find(|column| column.name() == *name)
                    .map(|column| SortExpr::asc(column.expr().clone()))
                    .ok_or_else(|| CoreError::UnknownColumn((*name).to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_node(TreeNode {
            source: Source::Union(inputs),
            relation,
            columns,
            predicates: Vec::new(),
            group_by: Vec::new(),
            grouped: false,
            ordering,
            limit: None,
        }))
    }

    /// Same source rows: same relation, filters, grouping and limit.
    #[must_use]
    pub fn same_rows(&self, other: &Self) -> bool {
        self.node.relation == other.node.relation
            && self.node.predicates == other.node.predicates
            && self.node.grouped == other.node.grouped
            && self.node.limit == other.node.limit
    }

    fn select_sql(&self, depth: usize, top_level: bool) -> SelectSql {
        let alias = format!("t{depth}");
        let source = match &self.node.source {
            Source::Table(table) => table_reference(table.id()),
            Source::Query(query) => format!("(\n{}\n)", query.sql()),
            Source::Subquery(inner) => {
                format!("(\n{}\n)", inner.select_sql(depth + 1, false).render())
            }
            Source::Union(parts) => {
                let parts = parts
                    .iter()
                    .map(|part| part.select_sql(depth + 1, false).render())
                    .collect::<Vec<_>>();
                format!("(\n{}\n)", parts.join("\nUNION ALL\n"))
            }
        };
        let order_by = if top_level || self.node.limit.is_some() {
            self.node
                .ordering
                .iter()
                .map(|sort| render_sort_qualified(sort, &alias))
                .collect()
        } else {
            Vec::new()
        };

        SelectSql {
            items: self
                .node
                .columns
                .iter()
                .map(|column| (render_expr(column.expr()), column.name().to_owned()))
                .collect(),
            from: format!("{source} AS {}", quote_identifier(&alias)),
            predicates: self.node.predicates.iter().map(render_expr).collect(),
            group_by: self
                .node
                .group_by
                .iter()
                .map(|key| render_expr_qualified(key, &alias))
                .collect(),
            order_by,
            limit: self.node.limit,
        }
    }

    /// Lower to SQL. Pure: an unchanged tree always compiles to the same text.
    #[must_use]
    pub fn to_compiled_query(&self) -> CompiledQuery {
        CompiledQuery {
            sql: self.select_sql(0, true).render(),
            output_columns: self
                .node
                .columns
                .iter()
                .map(|column| column.name().to_owned())
                .collect(),
            plan: self.clone(),
        }
    }

    pub fn start_query(&self, client: &dyn QueryClient) -> Result<Box<dyn QueryJob>, CoreError> {
        if self.node.columns.is_empty() {
            return Err(CoreError::InvalidArgument(
                "cannot run a query that selects no columns".to_owned(),
            ));
        }
        let compiled = self.to_compiled_query();
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %compiled.sql(), "starting query");
        Ok(client.submit(&compiled)?)
    }

    /// Run the query and return its rows with columns in list order. The only
    /// place a tree triggers remote execution.
    pub fn materialize(&self, client: &dyn QueryClient) -> Result<RealizedTable, CoreError> {
        let job = self.start_query(client)?;
        let table = job.wait()?;
        let expected = self.column_names();
        if table.names().iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(CoreError::InvalidArgument(format!(
                "engine returned columns {:?}, expected {expected:?}",
                table.names()
            )));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(rows = table.num_rows(), "materialized query");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use lf_expr::{
        BaseTableRef, BinaryOp, ColumnExpr, Expr, Field, ORDERING_ID_COLUMN, QueryRef, Schema,
        SortExpr, TableId,
    };
    use lf_types::DType;

    use super::{ExpressionTree, Source, UNION_PART_COLUMN, UNION_ROW_COLUMN};
    use crate::CoreError;

    fn table() -> BaseTableRef {
        let schema = Schema::new(vec![
            Field::new("id", DType::Int64),
            Field::new("val", DType::Int64),
        ])
        .expect("schema");
        BaseTableRef::bind(TableId::new("p", "d", "t"), schema)
    }

    #[test]
    fn construct_binds_all_columns_in_native_order() {
        let tree = ExpressionTree::new(table(), None).expect("tree");
        assert_eq!(tree.column_names(), vec!["id", "val"]);
        assert!(matches!(tree.source(), Source::Table(_)));
    }

    #[test]
    fn construct_rejects_columns_from_another_table() {
        let other = table();
        let foreign = other.column("id").expect("id");
        let err = ExpressionTree::new(table(), Some(vec![foreign])).expect_err("foreign");
        assert_eq!(
            err,
            CoreError::ForeignColumn {
                column: "id".to_owned()
            }
        );
    }

    #[test]
    fn projection_is_non_mutating_and_keeps_supplied_nodes() {
        let tree = ExpressionTree::new(table(), None).expect("tree");
        let doubled = ColumnExpr::new(
            "double",
            Expr::binary(
                BinaryOp::Mul,
                tree.get_column("val").expect("val").expr().clone(),
                Expr::literal(2_i64),
            )
            .expect("mul"),
        );
        let projected = tree.projection(vec![doubled.clone()]).expect("projection");

        assert_eq!(tree.column_names(), vec!["id", "val"]);
        assert_eq!(tree.relation(), projected.relation());
        assert!(projected.get_column("double").expect("double").same_as(&doubled));
        assert!(matches!(
            projected.get_column("val"),
            Err(CoreError::UnknownColumn(_))
        ));
    }

    #[test]
    fn projection_rejects_duplicate_names() {
        let tree = ExpressionTree::new(table(), None).expect("tree");
        let id = tree.get_column("id").expect("id").clone();
        let err = tree
            .projection(vec![id.clone(), id])
            .expect_err("duplicate");
        assert_eq!(err, CoreError::DuplicateColumn("id".to_owned()));
    }

    #[test]
    fn compilation_is_deterministic() {
        let tree = ExpressionTree::new(table(), None)
            .expect("tree")
            .with_ordering_id()
            .expect("ordering");
        let first = tree.to_compiled_query();
        let second = tree.to_compiled_query();
        assert_eq!(first.sql(), second.sql());
        assert_eq!(
            first.sql(),
            "SELECT `id`, `val`, `_lf_ordering_id`\n\
             FROM (\n\
             SELECT `id`, `val`, ROW_NUMBER() OVER (ORDER BY `id` ASC NULLS LAST, `val` ASC NULLS LAST) AS `_lf_ordering_id`\n\
             FROM `p.d.t` AS `t1`\n\
             ) AS `t0`\n\
             ORDER BY `t0`.`_lf_ordering_id` ASC NULLS LAST"
        );
        assert_eq!(first.output_columns(), &["id", "val", ORDERING_ID_COLUMN]);
    }

    #[test]
    fn filter_after_head_promotes_into_subselect() {
        let tree = ExpressionTree::new(table(), None)
            .expect("tree")
            .with_ordering_id()
            .expect("ordering")
            .head(2);
        let val = tree.get_column("val").expect("val").expr().clone();
        let predicate = Expr::binary(BinaryOp::Gt, val, Expr::literal(10_i64)).expect("gt");
        let filtered = tree.filter(&predicate).expect("filter");

        assert!(matches!(filtered.source(), Source::Subquery(_)));
        assert_eq!(filtered.limit(), None);
        assert_eq!(filtered.column_names(), vec!["id", "val", ORDERING_ID_COLUMN]);
        let sql = filtered.to_compiled_query().sql().to_owned();
        assert!(sql.contains("LIMIT 2"));
        assert!(sql.contains("WHERE `_lf_stage_0`"));
    }

    #[test]
    fn filter_rejects_non_boolean_predicates() {
        let tree = ExpressionTree::new(table(), None).expect("tree");
        let val = tree.get_column("val").expect("val").expr().clone();
        assert!(matches!(
            tree.filter(&val),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn hidden_ordering_columns_stay_out_of_the_column_list() {
        let tree = ExpressionTree::new(table(), None).expect("tree");
        let key = Expr::binary(
            BinaryOp::Sub,
            Expr::literal(0_i64),
            tree.get_column("val").expect("val").expr().clone(),
        )
        .expect("neg");
        let ordered = tree.order_by(vec![SortExpr::asc(key)]).expect("order");
        let promoted = ordered.to_subquery();
        assert_eq!(promoted.column_names(), vec!["id", "val"]);
        let sql = promoted.to_compiled_query().sql().to_owned();
        assert!(sql.contains("AS `_lf_order_0`"));
        assert!(sql.ends_with("ORDER BY `t0`.`_lf_order_0` ASC NULLS LAST"));
    }

    #[test]
    fn tail_restores_original_direction_above_the_limit() {
        let tree = ExpressionTree::new(table(), None)
            .expect("tree")
            .with_ordering_id()
            .expect("ordering")
            .tail(1);
        let sql = tree.to_compiled_query().sql().to_owned();
        assert!(sql.contains("DESC NULLS FIRST\nLIMIT 1"));
        assert!(sql.ends_with("ASC NULLS LAST"));
    }

    #[test]
    fn aggregate_requires_promotion_of_limited_input() {
        let tree = ExpressionTree::new(table(), None).expect("tree").head(3);
        let count = ColumnExpr::new(
            "n",
            Expr::aggregate(lf_expr::AggregateFunc::CountStar, None).expect("count"),
        );
        assert!(matches!(
            tree.aggregate(Vec::new(), vec![count.clone()]),
            Err(CoreError::InvalidArgument(_))
        ));
        let grouped = tree
            .to_subquery()
            .aggregate(Vec::new(), vec![count])
            .expect("aggregate");
        assert!(grouped.ordering().is_empty());
    }

    #[test]
    fn same_rows_tracks_relation_and_filters() {
        let tree = ExpressionTree::new(table(), None).expect("tree");
        let projected = tree
            .projection(vec![tree.get_column("val").expect("val").clone()])
            .expect("projection");
        assert!(tree.same_rows(&projected));
        let val = tree.get_column("val").expect("val").expr().clone();
        let filtered = tree
            .filter(&Expr::binary(BinaryOp::Gt, val, Expr::literal(1_i64)).expect("gt"))
            .expect("filter");
        assert!(!tree.same_rows(&filtered));
        assert!(!tree.same_rows(&tree.to_subquery()));
    }

    #[test]
    fn raw_query_nests_as_a_subselect() {
        let schema = Schema::new(vec![Field::new("x", DType::Int64)]).expect("schema");
        let tree = ExpressionTree::from_query(QueryRef::bind("SELECT 1 AS x;", schema))
            .expect("tree");
        assert!(matches!(tree.source(), Source::Query(_)));
        assert!(tree.base_table().is_none());
        let compiled = tree.to_compiled_query();
        assert!(compiled.sql().contains("FROM (\nSELECT 1 AS x\n) AS `t0`"));
    }

    #[test]
    fn union_all_stacks_parts_under_one_subselect() {
        let first = ExpressionTree::new(table(), None).expect("first");
        let second = ExpressionTree::new(table(), None).expect("second");
        let union = ExpressionTree::union_all(&[first.clone(), second]).expect("union");
        assert_eq!(
            union.column_names(),
            vec!["id", "val", UNION_PART_COLUMN, UNION_ROW_COLUMN]
        );
        assert_eq!(union.ordering().len(), 2);
        let compiled = union.to_compiled_query();
        assert_eq!(compiled.sql().matches("UNION ALL").count(), 1);
        assert_eq!(compiled.sql().matches("FROM (").count(), 1);
        assert!(compiled.sql().contains("ORDER BY `t0`.`_lf_union_part` ASC"));
    }

    #[test]
    fn union_all_promotes_types_and_checks_columns() {
        let schema = Schema::new(vec![
            Field::new("id", DType::Int64),
            Field::new("val", DType::Float64),
        ])
        .expect("schema");
        let floats = ExpressionTree::new(BaseTableRef::bind(TableId::new("p", "d", "f"), schema), None)
            .expect("floats");
        let ints = ExpressionTree::new(table(), None).expect("ints");
        let union = ExpressionTree::union_all(&[ints.clone(), floats]).expect("union");
        assert_eq!(union.get_column("val").expect("val").dtype(), DType::Float64);
        assert!(union.to_compiled_query().sql().contains("CAST("));

        let narrow = ints
            .projection(vec![ints.get_column("val").expect("val").clone()])
            .expect("narrow");
        assert!(matches!(
            ExpressionTree::union_all(&[ints, narrow]),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            ExpressionTree::union_all(&[]),
            Err(CoreError::InvalidArgument(_))
        ));
    }
}
