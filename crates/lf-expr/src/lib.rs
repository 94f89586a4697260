#![forbid(unsafe_code)]

//! Column expressions for lazily compiled queries.
//!
//! An [`Expr`] is a reference-counted node: cloning, renaming, or projecting
//! an expression never copies its sub-structure, so many plans can share the
//! same base-column references.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lf_types::{DType, Scalar, TypeError, common_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod naming;
pub mod sql;
pub mod window;

pub use naming::{
    IdGenerator, ORDERING_ID_COLUMN, RESERVED_PREFIX, StandardizedIds, UNNAMED_COLUMN_ID,
    UNNAMED_INDEX_ID, global_ids, is_reserved, standardize_ids,
};
pub use window::{OrderingColumnReference, OrderingDirection, WindowSpec};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("table id {0:?} must have exactly three parts: project.dataset.table")]
    MalformedTableId(String),
    #[error("operator {op} cannot be applied to dtype {dtype:?}")]
    InvalidOperand { op: &'static str, dtype: DType },
    #[error("invalid expression: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Identity of one relation a column can be read from: a bound base table
/// or a composed sub-select. Two bindings of the same table get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(u64);

impl RelationId {
    #[must_use]
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl FromStr for TableId {
    type Err = ExprError;

    /// Accepts `project.dataset.table` and the legacy `project:dataset.table`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.replace(':', ".");
        let parts = normalized.split('.').collect::<Vec<_>>();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(*project, *dataset, *table))
            }
            _ => Err(ExprError::MalformedTableId(raw.to_owned())),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, ExprError> {
        let mut seen = BTreeSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ExprError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Handle to a remote relation with a known schema.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseTableRef {
    id: TableId,
    schema: Schema,
    relation: RelationId,
}

impl BaseTableRef {
    #[must_use]
    pub fn bind(id: TableId, schema: Schema) -> Self {
        Self {
            id,
            schema,
            relation: RelationId::fresh(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &TableId {
        &self.id
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn column(&self, name: &str) -> Result<ColumnExpr, ExprError> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| ExprError::UnknownColumn(name.to_owned()))?;
        Ok(ColumnExpr::new(
            &field.name,
            Expr::column(self.relation, &field.name, field.dtype),
        ))
    }

    /// Every schema column, in the table's native order.
    #[must_use]
    pub fn columns(&self) -> Vec<ColumnExpr> {
        bound_columns(&self.schema, self.relation)
    }
}

fn bound_columns(schema: &Schema, relation: RelationId) -> Vec<ColumnExpr> {
    schema
        .fields()
        .iter()
        .map(|field| ColumnExpr::new(&field.name, Expr::column(relation, &field.name, field.dtype)))
        .collect()
}

/// Handle to the result of a raw SQL query, with the schema the engine
/// reported for it. The text is embedded verbatim as a sub-select.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRef {
    sql: String,
    schema: Schema,
    relation: RelationId,
}

impl QueryRef {
    /// Trailing semicolons and surrounding whitespace are dropped so the
    /// text nests inside parentheses.
    #[must_use]
    pub fn bind(sql: &str, schema: Schema) -> Self {
        Self {
            sql: sql.trim().trim_end_matches(';').trim_end().to_owned(),
            schema,
            relation: RelationId::fresh(),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn relation(&self) -> RelationId {
        self.relation
    }

    #[must_use]
    pub fn columns(&self) -> Vec<ColumnExpr> {
        bound_columns(&self.schema, self.relation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
    Neg,
    Not,
    IsNull,
    NotNull,
    Length,
    Reverse,
}

impl UnaryOp {
    fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Neg => "neg",
            Self::Not => "not",
            Self::IsNull => "isnull",
            Self::NotNull => "notnull",
            Self::Length => "len",
            Self::Reverse => "reverse",
        }
    }
}

/// Engine-native binary operators. Pandas corrections live in `lf-ops`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::FloorDiv => "floordiv",
            Self::Mod => "mod",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::And => "and",
            Self::Or => "or",
        }
    }

    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    CountStar,
    LogicalAnd,
    LogicalOr,
}

impl AggregateFunc {
    fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::CountStar => "count_star",
            Self::LogicalAnd => "logical_and",
            Self::LogicalOr => "logical_or",
        }
    }

    fn output_dtype(self, input: Option<DType>) -> Result<DType, ExprError> {
        match (self, input) {
            (Self::CountStar, _) | (Self::Count, Some(_)) => Ok(DType::Int64),
            (Self::Sum, Some(DType::Null | DType::Bool | DType::Int64)) => Ok(DType::Int64),
            (Self::Sum, Some(DType::Float64)) | (Self::Mean, Some(DType::Null)) => {
                Ok(DType::Float64)
            }
            (Self::Mean, Some(dtype)) if dtype.is_numeric() => Ok(DType::Float64),
            (Self::Min | Self::Max, Some(dtype)) => Ok(dtype),
            (Self::LogicalAnd | Self::LogicalOr, Some(DType::Bool | DType::Null)) => {
                Ok(DType::Bool)
            }
            (_, None) => Err(ExprError::InvalidArgument(format!(
                "aggregate {} requires an input column",
                self.name()
            ))),
            (_, Some(dtype)) => Err(ExprError::InvalidOperand {
                op: self.name(),
                dtype,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WindowFunc {
    Aggregate(AggregateFunc),
    RowNumber,
    Lag(u64),
    Lead(u64),
}

/// Row frame relative to the current row; `None` is unbounded in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WindowFrame {
    pub preceding: Option<u64>,
    pub following: Option<u64>,
}

impl WindowFrame {
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.preceding.is_none() && self.following.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: Expr,
    pub direction: OrderingDirection,
    pub nulls_last: bool,
}

impl SortExpr {
    #[must_use]
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderingDirection::Ascending,
            nulls_last: true,
        }
    }

    #[must_use]
    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderingDirection::Descending,
            nulls_last: true,
        }
    }

    /// Same key with the whole order flipped, nulls included.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            expr: self.expr.clone(),
            direction: self.direction.reversed(),
            nulls_last: !self.nulls_last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowClause {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<SortExpr>,
    pub frame: Option<WindowFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Column {
        relation: RelationId,
        name: String,
    },
    Literal(Scalar),
    Unary {
        op: UnaryOp,
        input: Expr,
    },
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        otherwise: Expr,
    },
    Coalesce(Vec<Expr>),
    Cast {
        input: Expr,
        to: DType,
    },
    Aggregate {
        func: AggregateFunc,
        input: Option<Expr>,
    },
    Window {
        func: WindowFunc,
        args: Vec<Expr>,
        over: WindowClause,
    },
}

#[derive(Debug, PartialEq)]
pub struct ExprNode {
    kind: ExprKind,
    dtype: DType,
}

/// Immutable, shareable expression node.
#[derive(Clone, PartialEq)]
pub struct Expr(Arc<ExprNode>);

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expr")
            .field("dtype", &self.0.dtype)
            .field("kind", &self.0.kind)
            .finish()
    }
}

impl Expr {
    fn from_parts(kind: ExprKind, dtype: DType) -> Self {
        Self(Arc::new(ExprNode { kind, dtype }))
    }

    #[must_use]
    pub fn column(relation: RelationId, name: impl Into<String>, dtype: DType) -> Self {
        Self::from_parts(
            ExprKind::Column {
                relation,
                name: name.into(),
            },
            dtype,
        )
    }

    #[must_use]
    pub fn literal(value: impl Into<Scalar>) -> Self {
        let value = value.into();
        let dtype = value.dtype();
        Self::from_parts(ExprKind::Literal(value), dtype)
    }

    /// A NULL literal that still carries a column type.
    #[must_use]
    pub fn typed_null(dtype: DType) -> Self {
        Self::from_parts(ExprKind::Literal(Scalar::NULL), dtype)
    }

    pub fn unary(op: UnaryOp, input: Expr) -> Result<Self, ExprError> {
        let dtype = input.dtype();
        let out = match op {
            UnaryOp::Abs | UnaryOp::Neg if dtype == DType::Bool => DType::Int64,
            UnaryOp::Abs | UnaryOp::Neg if dtype.is_numeric() || dtype == DType::Null => dtype,
            UnaryOp::Not if matches!(dtype, DType::Bool | DType::Null) => DType::Bool,
            UnaryOp::IsNull | UnaryOp::NotNull => DType::Bool,
            UnaryOp::Length if matches!(dtype, DType::Utf8 | DType::Null) => DType::Int64,
            UnaryOp::Reverse if matches!(dtype, DType::Utf8 | DType::Null) => DType::Utf8,
            _ => {
                return Err(ExprError::InvalidOperand {
                    op: op.name(),
                    dtype,
                });
            }
        };
        Ok(Self::from_parts(ExprKind::Unary { op, input }, out))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Result<Self, ExprError> {
        let (lt, rt) = (left.dtype(), right.dtype());
        let out = match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::FloorDiv
            | BinaryOp::Mod => {
                for dtype in [lt, rt] {
                    if !(dtype.is_numeric() || dtype == DType::Null) {
                        return Err(ExprError::InvalidOperand {
                            op: op.name(),
                            dtype,
                        });
                    }
                }
                let out = match (op, common_dtype(lt, rt)?) {
                    (BinaryOp::Div, _) => DType::Float64,
                    (_, DType::Bool | DType::Null) => DType::Int64,
                    (_, dtype) => dtype,
                };
                // the engine has no boolean arithmetic
                let left = if lt == DType::Bool {
                    Self::cast(left, DType::Int64)
                } else {
                    left
                };
                let right = if rt == DType::Bool {
                    Self::cast(right, DType::Int64)
                } else {
                    right
                };
                return Ok(Self::from_parts(ExprKind::Binary { op, left, right }, out));
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                common_dtype(lt, rt)?;
                DType::Bool
            }
            BinaryOp::And | BinaryOp::Or => {
                for dtype in [lt, rt] {
                    if !matches!(dtype, DType::Bool | DType::Null) {
                        return Err(ExprError::InvalidOperand {
                            op: op.name(),
                            dtype,
                        });
                    }
                }
                DType::Bool
            }
        };
        Ok(Self::from_parts(ExprKind::Binary { op, left, right }, out))
    }

    pub fn case(branches: Vec<(Expr, Expr)>, otherwise: Expr) -> Result<Self, ExprError> {
        if branches.is_empty() {
            return Err(ExprError::InvalidArgument(
                "CASE requires at least one WHEN branch".to_owned(),
            ));
        }
        let mut dtype = otherwise.dtype();
        for (condition, value) in &branches {
            if !matches!(condition.dtype(), DType::Bool | DType::Null) {
                return Err(ExprError::InvalidOperand {
                    op: "case",
                    dtype: condition.dtype(),
                });
            }
            dtype = common_dtype(dtype, value.dtype())?;
        }
        Ok(Self::from_parts(
            ExprKind::Case {
                branches,
                otherwise,
            },
            dtype,
        ))
    }

    pub fn coalesce(values: Vec<Expr>) -> Result<Self, ExprError> {
        let mut dtype = DType::Null;
        for value in &values {
            dtype = common_dtype(dtype, value.dtype())?;
        }
        if values.len() < 2 {
            return Err(ExprError::InvalidArgument(
                "COALESCE requires at least two arguments".to_owned(),
            ));
        }
        Ok(Self::from_parts(ExprKind::Coalesce(values), dtype))
    }

    #[must_use]
    pub fn cast(input: Expr, to: DType) -> Self {
        if input.dtype() == to {
            return input;
        }
        Self::from_parts(ExprKind::Cast { input, to }, to)
    }

    pub fn aggregate(func: AggregateFunc, input: Option<Expr>) -> Result<Self, ExprError> {
        let dtype = func.output_dtype(input.as_ref().map(Expr::dtype))?;
        Ok(Self::from_parts(ExprKind::Aggregate { func, input }, dtype))
    }

    pub fn window(func: WindowFunc, args: Vec<Expr>, over: WindowClause) -> Result<Self, ExprError> {
        let dtype = match func {
            WindowFunc::Aggregate(agg) => agg.output_dtype(args.first().map(Expr::dtype))?,
            WindowFunc::RowNumber => DType::Int64,
            WindowFunc::Lag(_) | WindowFunc::Lead(_) => args
                .first()
                .map(Expr::dtype)
                .ok_or_else(|| ExprError::InvalidArgument("LAG/LEAD requires input".into()))?,
        };
        if matches!(func, WindowFunc::RowNumber | WindowFunc::Lag(_) | WindowFunc::Lead(_))
            && over.frame.is_some()
        {
            return Err(ExprError::InvalidArgument(
                "navigation and numbering functions do not accept a row frame".to_owned(),
            ));
        }
        for arg in args.iter().chain(&over.partition_by) {
            if arg.contains_window() || arg.contains_aggregate() {
                return Err(ExprError::InvalidArgument(
                    "window arguments cannot nest analytic or aggregate functions".to_owned(),
                ));
            }
        }
        Ok(Self::from_parts(ExprKind::Window { func, args, over }, dtype))
    }

    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    /// Pointer identity, as opposed to structural `==`.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address of the shared node, used to key per-node caches.
    #[must_use]
    pub fn node_addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[must_use]
    pub fn as_column(&self) -> Option<(RelationId, &str)> {
        match self.kind() {
            ExprKind::Column { relation, name } => Some((*relation, name.as_str())),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_literal(&self) -> Option<&Scalar> {
        match self.kind() {
            ExprKind::Literal(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn children(&self) -> Vec<&Expr> {
        match self.kind() {
            ExprKind::Column { .. } | ExprKind::Literal(_) => Vec::new(),
            ExprKind::Unary { input, .. } | ExprKind::Cast { input, .. } => vec![input],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Case {
                branches,
                otherwise,
            } => branches
                .iter()
                .flat_map(|(condition, value)| [condition, value])
                .chain(std::iter::once(otherwise))
                .collect(),
            ExprKind::Coalesce(values) => values.iter().collect(),
            ExprKind::Aggregate { input, .. } => input.iter().collect(),
            ExprKind::Window { args, over, .. } => args
                .iter()
                .chain(&over.partition_by)
                .chain(over.order_by.iter().map(|sort| &sort.expr))
                .collect(),
        }
    }

    /// Every relation this expression reads from. Literals contribute none.
    #[must_use]
    pub fn relations(&self) -> BTreeSet<RelationId> {
        let mut out = BTreeSet::new();
        self.collect_relations(&mut out);
        out
    }

    fn collect_relations(&self, out: &mut BTreeSet<RelationId>) {
        if let Some((relation, _)) = self.as_column() {
            out.insert(relation);
        }
        for child in self.children() {
            child.collect_relations(out);
        }
    }

    #[must_use]
    pub fn contains_window(&self) -> bool {
        matches!(self.kind(), ExprKind::Window { .. })
            || self.children().into_iter().any(Expr::contains_window)
    }

    /// Plain aggregates only; aggregates used as window functions do not count.
    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        match self.kind() {
            ExprKind::Aggregate { .. } => true,
            ExprKind::Window { .. } => false,
            _ => self.children().into_iter().any(Expr::contains_aggregate),
        }
    }
}

/// A named column expression, as it appears in a projection list.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnExpr {
    name: String,
    expr: Expr,
}

impl ColumnExpr {
    #[must_use]
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.expr.dtype()
    }

    /// Relabel without touching the shared expression.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr: self.expr.clone(),
        }
    }

    /// Same name and the very same shared node.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.name == other.name && self.expr.ptr_eq(&other.expr)
    }
}
