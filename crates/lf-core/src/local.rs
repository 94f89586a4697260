//! In-process [`QueryClient`] that evaluates plans directly.
//!
//! The engine walks the [`ExpressionTree`] carried by each compiled query and
//! applies the engine's native semantics: three-valued logic, `MOD` that
//! fails on a zero divisor, IEEE division, and aggregates that return NULL
//! over empty input. It backs the test suites and offline sessions.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use lf_columnar::{Column, RealizedTable};
use lf_expr::{
    AggregateFunc, BinaryOp, Expr, ExprKind, Field, OrderingDirection, Schema, SortExpr, TableId,
    UnaryOp, WindowClause, WindowFunc,
};
use lf_index::IndexLabel;
use lf_types::{DType, Scalar, cast_value};
use parking_lot::{Mutex, RwLock};

use crate::client::{ClientError, QueryClient, QueryJob};
use crate::tree::{CompiledQuery, ExpressionTree, Source};

#[derive(Debug, Default)]
pub struct LocalEngine {
    tables: RwLock<BTreeMap<TableId, RealizedTable>>,
    queries: RwLock<BTreeMap<String, RealizedTable>>,
    submitted: Mutex<Vec<String>>,
}

impl LocalEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(self, id: TableId, table: RealizedTable) -> Self {
        self.insert_table(id, table);
        self
    }

    pub fn insert_table(&self, id: TableId, table: RealizedTable) {
        self.tables.write().insert(id, table);
    }

    /// Serve `table` as the result of the raw query `sql`. Queries match on
    /// their text with surrounding whitespace and trailing semicolons removed.
    #[must_use]
    pub fn with_query(self, sql: &str, table: RealizedTable) -> Self {
        self.queries.write().insert(query_key(sql), table);
        self
    }

    /// Number of queries submitted so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.submitted.lock().len()
    }

    /// SQL text of every submitted query, oldest first.
    #[must_use]
    pub fn submitted_sql(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    fn execute(&self, tree: &ExpressionTree, top_level: bool) -> Result<Rows, ClientError> {
        let source = match tree.source() {
            Source::Table(table) => {
                let tables = self.tables.read();
                let stored = tables
                    .get(table.id())
                    .ok_or_else(|| ClientError::TableNotFound(table.id().to_string()))?;
                Rows::from_table(stored)
            }
            Source::Query(query) => {
                let queries = self.queries.read();
                let stored = queries
                    .get(&query_key(query.sql()))
                    .ok_or_else(|| execution(format!("unrecognized query: {}", query.sql())))?;
                Rows::from_table(stored)
            }
            Source::Subquery(inner) => self.execute(inner, false)?,
            Source::Union(parts) => {
                let mut stacked: Option<Rows> = None;
                for part in parts {
                    let rows = self.execute(part, false)?;
                    stacked = Some(match stacked {
                        None => rows,
                        Some(acc) => acc.append(rows)?,
                    });
                }
                stacked.ok_or_else(|| execution("UNION ALL without inputs"))?
            }
        };

        let source = {
            let mut scope = Scope::new(&source);
            let mut keep = Vec::with_capacity(source.len);
            'rows: for row in 0..source.len {
                for predicate in tree.predicates() {
                    if !matches!(scope.eval(predicate, At::Row(row))?, Scalar::Bool(true)) {
                        continue 'rows;
                    }
                }
                keep.push(row);
            }
            source.take(&keep)
        };

        let mut scope = Scope::new(&source);
        let names = tree
            .columns()
            .iter()
            .map(|column| column.name().to_owned())
            .collect::<Vec<_>>();

        if tree.is_grouped() {
            let groups = scope.groups(tree.group_by())?;
            let mut columns = vec![Vec::with_capacity(groups.len()); names.len()];
            for rows in &groups {
                for (out, column) in columns.iter_mut().zip(tree.columns()) {
                    out.push(scope.eval(column.expr(), At::Group(rows.as_slice()))?);
                }
            }
            return Ok(Rows::new(names, columns, groups.len()));
        }

        let mut columns = Vec::with_capacity(names.len());
        for column in tree.columns() {
            columns.push(scope.eval_all(column.expr())?);
        }

        let mut order = (0..source.len).collect::<Vec<_>>();
        if (top_level || tree.limit().is_some()) && !tree.ordering().is_empty() {
            let mut keys = Vec::with_capacity(tree.ordering().len());
            for sort in tree.ordering() {
                keys.push(scope.eval_all(&sort.expr)?);
            }
            order.sort_by(|&a, &b| compare_rows(&keys, a, b, tree.ordering()));
        }
        if let Some(limit) = tree.limit() {
            order.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(Rows::new(names, columns, source.len).take(&order))
    }
}

struct LocalJob {
    id: String,
    result: Result<RealizedTable, ClientError>,
}

impl QueryJob for LocalJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn wait(self: Box<Self>) -> Result<RealizedTable, ClientError> {
        self.result
    }
}

impl QueryClient for LocalEngine {
    fn submit(&self, query: &CompiledQuery) -> Result<Box<dyn QueryJob>, ClientError> {
        let id = {
            let mut submitted = self.submitted.lock();
            submitted.push(query.sql().to_owned());
            format!("local_job_{}", submitted.len() - 1)
        };
        let result = self
            .execute(query.plan(), true)
            .and_then(|rows| rows.into_table(query.plan()));
        Ok(Box::new(LocalJob { id, result }))
    }

    fn get_table(&self, id: &TableId) -> Result<Schema, ClientError> {
        let tables = self.tables.read();
        let table = tables
            .get(id)
            .ok_or_else(|| ClientError::TableNotFound(id.to_string()))?;
        schema_of(table)
    }

    fn query_schema(&self, sql: &str) -> Result<Schema, ClientError> {
        let queries = self.queries.read();
        let table = queries
            .get(&query_key(sql))
            .ok_or_else(|| ClientError::Rejected(format!("unrecognized query: {}", sql.trim())))?;
        schema_of(table)
    }

    fn upload(&self, id: &TableId, table: &RealizedTable) -> Result<(), ClientError> {
        self.insert_table(id.clone(), table.clone());
        Ok(())
    }
}

fn query_key(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_owned()
}

fn schema_of(table: &RealizedTable) -> Result<Schema, ClientError> {
    let fields = table
        .names()
        .iter()
        .zip(table.columns())
        .map(|(name, column)| Field::new(name.clone(), column.dtype()))
        .collect();
    Schema::new(fields).map_err(|err| ClientError::Execution(err.to_string()))
}

/// Column-major rows of one evaluated relation.
#[derive(Debug, Clone)]
struct Rows {
    names: Vec<String>,
    columns: Vec<Vec<Scalar>>,
    len: usize,
}

impl Rows {
    fn new(names: Vec<String>, columns: Vec<Vec<Scalar>>, len: usize) -> Self {
        Self {
            names,
            columns,
            len,
        }
    }

    fn from_table(table: &RealizedTable) -> Self {
        Self::new(
            table.names().to_vec(),
            table
                .columns()
                .iter()
                .map(|column| column.values().to_vec())
                .collect(),
            table.num_rows(),
        )
    }

    fn take(&self, positions: &[usize]) -> Self {
        Self::new(
            self.names.clone(),
            self.columns
                .iter()
                .map(|values| positions.iter().map(|&row| values[row].clone()).collect())
                .collect(),
            positions.len(),
        )
    }

    /// `UNION ALL` by position. Column names come from `self`.
    fn append(mut self, other: Self) -> Result<Self, ClientError> {
        if other.columns.len() != self.columns.len() {
            return Err(execution(format!(
                "UNION ALL inputs have {} and {} columns",
                self.columns.len(),
                other.columns.len()
            )));
        }
        for (values, more) in self.columns.iter_mut().zip(other.columns) {
            values.extend(more);
        }
        self.len += other.len;
        Ok(self)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    fn into_table(self, plan: &ExpressionTree) -> Result<RealizedTable, ClientError> {
        let columns = self
            .columns
            .into_iter()
            .zip(plan.columns())
            .map(|(values, column)| Column::new(column.dtype(), values))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ClientError::Execution(err.to_string()))?;
        RealizedTable::new(self.names, columns).map_err(|err| ClientError::Execution(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum At<'a> {
    Row(usize),
    Group(&'a [usize]),
}

/// Evaluation context over one relation, with analytic results cached per
/// expression node.
struct Scope<'a> {
    rows: &'a Rows,
    windows: HashMap<usize, Vec<Scalar>>,
}

fn execution(message: impl Into<String>) -> ClientError {
    ClientError::Execution(message.into())
}

impl<'a> Scope<'a> {
    fn new(rows: &'a Rows) -> Self {
        Self {
            rows,
            windows: HashMap::new(),
        }
    }

    fn eval_all(&mut self, expr: &Expr) -> Result<Vec<Scalar>, ClientError> {
        (0..self.rows.len)
            .map(|row| self.eval(expr, At::Row(row)))
            .collect()
    }

    /// Row sets per distinct key, in first-seen order. No keys means one
    /// group spanning every row, even when there are none.
    fn groups(&mut self, keys: &[Expr]) -> Result<Vec<Vec<usize>>, ClientError> {
        if keys.is_empty() {
            return Ok(vec![(0..self.rows.len).collect()]);
        }
        let mut slots: HashMap<Vec<IndexLabel>, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for row in 0..self.rows.len {
            let mut label = Vec::with_capacity(keys.len());
            for key in keys {
                label.push(IndexLabel::from_scalar(&self.eval(key, At::Row(row))?));
            }
            let slot = *slots.entry(label).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(row);
        }
        Ok(groups)
    }

    fn eval(&mut self, expr: &Expr, at: At<'_>) -> Result<Scalar, ClientError> {
        match expr.kind() {
            ExprKind::Column { name, .. } => {
                let idx = self
                    .rows
                    .position(name)
                    .ok_or_else(|| execution(format!("Unrecognized name: {name}")))?;
                let values = &self.rows.columns[idx];
                Ok(match at {
                    At::Row(row) => values[row].clone(),
                    At::Group(rows) => rows.first().map_or(Scalar::NULL, |&row| values[row].clone()),
                })
            }
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::Unary { op, input } => unary(*op, self.eval(input, at)?),
            ExprKind::Binary { op, left, right } => {
                let lhs = self.eval(left, at)?;
                let rhs = self.eval(right, at)?;
                binary(*op, lhs, rhs, expr.dtype())
            }
            ExprKind::Case {
                branches,
                otherwise,
            } => {
                for (condition, value) in branches {
                    if matches!(self.eval(condition, at)?, Scalar::Bool(true)) {
                        return self.eval(value, at);
                    }
                }
                self.eval(otherwise, at)
            }
            ExprKind::Coalesce(values) => {
                for value in values {
                    let out = self.eval(value, at)?;
                    if !out.is_null() {
                        return Ok(out);
                    }
                }
                Ok(Scalar::NULL)
            }
            ExprKind::Cast { input, to } => cast(self.eval(input, at)?, *to),
            ExprKind::Aggregate { func, input } => {
                let At::Group(rows) = at else {
                    return Err(execution("aggregate function used outside GROUP BY"));
                };
                let values = match input {
                    Some(input) => rows
                        .iter()
                        .map(|&row| self.eval(input, At::Row(row)))
                        .collect::<Result<Vec<_>, _>>()?,
                    None => Vec::new(),
                };
                aggregate(*func, &values, rows.len(), expr.dtype())
            }
            ExprKind::Window { func, args, over } => {
                let At::Row(row) = at else {
                    return Err(execution("analytic function used inside an aggregate"));
                };
                let key = expr.node_addr();
                if !self.windows.contains_key(&key) {
                    let values = self.window(*func, args, over, expr.dtype())?;
                    self.windows.insert(key, values);
                }
                Ok(self
                    .windows
                    .get(&key)
                    .and_then(|values| values.get(row))
                    .cloned()
                    .unwrap_or(Scalar::NULL))
            }
        }
    }

    fn window(
        &mut self,
        func: WindowFunc,
        args: &[Expr],
        over: &WindowClause,
        dtype: DType,
    ) -> Result<Vec<Scalar>, ClientError> {
        let partitions = self.groups(&over.partition_by)?;
        let inputs = match args.first() {
            Some(arg) => Some(self.eval_all(arg)?),
            None => None,
        };
        let mut sort_keys = Vec::with_capacity(over.order_by.len());
        for sort in &over.order_by {
            sort_keys.push(self.eval_all(&sort.expr)?);
        }

        let mut out = vec![Scalar::NULL; self.rows.len];
        for mut partition in partitions {
            partition.sort_by(|&a, &b| compare_rows(&sort_keys, a, b, &over.order_by));
            let len = partition.len();
            for (pos, &row) in partition.iter().enumerate() {
                let input_at = |offset: usize| {
                    inputs
                        .as_ref()
                        .map_or(Scalar::NULL, |values| values[partition[offset]].clone())
                };
                out[row] = match func {
                    WindowFunc::RowNumber => Scalar::Int64(pos as i64 + 1),
                    WindowFunc::Lag(offset) => usize::try_from(offset)
                        .ok()
                        .and_then(|offset| pos.checked_sub(offset))
                        .map_or(Scalar::NULL, input_at),
                    WindowFunc::Lead(offset) => usize::try_from(offset)
                        .ok()
                        .and_then(|offset| pos.checked_add(offset))
                        .filter(|&target| target < len)
                        .map_or(Scalar::NULL, input_at),
                    WindowFunc::Aggregate(agg) => {
                        let (start, end) = match over.frame {
                            Some(frame) => (
                                frame.preceding.map_or(0, |n| {
                                    pos.saturating_sub(usize::try_from(n).unwrap_or(usize::MAX))
                                }),
                                frame.following.map_or(len - 1, |n| {
                                    pos.saturating_add(usize::try_from(n).unwrap_or(usize::MAX))
                                        .min(len - 1)
                                }),
                            ),
                            None if over.order_by.is_empty() => (0, len - 1),
                            None => (0, pos),
                        };
                        let values = (start..=end).map(input_at).collect::<Vec<_>>();
                        aggregate(agg, &values, end + 1 - start, dtype)?
                    }
                };
            }
        }
        Ok(out)
    }
}

/// Compare rows `a` and `b` on evaluated sort keys. Null placement is explicit
/// per key and does not follow the direction.
fn compare_rows(keys: &[Vec<Scalar>], a: usize, b: usize, sorts: &[SortExpr]) -> Ordering {
    for (values, sort) in keys.iter().zip(sorts) {
        let (lhs, rhs) = (&values[a], &values[b]);
        let ordering = match (lhs.is_null(), rhs.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if sort.nulls_last => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, true) if sort.nulls_last => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                let ordering = lhs.value_cmp(rhs).unwrap_or(Ordering::Equal);
                match sort.direction {
                    OrderingDirection::Ascending => ordering,
                    OrderingDirection::Descending => ordering.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn numeric(value: &Scalar) -> Result<f64, ClientError> {
    value.to_f64().map_err(|err| execution(err.to_string()))
}

fn integer(value: &Scalar) -> Result<i64, ClientError> {
    value.to_i64().map_err(|err| execution(err.to_string()))
}

fn overflow(op: &str) -> ClientError {
    execution(format!("int64 overflow in {op}"))
}

fn unary(op: UnaryOp, value: Scalar) -> Result<Scalar, ClientError> {
    match (op, value) {
        (UnaryOp::IsNull, value) => Ok(Scalar::Bool(value.is_null())),
        (UnaryOp::NotNull, value) => Ok(Scalar::Bool(!value.is_null())),
        (_, Scalar::Null(_)) => Ok(Scalar::NULL),
        (UnaryOp::Abs, Scalar::Int64(v)) => v.checked_abs().map(Scalar::Int64).ok_or_else(|| overflow("ABS")),
        (UnaryOp::Abs, Scalar::Float64(v)) => Ok(Scalar::Float64(v.abs())),
        (UnaryOp::Neg, Scalar::Int64(v)) => v.checked_neg().map(Scalar::Int64).ok_or_else(|| overflow("negation")),
        (UnaryOp::Neg, Scalar::Float64(v)) => Ok(Scalar::Float64(-v)),
        (UnaryOp::Not, Scalar::Bool(v)) => Ok(Scalar::Bool(!v)),
        (UnaryOp::Length, Scalar::Utf8(v)) => Ok(Scalar::Int64(v.chars().count() as i64)),
        (UnaryOp::Reverse, Scalar::Utf8(v)) => Ok(Scalar::Utf8(v.chars().rev().collect())),
        (op, value) => Err(execution(format!(
            "No matching signature for {op:?} with argument type {}",
            value.dtype()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Scalar, rhs: Scalar, out: DType) -> Result<Scalar, ClientError> {
    match op {
        BinaryOp::And => Ok(match (&lhs, &rhs) {
            (Scalar::Bool(false), _) | (_, Scalar::Bool(false)) => Scalar::Bool(false),
            (Scalar::Bool(true), Scalar::Bool(true)) => Scalar::Bool(true),
            _ => Scalar::NULL,
        }),
        BinaryOp::Or => Ok(match (&lhs, &rhs) {
            (Scalar::Bool(true), _) | (_, Scalar::Bool(true)) => Scalar::Bool(true),
            (Scalar::Bool(false), Scalar::Bool(false)) => Scalar::Bool(false),
            _ => Scalar::NULL,
        }),
        _ if lhs.is_null() || rhs.is_null() => Ok(Scalar::NULL),
        op if op.is_comparison() => {
            let ordering = lhs.value_cmp(&rhs).ok_or_else(|| {
                execution(format!(
                    "No matching signature for comparison of {} and {}",
                    lhs.dtype(),
                    rhs.dtype()
                ))
            })?;
            // IEEE comparisons: NaN is unordered with everything.
            let nan = matches!(lhs, Scalar::Float64(v) if v.is_nan())
                || matches!(rhs, Scalar::Float64(v) if v.is_nan());
            Ok(Scalar::Bool(match op {
                _ if nan => op == BinaryOp::Ne,
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::Ne => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul if out == DType::Int64 => {
            let (a, b) = (integer(&lhs)?, integer(&rhs)?);
            let value = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            value.map(Scalar::Int64).ok_or_else(|| overflow("arithmetic"))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            let (a, b) = (numeric(&lhs)?, numeric(&rhs)?);
            Ok(Scalar::Float64(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                _ => a * b,
            }))
        }
        BinaryOp::Div => Ok(Scalar::Float64(numeric(&lhs)? / numeric(&rhs)?)),
        BinaryOp::FloorDiv => {
            let quotient = (numeric(&lhs)? / numeric(&rhs)?).floor();
            if out == DType::Int64 {
                float_to_int(quotient)
            } else {
                Ok(Scalar::Float64(quotient))
            }
        }
        BinaryOp::Mod if out == DType::Int64 => {
            let (a, b) = (integer(&lhs)?, integer(&rhs)?);
            if b == 0 {
                return Err(execution(format!("division by zero: MOD({a}, 0)")));
            }
            a.checked_rem(b).map(Scalar::Int64).ok_or_else(|| overflow("MOD"))
        }
        BinaryOp::Mod => {
            let (a, b) = (numeric(&lhs)?, numeric(&rhs)?);
            if b == 0.0 {
                return Err(execution(format!("division by zero: MOD({a}, 0)")));
            }
            Ok(Scalar::Float64(a % b))
        }
        _ => Err(execution(format!("unsupported operator {op:?}"))),
    }
}

fn float_to_int(value: f64) -> Result<Scalar, ClientError> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(execution(format!(
            "Illegal conversion of non-finite floating point number to an integer: {value}"
        )));
    }
    Ok(Scalar::Int64(rounded as i64))
}

fn cast(value: Scalar, to: DType) -> Result<Scalar, ClientError> {
    match (value, to) {
        (Scalar::Null(_), _) => Ok(Scalar::NULL),
        (Scalar::Float64(v), DType::Int64) => float_to_int(v),
        (value, to) => cast_value(value, to).map_err(|err| execution(err.to_string())),
    }
}

/// Engine aggregate over `values`. Every function but the counts skips
/// NULLs and returns NULL when nothing remains.
fn aggregate(
    func: AggregateFunc,
    values: &[Scalar],
    row_count: usize,
    out: DType,
) -> Result<Scalar, ClientError> {
    let present = values.iter().filter(|value| !value.is_null()).collect::<Vec<_>>();
    match func {
        AggregateFunc::CountStar => return Ok(Scalar::Int64(row_count as i64)),
        AggregateFunc::Count => return Ok(Scalar::Int64(present.len() as i64)),
        _ if present.is_empty() => return Ok(Scalar::NULL),
        _ => {}
    }
    match func {
        AggregateFunc::Sum if out == DType::Int64 => present
            .iter()
            .try_fold(0_i64, |acc, value| {
                integer(value)?.checked_add(acc).ok_or_else(|| overflow("SUM"))
            })
            .map(Scalar::Int64),
        AggregateFunc::Sum => present
            .iter()
            .try_fold(0.0, |acc, value| Ok::<_, ClientError>(acc + numeric(value)?))
            .map(Scalar::Float64),
        AggregateFunc::Mean => {
            let total = present
                .iter()
                .try_fold(0.0, |acc, value| Ok::<_, ClientError>(acc + numeric(value)?))?;
            Ok(Scalar::Float64(total / present.len() as f64))
        }
        AggregateFunc::Min | AggregateFunc::Max => {
            let mut best = present[0];
            for &value in &present[1..] {
                let ordering = value.value_cmp(best).unwrap_or(Ordering::Equal);
                let better = match func {
                    AggregateFunc::Min => ordering == Ordering::Less,
                    _ => ordering == Ordering::Greater,
                };
                if better {
                    best = value;
                }
            }
            Ok(best.clone())
        }
        AggregateFunc::LogicalAnd | AggregateFunc::LogicalOr => {
            let mut flags = Vec::with_capacity(present.len());
            for value in &present {
                flags.push(value.to_bool().map_err(|err| execution(err.to_string()))?);
            }
            Ok(Scalar::Bool(if func == AggregateFunc::LogicalAnd {
                flags.iter().all(|flag| *flag)
            } else {
                flags.iter().any(|flag| *flag)
            }))
        }
        AggregateFunc::Count | AggregateFunc::CountStar => Ok(Scalar::Int64(present.len() as i64)),
    }
}
