//! BigQuery-dialect rendering of expressions and select statements.
//!
//! Rendering is a pure function of the expression graph, so compiling an
//! unchanged plan twice yields byte-identical SQL.

use std::fmt::Write as _;

use lf_types::{DType, Scalar};

use crate::{
    AggregateFunc, BinaryOp, Expr, ExprKind, SortExpr, TableId, UnaryOp, WindowClause,
    WindowFrame, WindowFunc,
};

#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "\\`"))
}

#[must_use]
pub fn table_reference(id: &TableId) -> String {
    quote_identifier(&id.to_string())
}

#[must_use]
pub fn sql_type(dtype: DType) -> &'static str {
    match dtype {
        DType::Bool => "BOOL",
        DType::Null | DType::Int64 => "INT64",
        DType::Float64 => "FLOAT64",
        DType::Utf8 => "STRING",
    }
}

fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[must_use]
pub fn render_literal(value: &Scalar, dtype: DType) -> String {
    match value {
        Scalar::Null(_) if dtype == DType::Null => "NULL".to_owned(),
        Scalar::Null(_) => format!("CAST(NULL AS {})", sql_type(dtype)),
        Scalar::Bool(true) => "TRUE".to_owned(),
        Scalar::Bool(false) => "FALSE".to_owned(),
        // parenthesized so that a leading minus never forms a `--` comment
        Scalar::Int64(v) if *v < 0 => format!("({v})"),
        Scalar::Int64(v) => v.to_string(),
        Scalar::Float64(v) if v.is_nan() => "CAST('NaN' AS FLOAT64)".to_owned(),
        Scalar::Float64(v) if v.is_infinite() && *v > 0.0 => "CAST('inf' AS FLOAT64)".to_owned(),
        Scalar::Float64(v) if v.is_infinite() => "CAST('-inf' AS FLOAT64)".to_owned(),
        Scalar::Float64(v) if *v < 0.0 => format!("({v:?})"),
        Scalar::Float64(v) => format!("{v:?}"),
        Scalar::Utf8(v) => quote_string(v),
    }
}

fn binary_operator(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod => return None,
    })
}

fn aggregate_name(func: AggregateFunc) -> &'static str {
    match func {
        AggregateFunc::Sum => "SUM",
        AggregateFunc::Mean => "AVG",
        AggregateFunc::Min => "MIN",
        AggregateFunc::Max => "MAX",
        AggregateFunc::Count | AggregateFunc::CountStar => "COUNT",
        AggregateFunc::LogicalAnd => "LOGICAL_AND",
        AggregateFunc::LogicalOr => "LOGICAL_OR",
    }
}

#[must_use]
pub fn render_expr(expr: &Expr) -> String {
    render(expr, None)
}

/// Render with every column reference qualified by `qualifier`, so that
/// select-list aliases cannot shadow source columns in ORDER BY/GROUP BY.
#[must_use]
pub fn render_expr_qualified(expr: &Expr, qualifier: &str) -> String {
    render(expr, Some(qualifier))
}

fn render(expr: &Expr, qualifier: Option<&str>) -> String {
    match expr.kind() {
        ExprKind::Column { name, .. } => match qualifier {
            Some(qualifier) => format!(
                "{}.{}",
                quote_identifier(qualifier),
                quote_identifier(name)
            ),
            None => quote_identifier(name),
        },
        ExprKind::Literal(value) => render_literal(value, expr.dtype()),
        ExprKind::Unary { op, input } => {
            let input = render(input, qualifier);
            match op {
                UnaryOp::Abs => format!("ABS({input})"),
                UnaryOp::Neg => format!("(- {input})"),
                UnaryOp::Not => format!("(NOT {input})"),
                UnaryOp::IsNull => format!("({input} IS NULL)"),
                UnaryOp::NotNull => format!("({input} IS NOT NULL)"),
                UnaryOp::Length => format!("LENGTH({input})"),
                UnaryOp::Reverse => format!("REVERSE({input})"),
            }
        }
        ExprKind::Binary { op, left, right } => {
            let (lhs, rhs) = (render(left, qualifier), render(right, qualifier));
            match (op, binary_operator(*op)) {
                (_, Some(symbol)) => format!("({lhs} {symbol} {rhs})"),
                (BinaryOp::Div, None) => format!("IEEE_DIVIDE({lhs}, {rhs})"),
                (BinaryOp::FloorDiv, None) if expr.dtype() == DType::Int64 => {
                    format!("CAST(FLOOR(IEEE_DIVIDE({lhs}, {rhs})) AS INT64)")
                }
                (BinaryOp::FloorDiv, None) => format!("FLOOR(IEEE_DIVIDE({lhs}, {rhs}))"),
                (_, None) => format!("MOD({lhs}, {rhs})"),
            }
        }
        ExprKind::Case {
            branches,
            otherwise,
        } => {
            let mut out = String::from("CASE");
            for (condition, value) in branches {
                let _ = write!(
                    out,
                    " WHEN {} THEN {}",
                    render(condition, qualifier),
                    render(value, qualifier)
                );
            }
            let _ = write!(out, " ELSE {} END", render(otherwise, qualifier));
            out
        }
        ExprKind::Coalesce(values) => format!("COALESCE({})", render_list(values, qualifier)),
        ExprKind::Cast { input, to } => {
            format!("CAST({} AS {})", render(input, qualifier), sql_type(*to))
        }
        ExprKind::Aggregate { func, input } => render_call(*func, input.as_ref(), qualifier),
        ExprKind::Window { func, args, over } => {
            let call = match func {
                WindowFunc::Aggregate(agg) => render_call(*agg, args.first(), qualifier),
                WindowFunc::RowNumber => "ROW_NUMBER()".to_owned(),
                WindowFunc::Lag(offset) => {
                    format!("LAG({}, {offset})", render_list(args, qualifier))
                }
                WindowFunc::Lead(offset) => {
                    format!("LEAD({}, {offset})", render_list(args, qualifier))
                }
            };
            format!("{call} OVER ({})", render_over(over, qualifier))
        }
    }
}

fn render_call(func: AggregateFunc, input: Option<&Expr>, qualifier: Option<&str>) -> String {
    match (func, input) {
        (AggregateFunc::CountStar, _) | (_, None) => "COUNT(*)".to_owned(),
        (func, Some(input)) => format!("{}({})", aggregate_name(func), render(input, qualifier)),
    }
}

fn render_list(values: &[Expr], qualifier: Option<&str>) -> String {
    values
        .iter()
        .map(|value| render(value, qualifier))
        .collect::<Vec<_>>()
        .join(", ")
}

#[must_use]
pub fn render_sort(sort: &SortExpr) -> String {
    sort_key(sort, None)
}

#[must_use]
pub fn render_sort_qualified(sort: &SortExpr, qualifier: &str) -> String {
    sort_key(sort, Some(qualifier))
}

fn sort_key(sort: &SortExpr, qualifier: Option<&str>) -> String {
    format!(
        "{} {} NULLS {}",
        render(&sort.expr, qualifier),
        sort.direction.sql_keyword(),
        if sort.nulls_last { "LAST" } else { "FIRST" }
    )
}

fn render_frame(frame: &WindowFrame) -> String {
    let start = match frame.preceding {
        None => "UNBOUNDED PRECEDING".to_owned(),
        Some(0) => "CURRENT ROW".to_owned(),
        Some(n) => format!("{n} PRECEDING"),
    };
    let end = match frame.following {
        None => "UNBOUNDED FOLLOWING".to_owned(),
        Some(0) => "CURRENT ROW".to_owned(),
        Some(n) => format!("{n} FOLLOWING"),
    };
    format!("ROWS BETWEEN {start} AND {end}")
}

#[must_use]
pub fn render_window_clause(over: &WindowClause) -> String {
    render_over(over, None)
}

fn render_over(over: &WindowClause, qualifier: Option<&str>) -> String {
    let mut parts = Vec::new();
    if !over.partition_by.is_empty() {
        parts.push(format!(
            "PARTITION BY {}",
            render_list(&over.partition_by, qualifier)
        ));
    }
    if !over.order_by.is_empty() {
        let keys = over
            .order_by
            .iter()
            .map(|sort| sort_key(sort, qualifier))
            .collect::<Vec<_>>();
        parts.push(format!("ORDER BY {}", keys.join(", ")));
    }
    if let Some(frame) = &over.frame {
        parts.push(render_frame(frame));
    }
    parts.join(" ")
}

/// Clause-by-clause form of one `SELECT` statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectSql {
    /// `(rendered expression, output alias)` pairs.
    pub items: Vec<(String, String)>,
    pub from: String,
    pub predicates: Vec<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
}

impl SelectSql {
    #[must_use]
    pub fn render(&self) -> String {
        let items = self
            .items
            .iter()
            .map(|(expr, alias)| {
                let quoted = quote_identifier(alias);
                if *expr == quoted {
                    quoted
                } else {
                    format!("{expr} AS {quoted}")
                }
            })
            .collect::<Vec<_>>();
        let mut out = format!("SELECT {}\nFROM {}", items.join(", "), self.from);
        if !self.predicates.is_empty() {
            let _ = write!(out, "\nWHERE {}", self.predicates.join(" AND "));
        }
        if !self.group_by.is_empty() {
            let _ = write!(out, "\nGROUP BY {}", self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            let _ = write!(out, "\nORDER BY {}", self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            let _ = write!(out, "\nLIMIT {limit}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use lf_types::{DType, NullKind, Scalar};

    use super::{
        SelectSql, quote_identifier, render_expr, render_literal, render_sort_qualified,
    };
    use crate::{
        AggregateFunc, BaseTableRef, BinaryOp, Expr, Field, Schema, SortExpr, TableId,
        WindowClause, WindowFrame, WindowFunc,
    };

    fn val() -> Expr {
        let schema = Schema::new(vec![Field::new("val", DType::Int64)]).expect("schema");
        BaseTableRef::bind(TableId::new("p", "d", "t"), schema)
            .column("val")
            .expect("val")
            .expr()
            .clone()
    }

    #[test]
    fn literals_render_with_engine_spelling() {
        assert_eq!(render_literal(&Scalar::Float64(1.0), DType::Float64), "1.0");
        assert_eq!(
            render_literal(&Scalar::Float64(f64::NAN), DType::Float64),
            "CAST('NaN' AS FLOAT64)"
        );
        assert_eq!(render_literal(&Scalar::Int64(-2), DType::Int64), "(-2)");
        assert_eq!(
            render_literal(&Scalar::Null(NullKind::NaN), DType::Float64),
            "CAST(NULL AS FLOAT64)"
        );
        assert_eq!(render_literal(&Scalar::from("it's"), DType::Utf8), r"'it\'s'");
    }

    #[test]
    fn identifiers_are_backticked() {
        assert_eq!(quote_identifier("my col"), "`my col`");
    }

    #[test]
    fn division_family_uses_ieee_divide() {
        let floor = Expr::binary(BinaryOp::FloorDiv, val(), Expr::literal(2_i64)).expect("fd");
        assert_eq!(
            render_expr(&floor),
            "CAST(FLOOR(IEEE_DIVIDE(`val`, 2)) AS INT64)"
        );
        let modulo = Expr::binary(BinaryOp::Mod, val(), Expr::literal(3_i64)).expect("mod");
        assert_eq!(render_expr(&modulo), "MOD(`val`, 3)");
    }

    #[test]
    fn window_renders_frame_bounds() {
        let window = Expr::window(
            WindowFunc::Aggregate(AggregateFunc::Sum),
            vec![val()],
            WindowClause {
                partition_by: Vec::new(),
                order_by: vec![SortExpr::asc(val())],
                frame: Some(WindowFrame {
                    preceding: Some(2),
                    following: Some(0),
                }),
            },
        )
        .expect("window");
        assert_eq!(
            render_expr(&window),
            "SUM(`val`) OVER (ORDER BY `val` ASC NULLS LAST ROWS BETWEEN 2 PRECEDING AND CURRENT ROW)"
        );
    }

    #[test]
    fn qualified_sort_keys_name_the_source() {
        let key = SortExpr::desc(val()).reversed();
        assert_eq!(
            render_sort_qualified(&key, "t0"),
            "`t0`.`val` ASC NULLS FIRST"
        );
    }

    #[test]
    fn select_skips_redundant_aliases() {
        let select = SelectSql {
            items: vec![
                ("`val`".to_owned(), "val".to_owned()),
                ("(`val` + 1)".to_owned(), "inc".to_owned()),
            ],
            from: "`p.d.t`".to_owned(),
            predicates: vec!["(`val` > 1)".to_owned()],
            limit: Some(5),
            ..SelectSql::default()
        };
        assert_eq!(
            select.render(),
            "SELECT `val`, (`val` + 1) AS `inc`\nFROM `p.d.t`\nWHERE (`val` > 1)\nLIMIT 5"
        );
    }
}
