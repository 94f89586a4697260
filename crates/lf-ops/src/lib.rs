#![forbid(unsafe_code)]

//! Pandas-semantics operations over column expressions.
//!
//! Every function here is pure: it builds a new [`Expr`] from its inputs and
//! never touches data. Where the engine's native behavior differs from pandas
//! (zero denominators, remainder sign, empty boolean reductions) the
//! correction is encoded into the generated expression.

use lf_expr::{BinaryOp, Expr, ExprError, UnaryOp};
use lf_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregations;

pub use aggregations::{AggregateOp, WindowOp, cut};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OpError {
    #[error("numeric operation {op} cannot be applied to type {dtype}")]
    NonNumeric { op: &'static str, dtype: DType },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error(transparent)]
    Expr(#[from] ExprError),
}

fn zero() -> Expr {
    Expr::literal(0_i64)
}

fn is_zero_literal(expr: &Expr) -> bool {
    match expr.as_literal() {
        Some(Scalar::Int64(v)) => *v == 0,
        Some(Scalar::Float64(v)) => *v == 0.0,
        _ => false,
    }
}

/// `0 * x`: a zero of x's numeric type that is still NULL wherever x is.
fn null_propagating_zero(x: &Expr) -> Result<Expr, OpError> {
    Ok(Expr::binary(BinaryOp::Mul, zero(), x.clone())?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperation {
    Abs,
    Invert,
    IsNull,
    NotNull,
    Len,
    Reverse,
}

impl UnaryOperation {
    pub fn apply(self, x: &Expr) -> Result<Expr, OpError> {
        let op = match self {
            Self::Abs => UnaryOp::Abs,
            Self::Invert if x.dtype() == DType::Bool => UnaryOp::Not,
            Self::Invert => UnaryOp::Neg,
            Self::IsNull => UnaryOp::IsNull,
            Self::NotNull => UnaryOp::NotNull,
            Self::Len => UnaryOp::Length,
            Self::Reverse => UnaryOp::Reverse,
        };
        Ok(Expr::unary(op, x.clone())?)
    }
}

pub fn abs_op(x: &Expr) -> Result<Expr, OpError> {
    UnaryOperation::Abs.apply(x)
}

pub fn invert_op(x: &Expr) -> Result<Expr, OpError> {
    UnaryOperation::Invert.apply(x)
}

pub fn isnull_op(x: &Expr) -> Result<Expr, OpError> {
    UnaryOperation::IsNull.apply(x)
}

pub fn notnull_op(x: &Expr) -> Result<Expr, OpError> {
    UnaryOperation::NotNull.apply(x)
}

pub fn len_op(x: &Expr) -> Result<Expr, OpError> {
    UnaryOperation::Len.apply(x)
}

pub fn reverse_op(x: &Expr) -> Result<Expr, OpError> {
    UnaryOperation::Reverse.apply(x)
}

/// Replace nulls with `value`.
pub fn fillna_op(x: &Expr, value: &Expr) -> Result<Expr, OpError> {
    Ok(Expr::coalesce(vec![x.clone(), value.clone()])?)
}

/// Floor division where a zero denominator yields a null-propagating zero
/// instead of an engine error.
pub fn floordiv_op(x: &Expr, y: &Expr) -> Result<Expr, OpError> {
    let floor = Expr::binary(BinaryOp::FloorDiv, x.clone(), y.clone())?;
    let y_is_zero = Expr::binary(BinaryOp::Eq, y.clone(), zero())?;
    Ok(Expr::case(
        vec![(y_is_zero, null_propagating_zero(x)?)],
        floor,
    )?)
}

/// Remainder with the divisor's sign, as pandas computes it.
///
/// The engine's `MOD` keeps the dividend's sign, so whenever the divisor and
/// the native remainder disagree in sign the divisor is added back.
pub fn mod_op(x: &Expr, y: &Expr) -> Result<Expr, OpError> {
    if is_zero_literal(y) {
        return null_propagating_zero(x);
    }

    let native = Expr::binary(BinaryOp::Mod, x.clone(), y.clone())?;
    let corrected = Expr::binary(BinaryOp::Add, y.clone(), native.clone())?;
    let sign_flip = |divisor: BinaryOp, remainder: BinaryOp| -> Result<Expr, OpError> {
        Ok(Expr::binary(
            BinaryOp::And,
            Expr::binary(divisor, y.clone(), zero())?,
            Expr::binary(remainder, native.clone(), zero())?,
        )?)
    };

    Ok(Expr::case(
        vec![
            (
                Expr::binary(BinaryOp::Eq, y.clone(), zero())?,
                null_propagating_zero(x)?,
            ),
            (sign_flip(BinaryOp::Lt, BinaryOp::Gt)?, corrected.clone()),
            (sign_flip(BinaryOp::Gt, BinaryOp::Lt)?, corrected),
        ],
        native,
    )?)
}

/// A binary operation, optionally applied with its operands swapped
/// (`radd`, `rsub`, ... in pandas terms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryOperation {
    op: BinaryOp,
    reversed: bool,
}

impl BinaryOperation {
    #[must_use]
    pub fn new(op: BinaryOp) -> Self {
        Self {
            op,
            reversed: false,
        }
    }

    #[must_use]
    pub fn reverse(self) -> Self {
        Self {
            op: self.op,
            reversed: !self.reversed,
        }
    }

    #[must_use]
    pub fn op(&self) -> BinaryOp {
        self.op
    }

    pub fn apply(&self, x: &Expr, y: &Expr) -> Result<Expr, OpError> {
        let (x, y) = if self.reversed { (y, x) } else { (x, y) };
        match self.op {
            BinaryOp::FloorDiv => floordiv_op(x, y),
            BinaryOp::Mod => mod_op(x, y),
            op => Ok(Expr::binary(op, x.clone(), y.clone())?),
        }
    }
}

macro_rules! binary_ops {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(x: &Expr, y: &Expr) -> Result<Expr, OpError> {
                BinaryOperation::new(BinaryOp::$op).apply(x, y)
            }
        )*
    };
}

binary_ops! {
    add_op => Add,
    sub_op => Sub,
    mul_op => Mul,
    div_op => Div,
    eq_op => Eq,
    ne_op => Ne,
    lt_op => Lt,
    le_op => Le,
    gt_op => Gt,
    ge_op => Ge,
    and_op => And,
    or_op => Or,
}

/// Swap operands of `op`.
#[must_use]
pub fn reverse(op: BinaryOp) -> BinaryOperation {
    BinaryOperation::new(op).reverse()
}

#[cfg(test)]
mod tests {
    use lf_expr::sql::render_expr;
    use lf_expr::{BaseTableRef, BinaryOp, Expr, ExprKind, Field, Schema, TableId};
    use lf_types::DType;

    use super::{
        BinaryOperation, OpError, UnaryOperation, floordiv_op, fillna_op, mod_op, reverse, sub_op,
    };

    fn columns() -> (Expr, Expr, Expr) {
        let schema = Schema::new(vec![
            Field::new("x", DType::Int64),
            Field::new("y", DType::Int64),
            Field::new("s", DType::Utf8),
        ])
        .expect("schema");
        let table = BaseTableRef::bind(TableId::new("p", "d", "t"), schema);
        let col = |name: &str| table.column(name).expect("column").expr().clone();
        (col("x"), col("y"), col("s"))
    }

    #[test]
    fn floordiv_short_circuits_zero_denominator() {
        let (x, y, _) = columns();
        let expr = floordiv_op(&x, &y).expect("floordiv");
        assert_eq!(expr.dtype(), DType::Int64);
        assert_eq!(
            render_expr(&expr),
            "CASE WHEN (`y` = 0) THEN (0 * `x`) ELSE CAST(FLOOR(IEEE_DIVIDE(`x`, `y`)) AS INT64) END"
        );
    }

    #[test]
    fn mod_by_literal_zero_never_reaches_engine_mod() {
        let (x, _, _) = columns();
        let expr = mod_op(&x, &Expr::literal(0_i64)).expect("mod");
        assert_eq!(render_expr(&expr), "(0 * `x`)");
    }

    #[test]
    fn mod_corrects_sign_toward_divisor() {
        let (x, y, _) = columns();
        let expr = mod_op(&x, &y).expect("mod");
        let ExprKind::Case {
            branches,
            otherwise,
        } = expr.kind()
        else {
            panic!("mod should lower to CASE");
        };
        assert_eq!(branches.len(), 3);
        assert_eq!(render_expr(otherwise), "MOD(`x`, `y`)");
        assert_eq!(
            render_expr(&branches[1].0),
            "((`y` < 0) AND (MOD(`x`, `y`) > 0))"
        );
    }

    #[test]
    fn mod_shares_the_native_remainder_node() {
        let (x, y, _) = columns();
        let expr = mod_op(&x, &y).expect("mod");
        let ExprKind::Case {
            branches,
            otherwise,
        } = expr.kind()
        else {
            panic!("mod should lower to CASE");
        };
        let ExprKind::Binary { right, .. } = branches[1].1.kind() else {
            panic!("corrected branch is y + native");
        };
        assert!(right.ptr_eq(otherwise));
    }

    #[test]
    fn reversed_operation_swaps_operands() {
        let (x, y, _) = columns();
        let forward = sub_op(&x, &y).expect("sub");
        let backward = reverse(BinaryOp::Sub).apply(&y, &x).expect("rsub");
        assert_eq!(render_expr(&forward), render_expr(&backward));
        assert_eq!(
            BinaryOperation::new(BinaryOp::Mod).reverse().reverse(),
            BinaryOperation::new(BinaryOp::Mod)
        );
    }

    #[test]
    fn invert_is_logical_not_for_booleans() {
        let (x, y, _) = columns();
        let gt = Expr::binary(BinaryOp::Gt, x.clone(), y).expect("gt");
        assert_eq!(
            render_expr(&UnaryOperation::Invert.apply(&gt).expect("not")),
            "(NOT (`x` > `y`))"
        );
        assert_eq!(
            render_expr(&UnaryOperation::Invert.apply(&x).expect("neg")),
            "(- `x`)"
        );
    }

    #[test]
    fn string_arithmetic_fails_before_any_query() {
        let (x, _, s) = columns();
        let err = floordiv_op(&s, &x).expect_err("strings");
        assert!(matches!(err, OpError::Expr(_)));
        assert_eq!(
            render_expr(&fillna_op(&x, &Expr::literal(-1_i64)).expect("fillna")),
            "COALESCE(`x`, (-1))"
        );
    }
}
