//! Aggregations and window operations.

use lf_expr::{AggregateFunc, BinaryOp, Expr, ExprError, UnaryOp, WindowClause, WindowFunc};
use lf_types::DType;
use serde::{Deserialize, Serialize};

use crate::OpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    All,
    Any,
}

impl AggregateOp {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::All => "all",
            Self::Any => "any",
        }
    }

    fn requires_numeric(self) -> bool {
        matches!(self, Self::Sum | Self::Mean | Self::All | Self::Any)
    }

    /// Reject non-numeric input before any expression is built.
    pub fn check_input(self, x: &Expr) -> Result<(), OpError> {
        if self.requires_numeric() && !x.dtype().is_numeric() {
            return Err(OpError::NonNumeric {
                op: self.name(),
                dtype: x.dtype(),
            });
        }
        Ok(())
    }

    /// Whole-column (or per-group) reduction.
    pub fn aggregate(self, x: &Expr) -> Result<Expr, OpError> {
        self.lower(x, |func, input| Expr::aggregate(func, Some(input)))
    }

    /// The same reduction evaluated over a window of rows.
    pub fn windowed(self, x: &Expr, over: &WindowClause) -> Result<Expr, OpError> {
        self.lower(x, |func, input| {
            Expr::window(WindowFunc::Aggregate(func), vec![input], over.clone())
        })
    }

    fn lower<F>(self, x: &Expr, reduce: F) -> Result<Expr, OpError>
    where
        F: Fn(AggregateFunc, Expr) -> Result<Expr, ExprError>,
    {
        self.check_input(x)?;
        let out = match self {
            Self::Sum | Self::Mean => {
                let func = if self == Self::Sum {
                    AggregateFunc::Sum
                } else {
                    AggregateFunc::Mean
                };
                let input = if x.dtype() == DType::Bool {
                    Expr::cast(x.clone(), DType::Int64)
                } else {
                    x.clone()
                };
                reduce(func, input)?
            }
            Self::Min => reduce(AggregateFunc::Min, x.clone())?,
            Self::Max => reduce(AggregateFunc::Max, x.clone())?,
            Self::Count => reduce(AggregateFunc::Count, x.clone())?,
            // The engine's boolean aggregates are NULL over no rows; pandas
            // reduces an empty column to the operation's identity.
            Self::All => Expr::coalesce(vec![
                reduce(AggregateFunc::LogicalAnd, truthiness(x)?)?,
                Expr::literal(true),
            ])?,
            Self::Any => Expr::coalesce(vec![
                reduce(AggregateFunc::LogicalOr, truthiness(x)?)?,
                Expr::literal(false),
            ])?,
        };
        Ok(out)
    }
}

fn truthiness(x: &Expr) -> Result<Expr, ExprError> {
    if x.dtype() == DType::Bool {
        return Ok(x.clone());
    }
    Expr::binary(BinaryOp::Ne, x.clone(), Expr::literal(0_i64))
}

/// An operation evaluated per row over a window of neighbouring rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WindowOp {
    Aggregate(AggregateOp),
    /// Running aggregate that skips missing values: a NULL input row stays
    /// NULL while the running value carries on past it.
    Cumulative(AggregateOp),
    /// Zero-based position within the partition.
    RowNumber,
    /// Positive periods look back (`LAG`), negative look ahead (`LEAD`).
    Shift(i64),
    /// Equal-width bin code over the partition's value range.
    Cut { bins: u64 },
}

impl WindowOp {
    /// Lower the operation over `over`. `min_periods` applies only to
    /// aggregations: rows whose frame holds fewer non-null values yield NULL.
    pub fn apply(&self, x: &Expr, over: WindowClause, min_periods: u64) -> Result<Expr, OpError> {
        match *self {
            Self::Aggregate(agg) => {
                let value = agg.windowed(x, &over)?;
                if min_periods == 0 {
                    return Ok(value);
                }
                let count = Expr::window(
                    WindowFunc::Aggregate(AggregateFunc::Count),
                    vec![x.clone()],
                    over,
                )?;
                let enough = Expr::binary(
                    BinaryOp::Ge,
                    count,
                    Expr::literal(i64::try_from(min_periods).unwrap_or(i64::MAX)),
                )?;
                let dtype = value.dtype();
                Ok(Expr::case(vec![(enough, value)], Expr::typed_null(dtype))?)
            }
            Self::Cumulative(agg) => {
                let value = Self::Aggregate(agg).apply(x, over, min_periods)?;
                let dtype = value.dtype();
                Ok(Expr::case(
                    vec![(Expr::unary(UnaryOp::IsNull, x.clone())?, Expr::typed_null(dtype))],
                    value,
                )?)
            }
            Self::RowNumber => {
                let number = Expr::window(WindowFunc::RowNumber, Vec::new(), without_frame(over))?;
                Ok(Expr::binary(BinaryOp::Sub, number, Expr::literal(1_i64))?)
            }
            Self::Shift(0) => Ok(x.clone()),
            Self::Shift(periods) => {
                let func = if periods > 0 {
                    WindowFunc::Lag(periods.unsigned_abs())
                } else {
                    WindowFunc::Lead(periods.unsigned_abs())
                };
                Ok(Expr::window(func, vec![x.clone()], without_frame(over))?)
            }
            Self::Cut { bins } => cut_expr(x, check_bins(bins)?, over.partition_by),
        }
    }
}

fn without_frame(over: WindowClause) -> WindowClause {
    WindowClause {
        frame: None,
        ..over
    }
}

/// Upper bound on `cut` bins; each bin is one `CASE` branch.
pub const MAX_CUT_BINS: u64 = 4096;

fn check_bins(bins: u64) -> Result<i64, OpError> {
    if bins == 0 {
        return Err(OpError::InvalidArgument(
            "`bins` should be a positive integer.".to_owned(),
        ));
    }
    if bins > MAX_CUT_BINS {
        return Err(OpError::InvalidArgument(format!(
            "`bins` must be at most {MAX_CUT_BINS}, got {bins}"
        )));
    }
    i64::try_from(bins).map_err(|_| OpError::InvalidArgument(format!("`bins` too large: {bins}")))
}

/// Validate `pd.cut` arguments. Only integer bin codes (`labels=False`) are supported.
pub fn cut(bins: i64, labels: Option<bool>) -> Result<WindowOp, OpError> {
    if bins <= 0 {
        return Err(OpError::InvalidArgument(
            "`bins` should be a positive integer.".to_owned(),
        ));
    }
    if labels != Some(false) {
        return Err(OpError::NotImplemented(
            "only labels=False is supported by cut".to_owned(),
        ));
    }
    let bins = bins.unsigned_abs();
    check_bins(bins)?;
    Ok(WindowOp::Cut { bins })
}

// Right-closed equal-width bins over [min, max]: x falls in bin i when
// (x - min) * bins <= (i + 1) * (max - min). A constant partition lands in
// the middle bin, matching pandas' widened edges.
fn cut_expr(x: &Expr, bins: i64, partition_by: Vec<Expr>) -> Result<Expr, OpError> {
    ensure_numeric(x, "cut")?;
    let over = WindowClause {
        partition_by,
        ..WindowClause::default()
    };
    let min = Expr::window(
        WindowFunc::Aggregate(AggregateFunc::Min),
        vec![x.clone()],
        over.clone(),
    )?;
    let max = Expr::window(WindowFunc::Aggregate(AggregateFunc::Max), vec![x.clone()], over)?;
    let range = Expr::binary(BinaryOp::Sub, max.clone(), min.clone())?;
    let offset = Expr::binary(
        BinaryOp::Mul,
        Expr::binary(BinaryOp::Sub, x.clone(), min.clone())?,
        Expr::literal(bins),
    )?;

    let mut branches = vec![
        (
            Expr::unary(UnaryOp::IsNull, x.clone())?,
            Expr::typed_null(DType::Int64),
        ),
        (
            Expr::binary(BinaryOp::Eq, max, min)?,
            Expr::literal((bins + 1) / 2 - 1),
        ),
    ];
    for code in 0..bins - 1 {
        let edge = Expr::binary(BinaryOp::Mul, Expr::literal(code + 1), range.clone())?;
        branches.push((
            Expr::binary(BinaryOp::Le, offset.clone(), edge)?,
            Expr::literal(code),
        ));
    }
    Ok(Expr::case(branches, Expr::literal(bins - 1))?)
}

fn ensure_numeric(x: &Expr, op: &'static str) -> Result<(), OpError> {
    if x.dtype().is_numeric() {
        Ok(())
    } else {
        Err(OpError::NonNumeric {
            op,
            dtype: x.dtype(),
        })
    }
}
