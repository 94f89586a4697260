#![forbid(unsafe_code)]

//! Lazy `DataFrame` and `Series`.
//!
//! Both are thin handles over a [`Block`]: every method builds a new Block
//! (and so a new expression tree) and nothing runs until `to_local`, a
//! reduction, or another call that needs rows. Each public method is routed
//! through [`lf_runtime::api_call`] so usage is recorded per class.

use std::sync::Arc;

use lf_core::{Block, CoreError, QueryClient};
use lf_expr::{Expr, ExprError};
use lf_ops::OpError;
use lf_types::{Scalar, TypeError};
use thiserror::Error;

pub mod frame;
pub mod reshape;
pub mod series;
pub mod window;

pub use frame::DataFrame;
pub use reshape::{concat, concat_series};
pub use series::Series;
pub use window::{GroupBy, Rolling};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("a Series holds exactly one value column, found {0}")]
    NotASeries(usize),
    #[error("reduction {0} returned no rows")]
    EmptyReduction(&'static str),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Shared handle to the engine every object of one session submits to.
pub type SharedClient = Arc<dyn QueryClient>;

/// Right-hand side of an element-wise operation.
#[derive(Debug, Clone)]
pub enum Operand<'a> {
    Series(&'a Series),
    Scalar(Scalar),
}

impl<'a> From<&'a Series> for Operand<'a> {
    fn from(value: &'a Series) -> Self {
        Self::Series(value)
    }
}

impl From<Scalar> for Operand<'_> {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<i64> for Operand<'_> {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int64(value))
    }
}

impl From<f64> for Operand<'_> {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::Float64(value))
    }
}

impl From<bool> for Operand<'_> {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<&str> for Operand<'_> {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::from(value))
    }
}

impl Operand<'_> {
    /// Resolve against `block`: a Series must share `block`'s rows and index.
    pub(crate) fn resolve(&self, block: &Block) -> Result<Expr, FrameError> {
        match self {
            Self::Series(series) => Ok(block.align_column(series.block(), series.name())?),
            Self::Scalar(value) => Ok(Expr::literal(value.clone())),
        }
    }
}

/// Construct a front-end object from a Block and the session's client.
pub trait FromBlock: Sized {
    fn from_block(block: Block, client: SharedClient) -> Result<Self, FrameError>;
}
