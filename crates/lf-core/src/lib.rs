#![forbid(unsafe_code)]

//! The lazy core: an immutable [`ExpressionTree`] plan, the [`RowIdentity`]
//! index derived from it, and the mutable [`Block`] handle that front-end
//! objects hold.
//!
//! Nothing here touches data until [`ExpressionTree::materialize`] (or
//! [`Block::compute`]) hands a compiled query to a [`QueryClient`].

use lf_columnar::ColumnError;
use lf_expr::ExprError;
use lf_ops::OpError;
use thiserror::Error;

pub mod block;
pub mod client;
pub mod index;
pub mod local;
pub mod tree;

pub use block::{Block, LocalFrame};
pub use client::{ClientError, QueryClient, QueryJob};
pub use index::RowIdentity;
pub use local::LocalEngine;
pub use tree::{CompiledQuery, ExpressionTree, Source};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("KeyError: column {0:?} not found")]
    UnknownColumn(String),
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("column {column:?} reads from a relation outside this expression tree")]
    ForeignColumn { column: String },
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}
