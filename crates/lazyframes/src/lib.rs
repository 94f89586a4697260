#![forbid(unsafe_code)]

//! Lazy, pandas-flavoured DataFrames over a SQL engine.
//!
//! ```text
//! Session::read_table("project.dataset.table")   binds a table, no query
//! Session::read_query("SELECT ...")              nests the SQL, runs nothing
//!   -> DataFrame / Series operations              build an expression tree
//!   -> to_local()                                 compiles and runs one query
//! ```
//!
//! The building blocks live in their own crates and are re-exported here:
//! scalar types ([`lf_types`]), realized columns ([`lf_columnar`]), row
//! labels ([`lf_index`]), expressions and SQL rendering ([`lf_expr`]),
//! pandas-semantics operations ([`lf_ops`]), the lazy core ([`lf_core`]),
//! usage tracking ([`lf_runtime`]), the front-end ([`lf_frame`]) and
//! sessions ([`lf_session`]).

pub use lf_columnar::{Column, ColumnError, RealizedTable};
pub use lf_core::{
    Block, ClientError, CompiledQuery, CoreError, ExpressionTree, LocalEngine, LocalFrame,
    QueryClient, QueryJob, RowIdentity,
};
pub use lf_expr::{
    BaseTableRef, ColumnExpr, Expr, ExprError, OrderingColumnReference, OrderingDirection, QueryRef,
    Schema, TableId, WindowSpec, standardize_ids,
};
pub use lf_frame::{
    DataFrame, FrameError, GroupBy, Operand, Rolling, Series, SharedClient, concat, concat_series,
};
pub use lf_index::{Index, IndexLabel};
pub use lf_ops::{AggregateOp, OpError, WindowOp};
pub use lf_runtime::{ApiUsageSnapshot, api_call, global_usage};
pub use lf_session::{
    ReadTableOptions, Session, SessionConfig, SessionError, default_session, reset_session,
    set_default_session,
};
pub use lf_types::{DType, NullKind, Scalar};

pub mod prelude {
    pub use crate::{
        AggregateOp, DataFrame, LocalEngine, ReadTableOptions, Scalar, Series, Session,
        SessionConfig, concat,
    };
}
