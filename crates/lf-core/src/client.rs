use lf_columnar::RealizedTable;
use lf_expr::{Schema, TableId};
use thiserror::Error;

use crate::tree::CompiledQuery;

/// Failures reported by a query client. The core forwards these unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("query execution failed: {0}")]
    Execution(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A submitted query. Waiting blocks until rows are available.
pub trait QueryJob: Send {
    fn job_id(&self) -> &str;

    fn wait(self: Box<Self>) -> Result<RealizedTable, ClientError>;
}

/// The remote engine as seen by the core. Retries, backoff and
/// cancellation all live behind this trait.
pub trait QueryClient: Send + Sync {
    fn submit(&self, query: &CompiledQuery) -> Result<Box<dyn QueryJob>, ClientError>;

    fn get_table(&self, id: &TableId) -> Result<Schema, ClientError>;

    /// Schema of the rows `sql` would return, without running it.
    fn query_schema(&self, sql: &str) -> Result<Schema, ClientError>;

    /// Store `table` under `id`, replacing anything already there.
    fn upload(&self, id: &TableId, table: &RealizedTable) -> Result<(), ClientError>;
}
