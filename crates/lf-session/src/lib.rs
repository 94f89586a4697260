#![forbid(unsafe_code)]

//! Entry point for building lazy DataFrames.
//!
//! A [`Session`] owns the query client and the configuration. It binds
//! remote tables by `project.dataset.table` id or raw SQL text and uploads
//! local data to a temporary table, in every case giving the result a
//! deterministic total ordering before handing back a [`DataFrame`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lf_columnar::{Column, ColumnError, RealizedTable};
use lf_core::{Block, ClientError, CoreError, ExpressionTree, LocalFrame, QueryClient};
use lf_expr::{
    BaseTableRef, ORDERING_ID_COLUMN, QueryRef, SortExpr, TableId, global_ids, standardize_ids,
};
use lf_frame::{DataFrame, FrameError, SharedClient};
use lf_runtime::{ApiUsageSnapshot, global_usage};
use lf_types::Scalar;
use parking_lot::{Mutex, const_mutex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;

pub use config::SessionConfig;

/// Prefix of tables created by [`Session::read_local`].
const UPLOAD_PREFIX: &str = "lf_upload";

/// Front-end classes whose usage labels a session reports.
const TRACKED_CLASSES: [&str; 4] = ["DataFrame", "Series", "GroupBy", "Rolling"];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed table id {0:?}: expected project.dataset.table")]
    MalformedTableId(String),
    #[error("uploading local data needs a project; set one in SessionConfig")]
    MissingProject,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Options of [`Session::read_table`] and [`Session::read_query`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadTableOptions {
    /// Column to use as the index. Without one the index is positional.
    pub index_col: Option<String>,
    /// Value columns to keep, in this order.
    pub columns: Option<Vec<String>>,
    /// Upper bound on the rows read.
    pub max_results: Option<u64>,
}

impl ReadTableOptions {
    #[must_use]
    pub fn with_index_col(mut self, index_col: impl Into<String>) -> Self {
        self.index_col = Some(index_col.into());
        self
    }

    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    client: SharedClient,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Applies `config.max_api_labels` to the process-wide usage log.
    pub fn new(config: SessionConfig, client: SharedClient) -> Self {
        global_usage().set_capacity(config.max_api_labels);
        #[cfg(feature = "tracing")]
        tracing::info!(
            project = config.project.as_deref().unwrap_or(""),
            location = %config.location,
            "session created"
        );
        Self { config, client }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    /// Bind a remote table as a lazy DataFrame.
    ///
    /// `id` is `project.dataset.table`; `project:dataset.table` is accepted
    /// too. A malformed id fails before the client is contacted.
    pub fn read_table(&self, id: &str, options: &ReadTableOptions) -> Result<DataFrame, SessionError> {
        let table_id = id
            .parse::<TableId>()
            .map_err(|_| SessionError::MalformedTableId(id.to_owned()))?;
        let schema = self.client.get_table(&table_id)?;
        let tree = ExpressionTree::new(BaseTableRef::bind(table_id, schema), None)?;
        self.bind(tree, options)
    }

    /// Bind the result of a SQL query as a lazy DataFrame.
    ///
    /// The query is nested as a sub-select and never run on its own. Rows
    /// get the same deterministic ordering as [`Session::read_table`].
    pub fn read_query(&self, sql: &str, options: &ReadTableOptions) -> Result<DataFrame, SessionError> {
        let schema = self.client.query_schema(sql)?;
        let tree = ExpressionTree::from_query(QueryRef::bind(sql, schema))?;
        self.bind(tree, options)
    }

    /// [`Session::read_query`] when `query_or_table` contains whitespace,
    /// [`Session::read_table`] otherwise.
    pub fn read(&self, query_or_table: &str, options: &ReadTableOptions) -> Result<DataFrame, SessionError> {
        let text = query_or_table.trim();
        if text.contains(char::is_whitespace) {
            self.read_query(text, options)
        } else {
            self.read_table(text, options)
        }
    }

    fn bind(&self, tree: ExpressionTree, options: &ReadTableOptions) -> Result<DataFrame, SessionError> {
        let mut block = Block::new(tree.with_ordering_id()?, Vec::new())?;
        if let Some(index_col) = &options.index_col {
            block = block.set_index(index_col)?;
        }
        if let Some(columns) = &options.columns {
            let names = columns.iter().map(String::as_str).collect::<Vec<_>>();
            block = block.select_columns(&names)?;
        }
        if let Some(max_results) = options.max_results {
            block = block.head(max_results)?;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(columns = block.value_column_names().len(), "source bound");
        Ok(DataFrame::new(block, self.client.clone()))
    }

    /// Upload realized rows and bind them as a lazy DataFrame.
    ///
    /// Column and index labels are standardized to engine-legal ids. The
    /// index is uploaded as a column and keeps its original display name;
    /// the rows keep their local order.
    pub fn read_local(&self, frame: &LocalFrame) -> Result<DataFrame, SessionError> {
        let project = self.config.project.as_deref().ok_or(SessionError::MissingProject)?;
        let table = frame.table();
        let labels = table.names().iter().map(|name| Some(name.as_str())).collect::<Vec<_>>();
        let ids = standardize_ids(&labels, &[frame.index().name()]);

        let mut names = ids.index.clone();
        let mut columns = vec![frame.index().to_column()?];
        names.extend(ids.columns.iter().cloned());
        columns.extend(table.columns().iter().cloned());
        names.push(ORDERING_ID_COLUMN.to_owned());
        columns.push(Column::from_values(
            (0..table.num_rows())
                .map(|position| Scalar::Int64(i64::try_from(position).unwrap_or(i64::MAX)))
                .collect(),
        )?);
        let upload = RealizedTable::new(names, columns)?;

        let table_id = TableId::new(
            project,
            self.config.temp_dataset.as_str(),
            global_ids().next_id(UPLOAD_PREFIX),
        );
        self.client.upload(&table_id, &upload)?;
        let schema = self.client.get_table(&table_id)?;
        let tree = ExpressionTree::new(BaseTableRef::bind(table_id, schema), None)?;
        let ordering = tree.get_column(ORDERING_ID_COLUMN)?.expr().clone();
        let tree = tree.with_ordering(vec![SortExpr::asc(ordering)])?;
        let mut block = Block::new(tree, ids.index)?;
        block.set_index_name(frame.index().name().map(str::to_owned));
        Ok(DataFrame::new(block, self.client.clone()))
    }

    /// Drain the usage labels recorded since the last call, per class.
    pub fn take_api_usage(&self) -> ApiUsageSnapshot {
        let classes = TRACKED_CLASSES
            .iter()
            .map(|class| ((*class).to_owned(), global_usage().take(class)))
            .filter(|(_, methods)| !methods.is_empty())
            .collect::<BTreeMap<_, _>>();
        ApiUsageSnapshot { classes }
    }
}

static DEFAULT_SESSION: Mutex<Option<Session>> = const_mutex(None);

/// Install `session` as the process-wide default, returning the previous one.
pub fn set_default_session(session: Session) -> Option<Session> {
    DEFAULT_SESSION.lock().replace(session)
}

#[must_use]
pub fn default_session() -> Option<Session> {
    DEFAULT_SESSION.lock().clone()
}

/// Drop the default session and clear the API usage log.
pub fn reset_session() -> Option<Session> {
    let previous = DEFAULT_SESSION.lock().take();
    global_usage().reset();
    #[cfg(feature = "tracing")]
    tracing::info!(had_session = previous.is_some(), "session reset");
    previous
}

/// The default session, created over `client` from the environment when
/// none is installed yet.
pub fn default_session_or_init(client: impl FnOnce() -> Arc<dyn QueryClient>) -> Session {
    let mut slot = DEFAULT_SESSION.lock();
    slot.get_or_insert_with(|| Session::new(SessionConfig::from_env(), client()))
        .clone()
}
