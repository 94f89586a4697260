use lf_columnar::RealizedTable;
use lf_expr::{AggregateFunc, ColumnExpr, Expr};
use lf_index::Index;

use crate::CoreError;
use crate::block::LocalFrame;
use crate::client::QueryClient;
use crate::tree::ExpressionTree;

/// Row labels of a [`Block`](crate::Block), derived from its tree.
///
/// With no index column the rows are labelled by position. With one index
/// column the labels are that column's values. Deriving never runs a query;
/// [`RowIdentity::compute`] does.
#[derive(Debug, Clone)]
pub struct RowIdentity {
    tree: ExpressionTree,
    column: Option<String>,
    name: Option<String>,
}

impl RowIdentity {
    /// Derive from `index_columns` of `tree`. Multi-column (hierarchical)
    /// indexes are not supported.
    pub fn derive(
        tree: &ExpressionTree,
        index_columns: &[String],
        name: Option<String>,
    ) -> Result<Self, CoreError> {
        match index_columns {
            [] => Ok(Self {
                tree: tree.clone(),
                column: None,
                name: None,
            }),
            [column] => {
                tree.get_column(column)?;
                Ok(Self {
                    tree: tree.clone(),
                    column: Some(column.clone()),
                    name,
                })
            }
            _ => Err(CoreError::NotImplemented(format!(
                "multi-column index {index_columns:?}"
            ))),
        }
    }

    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.column.is_none()
    }

    #[must_use]
    pub fn column_id(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Display name of the index. Implicit indexes are unnamed.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn with_name(&self, name: Option<String>) -> Self {
        Self {
            name: if self.column.is_some() { name } else { None },
            ..self.clone()
        }
    }

    #[must_use]
    pub fn tree(&self) -> &ExpressionTree {
        &self.tree
    }

    /// The label expression, or `None` for a positional index.
    #[must_use]
    pub fn expr(&self) -> Option<&Expr> {
        let column = self.column.as_deref()?;
        self.tree.get_column(column).ok().map(ColumnExpr::expr)
    }

    /// Fetch the labels. A positional index only needs the row count.
    pub fn compute(&self, client: &dyn QueryClient) -> Result<Index, CoreError> {
        match &self.column {
            Some(column) => {
                let labels = self
                    .tree
                    .projection(vec![self.tree.get_column(column)?.clone()])?
                    .materialize(client)?;
                let values = labels
                    .column(column)
                    .ok_or_else(|| CoreError::UnknownColumn(column.clone()))?;
                Ok(Index::from_column(values).with_name(self.name.clone()))
            }
            None => Ok(Index::range(self.row_count(client)?)),
        }
    }

    fn row_count(&self, client: &dyn QueryClient) -> Result<usize, CoreError> {
        let base = if self.tree.needs_promotion() {
            self.tree.to_subquery()
        } else {
            self.tree.clone()
        };
        let count = ColumnExpr::new("count", Expr::aggregate(AggregateFunc::CountStar, None)?);
        let table = base.aggregate(Vec::new(), vec![count])?.materialize(client)?;
        let value = table
            .column("count")
            .and_then(|column| column.value(0))
            .ok_or_else(|| CoreError::InvalidArgument("row count query returned no rows".to_owned()))?;
        let count = value
            .to_i64()
            .map_err(|err| CoreError::InvalidArgument(err.to_string()))?;
        usize::try_from(count).map_err(|err| CoreError::InvalidArgument(err.to_string()))
    }

    /// Split fetched rows into labels and values. `table` must carry the
    /// index column when the index is labelled.
    pub(crate) fn relabel(&self, table: RealizedTable) -> Result<LocalFrame, CoreError> {
        match &self.column {
            Some(column) => {
                let (labels, values) = table.remove(column)?;
                Ok(LocalFrame::new(
                    Index::from_column(&labels).with_name(self.name.clone()),
                    values,
                ))
            }
            None => Ok(LocalFrame::new(Index::range(table.num_rows()), table)),
        }
    }
}
