use serde::{Deserialize, Serialize};

use crate::{ExprError, WindowFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderingDirection {
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    #[must_use]
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One ordering key, by column id in the owning tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderingColumnReference {
    pub column_id: String,
    #[serde(default)]
    pub direction: OrderingDirection,
}

impl OrderingColumnReference {
    #[must_use]
    pub fn asc(column_id: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            direction: OrderingDirection::Ascending,
        }
    }

    #[must_use]
    pub fn desc(column_id: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            direction: OrderingDirection::Descending,
        }
    }
}

/// Partitioning, ordering, and frame bounds for a windowed operation.
///
/// `preceding`/`following` of `None` are unbounded. An empty `ordering`
/// falls back to the ambient row ordering of the tree the window runs over.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default)]
    pub grouping_keys: Vec<String>,
    #[serde(default)]
    pub ordering: Vec<OrderingColumnReference>,
    #[serde(default)]
    pub preceding: Option<u64>,
    #[serde(default)]
    pub following: Option<u64>,
    #[serde(default)]
    pub min_periods: u64,
}

impl WindowSpec {
    /// Whole-partition window: no frame bounds, no ordering override.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Trailing window of `size` rows ending at the current row.
    pub fn rolling(size: u64, min_periods: Option<u64>) -> Result<Self, ExprError> {
        if size == 0 {
            return Err(ExprError::InvalidArgument(
                "rolling window size must be positive".to_owned(),
            ));
        }
        Ok(Self {
            preceding: Some(size - 1),
            following: Some(0),
            min_periods: min_periods.unwrap_or(size),
            ..Self::default()
        })
    }

    /// Running window from the partition start to the current row.
    #[must_use]
    pub fn cumulative() -> Self {
        Self {
            preceding: None,
            following: Some(0),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_grouping_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grouping_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_ordering(mut self, ordering: Vec<OrderingColumnReference>) -> Self {
        self.ordering = ordering;
        self
    }

    #[must_use]
    pub fn with_min_periods(mut self, min_periods: u64) -> Self {
        self.min_periods = min_periods;
        self
    }

    #[must_use]
    pub fn is_row_bounded(&self) -> bool {
        self.preceding.is_some() || self.following.is_some()
    }

    /// Frame for the rendered window; `None` when the whole partition is in scope.
    #[must_use]
    pub fn frame(&self) -> Option<WindowFrame> {
        self.is_row_bounded().then_some(WindowFrame {
            preceding: self.preceding,
            following: self.following,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{OrderingColumnReference, OrderingDirection, WindowSpec};
    use crate::WindowFrame;

    #[test]
    fn rolling_defaults_min_periods_to_window_size() {
        let spec = WindowSpec::rolling(3, None).expect("spec");
        assert_eq!(spec.min_periods, 3);
        assert_eq!(
            spec.frame(),
            Some(WindowFrame {
                preceding: Some(2),
                following: Some(0)
            })
        );
    }

    #[test]
    fn zero_sized_rolling_window_is_rejected() {
        assert!(WindowSpec::rolling(0, None).is_err());
    }

    #[test]
    fn unbounded_spec_has_no_frame() {
        assert_eq!(WindowSpec::unbounded().frame(), None);
        assert!(WindowSpec::cumulative().is_row_bounded());
    }

    #[test]
    fn builders_set_keys_and_ordering() {
        let spec = WindowSpec::cumulative()
            .with_grouping_keys(["g"])
            .with_ordering(vec![OrderingColumnReference::desc("ts")]);
        assert_eq!(spec.grouping_keys, vec!["g".to_owned()]);
        assert_eq!(spec.ordering[0].direction, OrderingDirection::Descending);
        assert_eq!(spec.ordering[0].direction.reversed().sql_keyword(), "ASC");
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: WindowSpec =
            serde_json::from_str(r#"{"preceding": 1, "min_periods": 1}"#).expect("json");
        assert_eq!(spec.following, None);
        assert!(spec.grouping_keys.is_empty());
        assert_eq!(spec.min_periods, 1);
    }
}
