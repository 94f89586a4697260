//! Engine-legal identifiers: the process-wide name counter and the
//! column/index label standardization used at ingestion.

use std::collections::{BTreeMap, HashSet};

use parking_lot::{Mutex, const_mutex};

/// Sentinel for a value column whose label is missing.
pub const UNNAMED_COLUMN_ID: &str = "lf_unnamed_column";
/// Sentinel for an index level whose label is missing.
pub const UNNAMED_INDEX_ID: &str = "lf_unnamed_index";
/// Columns starting with this prefix are bookkeeping and never surface as values.
pub const RESERVED_PREFIX: &str = "_lf_";
/// Total-order column added to every bound table.
pub const ORDERING_ID_COLUMN: &str = "_lf_ordering_id";

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Per-prefix monotonic counter for generated identifiers.
pub struct IdGenerator {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl IdGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: const_mutex(BTreeMap::new()),
        }
    }

    /// Next identifier for `prefix`: `prefix_0`, `prefix_1`, ...
    pub fn next_id(&self, prefix: &str) -> String {
        let mut counters = self.counters.lock();
        let slot = counters.entry(prefix.to_owned()).or_insert(0);
        let id = format!("{prefix}_{slot}");
        *slot += 1;
        id
    }

    /// Forget every counter. Test isolation hook.
    pub fn reset(&self) {
        self.counters.lock().clear();
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_IDS: IdGenerator = IdGenerator::new();

/// The process-wide generator shared by every session.
#[must_use]
pub fn global_ids() -> &'static IdGenerator {
    &GLOBAL_IDS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardizedIds {
    pub columns: Vec<String>,
    pub index: Vec<String>,
}

fn base_label(label: Option<&str>, sentinel: &str) -> String {
    match label {
        None => sentinel.to_owned(),
        Some(label) => {
            let label = label.replace(' ', "_");
            match label.strip_prefix('_') {
                Some(visible) if is_reserved(&label) => visible.to_owned(),
                _ => label,
            }
        }
    }
}

/// Map external labels to unique, engine-legal identifiers.
///
/// Missing labels become the column or index sentinel, spaces become
/// underscores, labels in the reserved `_lf_` namespace lose their leading
/// underscore, and any remaining duplicates across the combined
/// index-then-value list are suffixed `_1`, `_2`, ... in first-seen order.
#[must_use]
pub fn standardize_ids(columns: &[Option<&str>], index: &[Option<&str>]) -> StandardizedIds {
    let combined = index
        .iter()
        .map(|label| base_label(*label, UNNAMED_INDEX_ID))
        .chain(
            columns
                .iter()
                .map(|label| base_label(*label, UNNAMED_COLUMN_ID)),
        )
        .collect::<Vec<_>>();

    let mut unique = dedup_names(combined);
    let columns = unique.split_off(index.len());
    StandardizedIds {
        columns,
        index: unique,
    }
}

fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut taken = names.iter().cloned().collect::<HashSet<_>>();
    let mut emitted = HashSet::with_capacity(names.len());
    let mut next_suffix = BTreeMap::<String, usize>::new();

    names
        .into_iter()
        .map(|name| {
            if emitted.insert(name.clone()) {
                return name;
            }
            let counter = next_suffix.entry(name.clone()).or_insert(1);
            loop {
                let candidate = format!("{name}_{counter}");
                *counter += 1;
                if taken.insert(candidate.clone()) {
                    emitted.insert(candidate.clone());
                    return candidate;
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        IdGenerator, UNNAMED_COLUMN_ID, UNNAMED_INDEX_ID, is_reserved, standardize_ids,
    };

    #[test]
    fn counter_is_per_prefix_and_resettable() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_id("col"), "col_0");
        assert_eq!(ids.next_id("col"), "col_1");
        assert_eq!(ids.next_id("idx"), "idx_0");
        ids.reset();
        assert_eq!(ids.next_id("col"), "col_0");
    }

    #[test]
    fn missing_labels_map_to_distinct_sentinels() {
        let out = standardize_ids(&[None, Some("a")], &[None]);
        assert_eq!(out.index, vec![UNNAMED_INDEX_ID.to_owned()]);
        assert_eq!(out.columns, vec![UNNAMED_COLUMN_ID.to_owned(), "a".to_owned()]);
    }

    #[test]
    fn spaces_become_underscores_then_duplicates_are_suffixed() {
        let out = standardize_ids(&[Some("my col"), Some("my_col"), Some("x")], &[Some("x")]);
        assert_eq!(out.index, vec!["x".to_owned()]);
        assert_eq!(
            out.columns,
            vec!["my_col".to_owned(), "my_col_1".to_owned(), "x_1".to_owned()]
        );
    }

    #[test]
    fn suffix_skips_names_already_present() {
        let out = standardize_ids(&[Some("a"), Some("a"), Some("a_1")], &[]);
        assert_eq!(
            out.columns,
            vec!["a".to_owned(), "a_2".to_owned(), "a_1".to_owned()]
        );
    }

    #[test]
    fn reserved_labels_leave_the_internal_namespace() {
        let out = standardize_ids(&[Some("_lf_ordering_id"), Some("lf_ordering_id")], &[Some("_lf x")]);
        assert_eq!(out.index, vec!["lf_x".to_owned()]);
        assert_eq!(
            out.columns,
            vec!["lf_ordering_id".to_owned(), "lf_ordering_id_1".to_owned()]
        );
        assert!(out.columns.iter().chain(&out.index).all(|name| !is_reserved(name)));
    }

    #[test]
    fn reserved_prefix_is_detected() {
        assert!(is_reserved("_lf_ordering_id"));
        assert!(!is_reserved("lf_unnamed_column"));
    }

    fn label() -> impl Strategy<Value = Option<String>> {
        prop::option::weighted(0.8, "[a-c ]{1,3}")
    }

    proptest! {
        #[test]
        fn standardization_is_idempotent(
            columns in prop::collection::vec(label(), 0..6),
            index in prop::collection::vec(label(), 0..3),
        ) {
            let columns = columns.iter().map(Option::as_deref).collect::<Vec<_>>();
            let index = index.iter().map(Option::as_deref).collect::<Vec<_>>();
            let first = standardize_ids(&columns, &index);

            let again_cols = first.columns.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>();
            let again_idx = first.index.iter().map(|s| Some(s.as_str())).collect::<Vec<_>>();
            let second = standardize_ids(&again_cols, &again_idx);

            prop_assert_eq!(&second, &first);
            let mut all = first.index.clone();
            all.extend(first.columns.iter().cloned());
            let unique = all.iter().collect::<std::collections::HashSet<_>>();
            prop_assert_eq!(unique.len(), all.len());
            prop_assert!(all.iter().all(|name| !name.contains(' ')));
        }
    }
}
