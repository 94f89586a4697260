#![forbid(unsafe_code)]

//! Front-end API usage tracking.
//!
//! Every public DataFrame/Series method runs through [`api_call`], which
//! records `(class, method)` in a bounded per-class log. Sessions read the
//! log with [`ApiUsageLog::take`] to attach usage labels to the jobs they
//! submit.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, const_mutex};
use serde::{Deserialize, Serialize};

/// Most recent method names kept per class.
pub const MAX_LABELS_PER_CLASS: usize = 64;

/// Point-in-time copy of the log, newest call first within each class.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsageSnapshot {
    pub classes: BTreeMap<String, Vec<String>>,
}

impl ApiUsageSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.values().all(Vec::is_empty)
    }
}

#[derive(Debug)]
pub struct ApiUsageLog {
    capacity: AtomicUsize,
    entries: Mutex<BTreeMap<String, VecDeque<String>>>,
}

impl Default for ApiUsageLog {
    fn default() -> Self {
        Self::new(MAX_LABELS_PER_CLASS)
    }
}

impl ApiUsageLog {
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            entries: const_mutex(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change the per-class bound. Existing lists are truncated to fit.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
        for methods in self.entries.lock().values_mut() {
            methods.truncate(capacity);
        }
    }

    pub fn record(&self, class: &str, method: &str) {
        let capacity = self.capacity();
        let mut entries = self.entries.lock();
        let methods = entries.entry(class.to_owned()).or_default();
        methods.push_front(method.to_owned());
        methods.truncate(capacity);
    }

    /// Recorded methods for `class`, newest first.
    #[must_use]
    pub fn labels(&self, class: &str) -> Vec<String> {
        self.entries
            .lock()
            .get(class)
            .map(|methods| methods.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drain and return the methods recorded for `class`.
    pub fn take(&self, class: &str) -> Vec<String> {
        self.entries
            .lock()
            .remove(class)
            .map(Vec::from)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn snapshot(&self) -> ApiUsageSnapshot {
        ApiUsageSnapshot {
            classes: self
                .entries
                .lock()
                .iter()
                .map(|(class, methods)| (class.clone(), methods.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Forget everything. Used by session reset and test teardown.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

static GLOBAL_USAGE: ApiUsageLog = ApiUsageLog::new(MAX_LABELS_PER_CLASS);

/// The process-wide log written by [`api_call`].
#[must_use]
pub fn global_usage() -> &'static ApiUsageLog {
    &GLOBAL_USAGE
}

/// Record `class.method` and run `body`.
pub fn api_call<T>(class: &'static str, method: &'static str, body: impl FnOnce() -> T) -> T {
    GLOBAL_USAGE.record(class, method);
    #[cfg(feature = "tracing")]
    tracing::trace!(class, method, "api call");
    body()
}
