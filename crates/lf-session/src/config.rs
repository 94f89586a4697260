use lf_runtime::MAX_LABELS_PER_CLASS;
use serde::{Deserialize, Serialize};

use crate::SessionError;

pub const PROJECT_ENV: &str = "LAZYFRAMES_PROJECT";
pub const LOCATION_ENV: &str = "LAZYFRAMES_LOCATION";
pub const TEMP_DATASET_ENV: &str = "LAZYFRAMES_TEMP_DATASET";

/// Where a session runs and where it stages uploaded data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Billing project, also the project of uploaded tables.
    pub project: Option<String>,
    pub location: String,
    /// Dataset that receives tables created by `read_local`.
    pub temp_dataset: String,
    /// Per-class bound of the API usage log.
    pub max_api_labels: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            project: None,
            location: "US".to_owned(),
            temp_dataset: "lazyframes_temp".to_owned(),
            max_api_labels: MAX_LABELS_PER_CLASS,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON object. Missing keys keep their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Defaults overridden by `LAZYFRAMES_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`SessionConfig::from_env`] with an explicit variable source.
    /// Empty values count as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let mut config = Self::default();
        if let Some(project) = read(PROJECT_ENV) {
            config.project = Some(project);
        }
        if let Some(location) = read(LOCATION_ENV) {
            config.location = location;
        }
        if let Some(dataset) = read(TEMP_DATASET_ENV) {
            config.temp_dataset = dataset;
        }
        config
    }

    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    #[must_use]
    pub fn with_temp_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.temp_dataset = dataset.into();
        self
    }

    #[must_use]
    pub fn with_max_api_labels(mut self, max_api_labels: usize) -> Self {
        self.max_api_labels = max_api_labels;
        self
    }
}
