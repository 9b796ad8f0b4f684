//! Snapshot store
//!
//! Holds the dataset currently served to clients. The refresh path is the
//! only writer and replaces the whole dataset with one pointer swap;
//! readers take a snapshot with one load and never see a mix of two
//! datasets.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use covid_common::{DEFAULT_COUNTRY_FIELD, Dataset, LAST_UPDATE_FIELD, Record};

use super::error::StoreError;

pub struct SnapshotStore {
    current: ArcSwapOption<Dataset>,
    /// Record field compared against requested country names
    country_field: String,
}

impl SnapshotStore {
    pub fn new(country_field: impl Into<String>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            country_field: country_field.into(),
        }
    }

    /// Make `dataset` the one served to every query started from now on.
    pub fn publish(&self, dataset: Dataset) {
        self.current.store(Some(Arc::new(dataset)));
    }

    /// The whole current dataset.
    pub fn query_all(&self) -> Result<Arc<Dataset>, StoreError> {
        self.current.load_full().ok_or(StoreError::Unavailable)
    }

    /// The first record whose country matches `name` ignoring case, or the
    /// World record when nothing matches. The dataset's refresh time is
    /// merged into the answer.
    pub fn query_country(&self, name: &str) -> Result<Record, StoreError> {
        let dataset = self.query_all()?;

        let record = match dataset.find(&self.country_field, name) {
            Some(record) => record,
            None => {
                tracing::debug!("No statistics for '{}', answering with World", name);
                dataset.world().ok_or(StoreError::Unavailable)?
            }
        };

        let mut answer = record.clone();
        if let Some(timestamp) = dataset.last_update() {
            answer.insert(LAST_UPDATE_FIELD, timestamp);
        }
        Ok(answer)
    }

    pub fn is_ready(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn last_update(&self) -> Option<String> {
        self.current
            .load_full()
            .and_then(|dataset| dataset.last_update().map(str::to_string))
    }

    pub fn country_field(&self) -> &str {
        &self.country_field
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_FIELD)
    }
}
