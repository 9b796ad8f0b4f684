//! Data model shared by the statistics service and its clients.

mod types;

pub use types::{DEFAULT_COUNTRY_FIELD, Dataset, LAST_UPDATE_FIELD, Record};
