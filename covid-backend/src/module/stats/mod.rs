//! Epidemic statistics module
//!
//! Fetches per-country statistics from the scraping provider, keeps the
//! latest dataset in memory and answers queries against it.

mod error;
pub use error::{FetchError, StoreError};

mod parser;
pub use parser::{format_timestamp, parse_dataset};

mod fetcher;
pub use fetcher::{DatasetSource, ScraperClient};

mod store;
pub use store::SnapshotStore;
