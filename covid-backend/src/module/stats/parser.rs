//! Turns a scraping provider response body into a stamped dataset

use chrono::{DateTime, Utc};
use covid_common::{Dataset, Record};

use super::error::FetchError;

/// Render a refresh time the way it appears in the `Last Update` field.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Parse the provider's JSON array and stamp it with `fetched_at`.
///
/// An array without records is rejected: the first record is the World
/// fallback and queries cannot be answered without it.
pub fn parse_dataset(body: &str, fetched_at: DateTime<Utc>) -> Result<Dataset, FetchError> {
    let records: Vec<Record> = serde_json::from_str(body)?;
    let dataset = Dataset::from_records(records);

    if dataset.is_empty() {
        return Err(FetchError::EmptyDataset);
    }

    Ok(dataset.stamped(format_timestamp(fetched_at)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 5, 9).unwrap()
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(fetched_at()), "2026-10-19 08:05:09 UTC");
    }

    #[test]
    fn test_parse_stamps_dataset() {
        let body = r#"[{"Country_text":"World","Cases":"100"},{"Country_text":"Italy","Cases":"10"}]"#;
        let dataset = parse_dataset(body, fetched_at()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.world().unwrap().get("Cases"), Some("100"));
        assert_eq!(dataset.last_update(), Some("2026-10-19 08:05:09 UTC"));
    }

    #[test]
    fn test_parse_replaces_upstream_timestamp() {
        let body = r#"[{"Country_text":"World"},{"Last Update":"yesterday"}]"#;
        let dataset = parse_dataset(body, fetched_at()).unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.last_update(), Some("2026-10-19 08:05:09 UTC"));
    }

    #[test]
    fn test_parse_rejects_malformed_body() {
        for body in ["", "<html>busy</html>", r#"{"Country_text":"World"}"#, r#"[{"Cases":100}]"#] {
            let err = parse_dataset(body, fetched_at()).unwrap_err();
            assert!(matches!(err, FetchError::Parse(_)), "body {body:?} gave {err}");
            assert_eq!(err.kind(), "parse");
        }
    }

    #[test]
    fn test_parse_rejects_empty_array() {
        let err = parse_dataset("[]", fetched_at()).unwrap_err();
        assert!(matches!(err, FetchError::EmptyDataset));
        assert_eq!(err.kind(), "parse");
    }
}
