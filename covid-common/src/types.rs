use serde::de::{MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Field carrying the time of the refresh that produced a dataset
pub const LAST_UPDATE_FIELD: &str = "Last Update";

/// Field the scraping template uses for the country name
pub const DEFAULT_COUNTRY_FIELD: &str = "Country_text";

/// One flat row of named string fields.
///
/// Fields keep the order they arrived in, so a record serializes back
/// exactly as the provider produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the single-field record that closes a refreshed dataset.
    pub fn last_update_sentinel(timestamp: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.insert(LAST_UPDATE_FIELD, timestamp);
        record
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Set a field, replacing the value in place if the field already exists.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Case-insensitive comparison of `field` against `wanted`.
    /// A record without the field never matches.
    pub fn matches(&self, field: &str, wanted: &str) -> bool {
        self.get(field)
            .is_some_and(|value| value.to_lowercase() == wanted.to_lowercase())
    }

    /// Timestamp carried by a sentinel record, `None` for country rows.
    pub fn as_last_update(&self) -> Option<&str> {
        match self.fields.as_slice() {
            [(name, value)] if name == LAST_UPDATE_FIELD => Some(value),
            _ => None,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (field, value) in iter {
            record.insert(field, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a flat object of string fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
        let mut record = Record {
            fields: Vec::with_capacity(access.size_hint().unwrap_or(0)),
        };
        while let Some((field, value)) = access.next_entry::<String, String>()? {
            record.insert(field, value);
        }
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

/// The ordered set of country records served to clients.
///
/// The first record is the World aggregate. The refresh timestamp is kept
/// apart from the country rows and only becomes the trailing sentinel
/// record on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    records: Vec<Record>,
    last_update: Option<String>,
}

impl Dataset {
    /// Build a dataset from wire-order records. A trailing sentinel is
    /// lifted out into the dataset's timestamp.
    pub fn from_records(mut records: Vec<Record>) -> Self {
        let last_update = records
            .last()
            .and_then(Record::as_last_update)
            .map(str::to_string);
        if last_update.is_some() {
            records.pop();
        }
        Self { records, last_update }
    }

    /// Attach the refresh timestamp, replacing any previous one.
    pub fn stamped(mut self, timestamp: impl Into<String>) -> Self {
        self.last_update = Some(timestamp.into());
        self
    }

    /// Country records, World first.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn last_update(&self) -> Option<&str> {
        self.last_update.as_deref()
    }

    /// The fallback record at index 0.
    pub fn world(&self) -> Option<&Record> {
        self.records.first()
    }

    /// First record, in dataset order, whose `field` equals `name`
    /// ignoring case.
    pub fn find(&self, field: &str, name: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.matches(field, name))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of country records, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sentinel = self.last_update.as_deref().map(Record::last_update_sentinel);
        let total = self.records.len() + usize::from(sentinel.is_some());

        let mut seq = serializer.serialize_seq(Some(total))?;
        for record in &self.records {
            seq.serialize_element(record)?;
        }
        if let Some(sentinel) = &sentinel {
            seq.serialize_element(sentinel)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Dataset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Record>::deserialize(deserializer).map(Self::from_records)
    }
}
