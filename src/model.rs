use chrono::{Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid date key '{0}': expected YYYY-MM-DD")]
pub struct DateKeyError(pub String);

/// One logical day of content, always in canonical `YYYY-MM-DD` form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DateKey(String);

impl DateKey {
    pub fn parse(raw: &str) -> Result<Self, DateKeyError> {
        let trimmed = raw.trim();
        // chrono accepts unpadded fields, so require the exact width as well
        if trimmed.len() != 10 {
            return Err(DateKeyError(raw.to_string()));
        }
        let date = NaiveDate::parse_from_str(trimmed, DATE_KEY_FORMAT)
            .map_err(|_| DateKeyError(raw.to_string()))?;
        Ok(Self::from_date(date))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format(DATE_KEY_FORMAT).to_string())
    }

    pub fn today() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DateKey {
    type Err = DateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Record identifiers are owned by the ingestion service and may be numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

/// A single personal-log record as returned by the calendar data endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub days_date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub content: Option<String>,
}

// The schema is owned by the ingestion service; an explicit null reads as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl DataRecord {
    /// Identifier for logs and listings; `-` when the server sent none.
    pub fn display_id(&self) -> String {
        self.id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn belongs_to(&self, date: &DateKey) -> bool {
        self.days_date == date.as_str()
    }
}

/// Body returned by the ingestion trigger endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Observable state of a [`crate::fetcher::DigestFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchState {
    /// Combined markdown for the current day; empty means nothing to show.
    pub markdown_content: String,
    pub loading: bool,
    pub auto_fetching: bool,
    pub fetch_error: Option<String>,
    /// Days for which an ingestion trigger has already been issued this session.
    pub fetch_attempted: BTreeSet<String>,
}

impl Default for FetchState {
    fn default() -> Self {
        Self {
            markdown_content: String::new(),
            loading: true,
            auto_fetching: false,
            fetch_error: None,
            fetch_attempted: BTreeSet::new(),
        }
    }
}
