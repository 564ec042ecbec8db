//! Turns the records of one day into a single displayable markdown string.
//!
//! Each record contributes at most one text, chosen from a fixed list of
//! locations in priority order. Texts that look like a status message from the
//! ingestion service rather than real log content are dropped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::DataRecord;

/// Placed between the contributions of consecutive records.
pub const SEPARATOR: &str = "\n\n---\n\n";

// Matched against the lower-cased text, so the phrases stay lower-case literals.
static ARTIFACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"data already exists|api response|fetch result|successfully fetched|items processed",
    )
    .expect("artifact pattern compiles")
});

/// Where a record's text was taken from, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    ProcessedCleanedMarkdown,
    OriginalResponseMarkdown,
    CleanedMarkdown,
    Markdown,
    OriginalLifelogMarkdown,
    Content,
}

impl ContentSource {
    pub const ALL: [ContentSource; 6] = [
        ContentSource::ProcessedCleanedMarkdown,
        ContentSource::OriginalResponseMarkdown,
        ContentSource::CleanedMarkdown,
        ContentSource::Markdown,
        ContentSource::OriginalLifelogMarkdown,
        ContentSource::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSource::ProcessedCleanedMarkdown => "metadata.processed_response.cleaned_markdown",
            ContentSource::OriginalResponseMarkdown => "metadata.original_response.markdown",
            ContentSource::CleanedMarkdown => "metadata.cleaned_markdown",
            ContentSource::Markdown => "metadata.markdown",
            ContentSource::OriginalLifelogMarkdown => "metadata.original_lifelog.markdown",
            ContentSource::Content => "content",
        }
    }

    fn lookup<'a>(&self, record: &'a DataRecord) -> Option<&'a str> {
        let meta = &record.metadata;
        let value = match self {
            ContentSource::ProcessedCleanedMarkdown => {
                meta.get("processed_response").and_then(|v| v.get("cleaned_markdown"))
            }
            ContentSource::OriginalResponseMarkdown => {
                meta.get("original_response").and_then(|v| v.get("markdown"))
            }
            ContentSource::CleanedMarkdown => meta.get("cleaned_markdown"),
            ContentSource::Markdown => meta.get("markdown"),
            ContentSource::OriginalLifelogMarkdown => {
                meta.get("original_lifelog").and_then(|v| v.get("markdown"))
            }
            ContentSource::Content => return record.content.as_deref().filter(|t| populated(t)),
        };
        value.and_then(Value::as_str).filter(|t| populated(t))
    }
}

fn populated(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Outcome of picking a candidate text for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<'a> {
    Accepted { source: ContentSource, text: &'a str },
    Rejected { source: ContentSource, text: &'a str },
    Missing,
}

impl<'a> Selection<'a> {
    pub fn text(&self) -> Option<&'a str> {
        match self {
            Selection::Accepted { text, .. } => Some(*text),
            _ => None,
        }
    }
}

/// True when the text reads like output of the ingestion API instead of log content.
pub fn is_artifact(text: &str) -> bool {
    ARTIFACT_RE.is_match(&text.to_lowercase())
}

/// Pick the highest-priority populated field of `record` and validate it.
/// A rejected candidate does not fall through to lower-priority fields.
pub fn select_content(record: &DataRecord) -> Selection<'_> {
    let found = ContentSource::ALL
        .iter()
        .find_map(|source| source.lookup(record).map(|text| (*source, text)));
    match found {
        Some((source, text)) if is_artifact(text) => Selection::Rejected { source, text },
        Some((source, text)) => Selection::Accepted { source, text },
        None => Selection::Missing,
    }
}

/// Combine the accepted texts of `records`, in order, joined by [`SEPARATOR`].
/// Returns an empty string when no record contributed anything.
pub fn extract_combined(records: &[DataRecord]) -> String {
    records
        .iter()
        .filter_map(|record| select_content(record).text())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}
