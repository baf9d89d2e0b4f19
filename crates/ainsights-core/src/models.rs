//! Core data models that flow through ingestion and retrieval.
//!
//! A [`Document`] is immutable once ingested; re-ingesting the same id
//! supersedes it. Chunking a document yields [`Segment`]s, each owned by
//! exactly one document and discarded together with it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Where a document's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// CSV/TSV exports and tabular summaries.
    Tabular,
    /// Written reports (market reports, briefs).
    Report,
    /// Anything else readable as plain text.
    Text,
}

impl SourceType {
    /// Guess the source type from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" => SourceType::Tabular,
            "md" | "markdown" => SourceType::Report,
            _ => SourceType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Tabular => "tabular",
            SourceType::Report => "report",
            SourceType::Text => "text",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tabular" => Ok(SourceType::Tabular),
            "report" => Ok(SourceType::Report),
            "text" => Ok(SourceType::Text),
            other => Err(Error::Config(format!(
                "unknown source type '{}': expected tabular, report, or text",
                other
            ))),
        }
    }
}

/// An ingested document.
///
/// Content is kept as raw bytes so that the ingestion boundary can accept
/// either text or bytes; decoding happens when the document is chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub source_type: SourceType,
    pub content: Vec<u8>,
    /// Ingestion time in Unix milliseconds. Used to break ranking ties.
    pub ingested_at: i64,
}

impl Document {
    /// Create a document from text, stamped with the current time.
    pub fn text(id: impl Into<String>, source_type: SourceType, content: impl Into<String>) -> Self {
        Self::bytes(id, source_type, content.into().into_bytes())
    }

    /// Create a document from raw bytes, stamped with the current time.
    pub fn bytes(id: impl Into<String>, source_type: SourceType, content: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            source_type,
            content,
            ingested_at: Utc::now().timestamp_millis(),
        }
    }

    /// Override the ingestion timestamp (Unix milliseconds).
    pub fn with_ingested_at(mut self, ingested_at: i64) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    /// Decode the content as UTF-8.
    ///
    /// Fails with [`Error::Chunking`] when the bytes are not valid text.
    pub fn content_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.content).map_err(|e| {
            Error::chunking(&self.id, format!("content is not readable as UTF-8 text: {}", e))
        })
    }
}

/// A bounded slice of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// `"{document_id}#{ordinal}"`, stable across re-chunking of equal input.
    pub id: String,
    pub document_id: String,
    pub source_type: SourceType,
    /// Position of this segment within its document, starting at 0.
    pub ordinal: usize,
    /// Character offset of `text` within the document's normalized text.
    pub offset: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    /// Copied from the parent document.
    pub ingested_at: i64,
}

impl Segment {
    pub fn make_id(document_id: &str, ordinal: usize) -> String {
        format!("{}#{}", document_id, ordinal)
    }

    /// Length of `text` in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// One question/answer exchange within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    /// Unix milliseconds.
    pub at: i64,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            at: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_from_extension() {
        assert_eq!(SourceType::from_extension("CSV"), SourceType::Tabular);
        assert_eq!(SourceType::from_extension("md"), SourceType::Report);
        assert_eq!(SourceType::from_extension("txt"), SourceType::Text);
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!("Report".parse::<SourceType>().unwrap(), SourceType::Report);
        assert!("spreadsheet".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_invalid_utf8_is_chunking_error() {
        let doc = Document::bytes("bin", SourceType::Text, vec![0xff, 0xfe, 0x00]);
        match doc.content_str() {
            Err(Error::Chunking { document_id, .. }) => assert_eq!(document_id, "bin"),
            other => panic!("expected chunking error, got {:?}", other),
        }
    }
}
